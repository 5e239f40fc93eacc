mod cli;
mod commands;
mod output;
mod registry;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command, CoreCommand};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let home = commands::resolve_home(cli.home.clone());

    if let Some(command) = cli.command {
        return match command {
            Command::Core { command: CoreCommand::Start { bind, port } } => {
                commands::serve(home, cli.config, bind, port).await
            }
            Command::Serve { bind, port } => {
                commands::serve(home, cli.config, bind, port).await
            }
        };
    }

    // Pacman-style plugin operations.
    if cli.sync {
        if cli.refresh {
            commands::refresh_registry(&home, cli.registry_url.as_deref()).await?;
        }
        if cli.search {
            commands::search(&home, &cli.targets)?;
            return Ok(());
        }
        if cli.upgrade {
            commands::upgrade(&home)?;
            return Ok(());
        }
        if !cli.targets.is_empty() || cli.required {
            commands::install(&home, &cli.targets, cli.reference.as_deref(), cli.required)?;
            return Ok(());
        }
        if cli.refresh {
            return Ok(()); // bare -Sy
        }
        eprintln!("usage: -S <plugin-id> | -S --required | -Sy | -Ss [keyword] | -Su | -Syu");
        std::process::exit(2);
    }

    if cli.query {
        if cli.check {
            commands::query_check(&home, cli.config.as_deref())?;
        } else {
            commands::query_installed(&home)?;
        }
        return Ok(());
    }

    eprintln!("no operation specified; see --help");
    std::process::exit(2);
}
