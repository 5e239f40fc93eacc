use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "meristem",
    about = "Fleet control plane: node orchestration, plugin runtime, tamper-evident audit",
    version,
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    /// Home directory for config, registry cache and state files.
    #[arg(long, env = "MERISTEM_HOME", global = true)]
    pub home: Option<PathBuf>,

    /// Path to the core TOML config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Remote registry URL for plugin sync operations.
    #[arg(long, env = "MERISTEM_REGISTRY_URL", global = true)]
    pub registry_url: Option<String>,

    // ── Pacman-style plugin operations ───────────────────────────────────────
    /// Sync operation: install targets, or refresh/upgrade with -y/-u.
    #[arg(short = 'S')]
    pub sync: bool,

    /// Refresh the registry cache (with -S).
    #[arg(short = 'y')]
    pub refresh: bool,

    /// Upgrade installed plugins (with -S).
    #[arg(short = 'u')]
    pub upgrade: bool,

    /// Search the registry (with -S): -Ss [keyword].
    #[arg(short = 's')]
    pub search: bool,

    /// Query installed plugins.
    #[arg(short = 'Q')]
    pub query: bool,

    /// Verify installed plugins and manifest integrity (with -Q).
    #[arg(short = 'k')]
    pub check: bool,

    /// Pin an install to a registry ref.
    #[arg(long = "ref")]
    pub reference: Option<String>,

    /// Install every plugin the registry marks as required.
    #[arg(long)]
    pub required: bool,

    /// Plugin ids or search keywords for the chosen operation.
    pub targets: Vec<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Core process management.
    Core {
        #[command(subcommand)]
        command: CoreCommand,
    },

    /// Start the API server in the foreground (alias of `core start`).
    Serve {
        #[arg(long)]
        bind: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Debug, Subcommand)]
pub enum CoreCommand {
    /// Start the core: store, bus, audit pipeline, plugin runtime, API.
    Start {
        #[arg(long)]
        bind: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },
}
