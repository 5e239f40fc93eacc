use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use meristem_domain::IsolateId;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::error::IsolateError;
use crate::host::{IsolateHandle, IsolateHost, IsolatePort, IsolateSpec};
use crate::message::PluginMessage;

const PORT_CAPACITY: usize = 256;

/// Process-backed isolate host: each plugin runs under the configured
/// runtime command as a child process, exchanging newline-delimited JSON
/// frames over stdin/stdout. Stderr passes through for operator logs.
pub struct ProcessHost {
    runtime_cmd: String,
    children: Arc<Mutex<HashMap<IsolateId, Child>>>,
}

impl ProcessHost {
    pub fn new(runtime_cmd: impl Into<String>) -> Self {
        Self { runtime_cmd: runtime_cmd.into(), children: Arc::new(Mutex::new(HashMap::new())) }
    }
}

#[async_trait]
impl IsolateHost for ProcessHost {
    async fn spawn(&self, spec: IsolateSpec) -> Result<IsolateHandle, IsolateError> {
        let mut child = Command::new(&self.runtime_cmd)
            .arg(&spec.entry_path)
            .env_clear()
            .env("MERISTEM_ISOLATE_ID", spec.isolate_id.as_str())
            .env("MERISTEM_PLUGIN_ID", spec.manifest.id.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| IsolateError::SpawnFailed {
                isolate_id: spec.isolate_id.clone(),
                reason: e.to_string(),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| IsolateError::SpawnFailed {
            isolate_id: spec.isolate_id.clone(),
            reason: "stdin not piped".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| IsolateError::SpawnFailed {
            isolate_id: spec.isolate_id.clone(),
            reason: "stdout not piped".to_string(),
        })?;

        let (to_isolate, mut outbound) = mpsc::channel::<PluginMessage>(PORT_CAPACITY);
        let (inbound_tx, from_isolate) = mpsc::channel::<PluginMessage>(PORT_CAPACITY);

        // Writer: frames → stdin as JSON lines.
        let writer_id = spec.isolate_id.clone();
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(frame) = outbound.recv().await {
                let line = match serde_json::to_string(&frame) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(isolate_id = %writer_id, error = %e, "unencodable frame dropped");
                        continue;
                    }
                };
                if stdin.write_all(line.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                {
                    debug!(isolate_id = %writer_id, "isolate stdin closed");
                    return;
                }
            }
        });

        // Reader: stdout lines → frames.
        let reader_id = spec.isolate_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<PluginMessage>(&line) {
                            Ok(frame) => {
                                if inbound_tx.send(frame).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                warn!(isolate_id = %reader_id, error = %e, "undecodable frame from isolate");
                            }
                        }
                    }
                    Ok(None) => {
                        debug!(isolate_id = %reader_id, "isolate stdout closed");
                        return;
                    }
                    Err(e) => {
                        warn!(isolate_id = %reader_id, error = %e, "isolate stdout read failed");
                        return;
                    }
                }
            }
        });

        self.children.lock().await.insert(spec.isolate_id.clone(), child);
        debug!(isolate_id = %spec.isolate_id, plugin_id = %spec.manifest.id, "isolate spawned");

        Ok(IsolateHandle {
            isolate_id: spec.isolate_id,
            port: IsolatePort { to_isolate, from_isolate },
        })
    }

    async fn destroy(&self, isolate_id: &IsolateId) -> Result<(), IsolateError> {
        let child = self.children.lock().await.remove(isolate_id);
        match child {
            Some(mut child) => {
                if let Err(e) = child.kill().await {
                    warn!(isolate_id = %isolate_id, error = %e, "isolate kill failed");
                }
                let _ = child.wait().await;
                debug!(isolate_id = %isolate_id, "isolate destroyed");
                Ok(())
            }
            // Already gone; destruction is idempotent.
            None => Ok(()),
        }
    }
}
