use std::future::Future;
use std::pin::Pin;

use tokio::sync::Mutex;
use tracing::{info, warn};

type ShutdownFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
type ShutdownTask = Box<dyn FnOnce() -> ShutdownFuture + Send>;

/// LIFO teardown of everything the bootstrap scope brought up. Each task
/// is awaited and logged; a failing task never aborts the remainder.
#[derive(Default)]
pub struct ShutdownLifecycle {
    tasks: Mutex<Vec<(String, ShutdownTask)>>,
}

impl ShutdownLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register<F, Fut>(&self, name: impl Into<String>, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        tasks.push((name.into(), Box::new(move || Box::pin(task()))));
    }

    /// Run every registered task in reverse registration order. Returns
    /// the names of tasks that failed.
    pub async fn run(&self) -> Vec<String> {
        let mut tasks = {
            let mut guard = self.tasks.lock().await;
            std::mem::take(&mut *guard)
        };
        let mut failed = Vec::new();

        while let Some((name, task)) = tasks.pop() {
            info!(task = %name, "shutdown task starting");
            match task().await {
                Ok(()) => info!(task = %name, "shutdown task complete"),
                Err(reason) => {
                    warn!(task = %name, %reason, "shutdown task failed; continuing");
                    failed.push(name);
                }
            }
        }
        failed
    }
}
