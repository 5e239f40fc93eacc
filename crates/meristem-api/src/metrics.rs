use std::sync::atomic::{AtomicU64, Ordering};

/// Process-level counters rendered as Prometheus text exposition.
#[derive(Debug, Default)]
pub struct Metrics {
    pub ws_connections: AtomicU64,
    pub tasks_created: AtomicU64,
    pub auth_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render the counter set plus live gauges supplied by the caller.
    pub fn render(&self, audit_backlog: u64, log_dropped: u64, log_published: u64) -> String {
        let mut out = String::new();
        let mut gauge = |name: &str, help: &str, value: u64| {
            out.push_str(&format!("# HELP {name} {help}\n"));
            out.push_str(&format!("# TYPE {name} gauge\n"));
            out.push_str(&format!("{name} {value}\n"));
        };
        gauge(
            "meristem_ws_connections",
            "Open WebSocket connections",
            self.ws_connections.load(Ordering::Relaxed),
        );
        gauge(
            "meristem_tasks_created_total",
            "Tasks created since start",
            self.tasks_created.load(Ordering::Relaxed),
        );
        gauge(
            "meristem_auth_failures_total",
            "Rejected authentication attempts",
            self.auth_failures.load(Ordering::Relaxed),
        );
        gauge("meristem_audit_backlog", "Audit intents awaiting commit", audit_backlog);
        gauge("meristem_log_dropped_total", "Log envelopes dropped by the ring", log_dropped);
        gauge("meristem_log_published_total", "Log envelopes published to the bus", log_published);
        out
    }
}
