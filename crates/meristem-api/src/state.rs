use std::sync::Arc;

use meristem_audit::AuditPipeline;
use meristem_control::TaskService;
use meristem_domain::NodeId;
use meristem_log::BusTransport;
use meristem_store::Store;

use crate::auth::AuthKeys;
use crate::metrics::Metrics;
use crate::ws::Fanout;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub tasks: Arc<TaskService>,
    pub pipeline: Arc<AuditPipeline>,
    pub fanout: Arc<Fanout>,
    pub auth: Arc<AuthKeys>,
    pub metrics: Arc<Metrics>,
    pub transport: Option<Arc<BusTransport>>,
    /// This core's node identity, stamped into trace contexts.
    pub node_id: NodeId,
    pub bootstrap_token: Arc<String>,
}
