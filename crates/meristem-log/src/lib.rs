pub mod envelope;
pub mod logger;
pub mod transport;

pub use envelope::{LogEnvelope, LogFragment};
pub use logger::ContextLogger;
pub use transport::{BusTransport, TransportConfig};
