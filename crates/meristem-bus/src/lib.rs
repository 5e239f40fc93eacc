pub mod bus;
pub mod error;
pub mod guard;
pub mod memory;
pub mod subjects;

pub use bus::{Bus, BusMessage, Subscription};
pub use error::BusError;
pub use guard::{evaluate_subject, denial_event, required_permission, DenialKind, GuardDecision};
pub use memory::MemoryBus;
