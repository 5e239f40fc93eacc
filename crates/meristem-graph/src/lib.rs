mod error;
mod sdui;
mod topology;
mod validate;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::GraphError;
pub use sdui::{negotiate_sdui, SduiCompat};
pub use topology::{topo_order, TopologyResult};
pub use validate::{validate_manifest, validate_manifest_set};
