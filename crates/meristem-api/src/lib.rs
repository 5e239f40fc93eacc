pub mod app;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod state;
pub mod ws;

pub use app::build_app;
pub use auth::{AuthContext, AuthKeys, Claims};
pub use error::ApiError;
pub use state::AppState;
pub use ws::{Fanout, WsAuthContext};
