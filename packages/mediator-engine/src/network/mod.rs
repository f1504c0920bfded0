//! HTTP ingress: listener configuration, the transport middleware, the
//! single fallback handler, and the server lifecycle.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::{NetworkConfig, TlsConfig};
pub use handlers::AppState;
pub use module::MediatorServer;
pub use shutdown::{HealthState, InFlightGuard, ShutdownController};
