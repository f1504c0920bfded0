//! Request lifecycle engine.
//!
//! 1. **Routing** (`routing`): path -> handler descriptor
//! 2. **Request values** (`request`): canonical request/response and the reply handle
//! 3. **Request-scoped handler** (`handler`): per-request state machine
//! 4. **Containment** (`containment`): one response per request, bounded by a timeout
//! 5. **Startup components** (`registry`): singletons launched before traffic

pub mod config;
pub mod containment;
pub(crate) mod handler;
pub mod registry;
pub mod request;
pub mod routing;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenient access.
pub use config::{
    ConfigError, CoreApiConfig, MediatorConfig, RegistrationConfig, DEFAULT_TRANSACTION_HEADER,
};
pub use containment::contain;
pub use registry::{ComponentRegistry, ManagedComponent, MediatorContext};
pub use request::{FinishRequest, MediatorHttpRequest, MediatorHttpResponse, RequestHandle};
pub use routing::{handler_fn, RouteDescriptor, RouteHandler, RoutingError, RoutingTable};
