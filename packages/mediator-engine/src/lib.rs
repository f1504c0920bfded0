//! Mediator Engine -- per-request handler state machine, routing, core API
//! connectors and the HTTP ingress that drives them.

pub mod connectors;
pub mod network;
pub mod service;

pub use connectors::{Connector, ConnectorError, ConnectorSet, CoreApiConnector, HttpConnector};
pub use network::{MediatorServer, NetworkConfig, ShutdownController, TlsConfig};
pub use service::{
    contain, handler_fn, ComponentRegistry, ManagedComponent, MediatorConfig, MediatorContext,
    MediatorHttpRequest, MediatorHttpResponse, RequestHandle, RouteDescriptor, RouteHandler,
    RoutingTable,
};
