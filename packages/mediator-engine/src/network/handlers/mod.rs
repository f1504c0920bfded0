//! HTTP handler definitions for the mediator server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports the ingress handler.

pub mod ingress;

pub use ingress::ingress_handler;

use std::sync::Arc;

use super::ShutdownController;
use crate::service::MediatorContext;

/// Shared application state passed to axum handlers via `State` extraction.
///
/// Holds `Arc`-backed resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Configuration, connectors and startup components.
    pub context: MediatorContext,
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
}
