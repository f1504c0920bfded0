//! Outbound connectors.
//!
//! A connector takes a canonical request and asynchronously produces a
//! canonical response or an error. The engine only ever talks to the
//! management API through [`ConnectorSet::core_api`].

pub mod core_api;
pub mod http;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

pub use core_api::CoreApiConnector;
pub use http::HttpConnector;

use crate::service::config::MediatorConfig;
use crate::service::request::{MediatorHttpRequest, MediatorHttpResponse};

// ---------------------------------------------------------------------------
// ConnectorError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("management API authentication failed: {0}")]
    Authentication(String),
}

// ---------------------------------------------------------------------------
// Connector trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Connector: Send + Sync {
    async fn send(&self, request: MediatorHttpRequest)
        -> Result<MediatorHttpResponse, ConnectorError>;
}

// ---------------------------------------------------------------------------
// ConnectorSet
// ---------------------------------------------------------------------------

/// Singleton connectors shared by every request.
#[derive(Clone)]
pub struct ConnectorSet {
    /// Generic HTTP client.
    pub http: Arc<dyn Connector>,
    /// Authenticated management API adapter.
    pub core_api: Arc<dyn Connector>,
}

impl ConnectorSet {
    #[must_use]
    pub fn new(http: Arc<dyn Connector>, core_api: Arc<dyn Connector>) -> Self {
        Self { http, core_api }
    }

    /// Builds the default HTTP and management API connectors.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be constructed.
    pub fn from_config(config: &MediatorConfig) -> Result<Self, ConnectorError> {
        Ok(Self {
            http: Arc::new(HttpConnector::new()?),
            core_api: Arc::new(CoreApiConnector::new(config.core.clone())?),
        })
    }
}

impl fmt::Debug for ConnectorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorSet").finish_non_exhaustive()
    }
}
