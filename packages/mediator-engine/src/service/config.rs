//! Mediator configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::routing::RoutingTable;
use crate::network::NetworkConfig;

/// Default header carrying the management API's transaction identifier.
pub const DEFAULT_TRANSACTION_HEADER: &str = "X-OpenHIM-TransactionID";

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed registration descriptor: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid registration descriptor: {0}")]
    InvalidRegistration(String),
}

// ---------------------------------------------------------------------------
// MediatorConfig
// ---------------------------------------------------------------------------

/// Top-level mediator configuration, shared as `Arc<MediatorConfig>`.
#[derive(Debug, Clone)]
pub struct MediatorConfig {
    /// Mediator name, used in logs.
    pub name: String,
    pub network: NetworkConfig,
    pub core: CoreApiConfig,
    /// Containment timeout: how long the supervisor waits for a request's
    /// final answer.
    pub root_timeout: Duration,
    /// Inbound header carrying the correlation/transaction identifier.
    pub transaction_header: String,
    pub registration: Option<RegistrationConfig>,
    pub routing_table: Arc<RoutingTable>,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            name: "mediator".to_string(),
            network: NetworkConfig::default(),
            core: CoreApiConfig::default(),
            root_timeout: Duration::from_secs(60),
            transaction_header: DEFAULT_TRANSACTION_HEADER.to_string(),
            registration: None,
            routing_table: Arc::new(RoutingTable::new()),
        }
    }
}

impl MediatorConfig {
    #[must_use]
    pub fn with_routing_table(mut self, table: RoutingTable) -> Self {
        self.routing_table = Arc::new(table);
        self
    }

    /// Mediator URN from the registration descriptor, if one is loaded.
    #[must_use]
    pub fn urn(&self) -> Option<&str> {
        self.registration.as_ref().map(|r| r.urn.as_str())
    }
}

// ---------------------------------------------------------------------------
// CoreApiConfig
// ---------------------------------------------------------------------------

/// Connection settings for the management (core) API.
#[derive(Debug, Clone)]
pub struct CoreApiConfig {
    pub host: String,
    pub port: u16,
    pub scheme: String,
    pub username: String,
    pub password: String,
    /// Accept self-signed TLS certificates from the management API.
    pub trust_self_signed: bool,
    pub request_timeout: Duration,
}

impl Default for CoreApiConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            scheme: "https".to_string(),
            username: "root@openhim.org".to_string(),
            password: String::new(),
            trust_self_signed: false,
            request_timeout: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// RegistrationConfig
// ---------------------------------------------------------------------------

/// Mediator registration descriptor (JSON).
///
/// Keys other than the named ones are preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationConfig {
    #[serde(default)]
    pub urn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RegistrationConfig {
    /// Parses a descriptor from JSON text.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed JSON, or
    /// [`ConfigError::InvalidRegistration`] when `urn` is missing or empty.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        if config.urn.trim().is_empty() {
            return Err(ConfigError::InvalidRegistration(
                "urn is required".to_string(),
            ));
        }
        Ok(config)
    }

    /// Reads and parses a descriptor file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_json`](Self::from_json).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }
}
