//! Shared fixtures for unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::config::MediatorConfig;
use super::registry::MediatorContext;
use super::request::{MediatorHttpRequest, MediatorHttpResponse};
use super::routing::RoutingTable;
use crate::connectors::{Connector, ConnectorError, ConnectorSet};

/// Connector that forwards every request to a channel and answers 200.
pub(crate) struct RecordingConnector {
    sent: mpsc::UnboundedSender<MediatorHttpRequest>,
}

#[async_trait]
impl Connector for RecordingConnector {
    async fn send(
        &self,
        request: MediatorHttpRequest,
    ) -> Result<MediatorHttpResponse, ConnectorError> {
        let _ = self.sent.send(request);
        Ok(MediatorHttpResponse::new(200).with_body("updated"))
    }
}

/// Context over `table` whose connectors record requests instead of sending
/// them. The receiver yields everything sent to the management API.
pub(crate) fn test_context(
    table: RoutingTable,
) -> (MediatorContext, mpsc::UnboundedReceiver<MediatorHttpRequest>) {
    let (core_tx, core_rx) = mpsc::unbounded_channel();
    let (http_tx, _http_rx) = mpsc::unbounded_channel();
    let connectors = ConnectorSet::new(
        Arc::new(RecordingConnector { sent: http_tx }),
        Arc::new(RecordingConnector { sent: core_tx }),
    );
    let config = MediatorConfig::default().with_routing_table(table);
    (MediatorContext::new(config, connectors), core_rx)
}
