//! Canonical request/response values and the per-request message vocabulary.
//!
//! A [`MediatorHttpRequest`] is what a routed handler receives and what a
//! connector sends. A [`RequestHandle`] is the reply target carried inside a
//! routed request: every completion signal from a user handler travels
//! through it as a [`HandlerMessage`] to the request-scoped handler task.

use std::collections::BTreeMap;

use mediator_core::{Headers, Orchestration, OrchestrationRequest, OrchestrationResponse};
use tokio::sync::{mpsc, oneshot};

// ---------------------------------------------------------------------------
// MediatorHttpRequest
// ---------------------------------------------------------------------------

/// Canonical HTTP request value.
///
/// Built once by the ingress handler for an inbound request, or by any
/// component issuing an outbound call through a connector.
#[derive(Debug, Clone)]
pub struct MediatorHttpRequest {
    pub(crate) handle: Option<RequestHandle>,
    /// Label used when this request is recorded as an orchestration.
    pub orchestration: Option<String>,
    /// Correlation/transaction identifier, when known.
    pub correlation_id: Option<String>,
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub body: Option<String>,
    pub headers: Headers,
    /// Query parameters, single-valued.
    pub params: BTreeMap<String, String>,
}

impl MediatorHttpRequest {
    /// Creates a request with no body, headers or parameters.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        scheme: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        Self {
            handle: None,
            orchestration: None,
            correlation_id: None,
            method: method.into(),
            scheme: scheme.into(),
            host: host.into(),
            port,
            path: path.into(),
            body: None,
            headers: Headers::new(),
            params: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_orchestration(mut self, name: impl Into<String>) -> Self {
        self.orchestration = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Reply target for completion messages. Present on every routed request.
    #[must_use]
    pub fn handle(&self) -> Option<&RequestHandle> {
        self.handle.as_ref()
    }

    /// Query parameters joined as `k=v&k=v`, or `None` when there are none.
    #[must_use]
    pub fn query_string(&self) -> Option<String> {
        if self.params.is_empty() {
            return None;
        }
        let joined = self
            .params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        Some(joined)
    }

    /// Request half of an orchestration record describing this call.
    #[must_use]
    pub fn to_orchestration_request(&self) -> OrchestrationRequest {
        OrchestrationRequest {
            path: self.path.clone(),
            method: self.method.clone(),
            querystring: self.query_string(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            host: Some(self.host.clone()),
            port: Some(self.port),
        }
    }
}

// ---------------------------------------------------------------------------
// MediatorHttpResponse
// ---------------------------------------------------------------------------

/// Canonical HTTP response value produced by connectors and by the
/// request-scoped handler for the original caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediatorHttpResponse {
    pub status: u16,
    pub body: Option<String>,
    pub headers: Headers,
}

impl MediatorHttpResponse {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            body: None,
            headers: Headers::new(),
        }
    }

    /// Plain-text response, used for failures resolved outside a handler.
    #[must_use]
    pub fn plain_text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status)
            .with_header("Content-Type", "text/plain")
            .with_body(body)
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("Content-Type")
    }

    /// Response half of an orchestration record describing this call.
    #[must_use]
    pub fn to_orchestration_response(&self) -> OrchestrationResponse {
        OrchestrationResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// FinishRequest
// ---------------------------------------------------------------------------

/// Arguments of a successful completion. A missing status finalizes with 200.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinishRequest {
    pub body: Option<String>,
    pub mime_type: Option<String>,
    pub status: Option<u16>,
}

impl FinishRequest {
    pub(crate) fn status_or_ok(&self) -> u16 {
        self.status.unwrap_or(200)
    }
}

// ---------------------------------------------------------------------------
// HandlerMessage
// ---------------------------------------------------------------------------

/// Message vocabulary accepted by the request-scoped handler.
#[derive(Debug)]
pub(crate) enum HandlerMessage {
    /// Initial dispatch from the ingress supervisor. `handle` becomes the
    /// routed request's reply target.
    Route {
        request: MediatorHttpRequest,
        reply: oneshot::Sender<MediatorHttpResponse>,
        handle: RequestHandle,
    },
    AcceptAsync,
    AddOrchestration(Orchestration),
    PutProperty {
        name: String,
        value: String,
    },
    Finish(FinishRequest),
    Error(anyhow::Error),
}

// ---------------------------------------------------------------------------
// RequestHandle
// ---------------------------------------------------------------------------

/// Cloneable reply target for one in-flight request.
///
/// Every method returns `false` when the request has already been torn
/// down; the message is discarded.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    tx: mpsc::UnboundedSender<HandlerMessage>,
}

impl RequestHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<HandlerMessage>) -> Self {
        Self { tx }
    }

    fn send(&self, message: HandlerMessage) -> bool {
        self.tx.send(message).is_ok()
    }

    pub(crate) fn route(
        &self,
        request: MediatorHttpRequest,
        reply: oneshot::Sender<MediatorHttpResponse>,
    ) -> bool {
        self.send(HandlerMessage::Route {
            request,
            reply,
            handle: self.clone(),
        })
    }

    /// Acknowledges the caller with 202 and defers the real result to the
    /// management API.
    pub fn accept_async(&self) -> bool {
        self.send(HandlerMessage::AcceptAsync)
    }

    pub fn add_orchestration(&self, orchestration: Orchestration) -> bool {
        self.send(HandlerMessage::AddOrchestration(orchestration))
    }

    pub fn put_property(&self, name: impl Into<String>, value: impl Into<String>) -> bool {
        self.send(HandlerMessage::PutProperty {
            name: name.into(),
            value: value.into(),
        })
    }

    /// Completes the request successfully.
    pub fn finish(&self, body: impl Into<String>, mime_type: impl Into<String>, status: u16) -> bool {
        self.finish_with(FinishRequest {
            body: Some(body.into()),
            mime_type: Some(mime_type.into()),
            status: Some(status),
        })
    }

    pub fn finish_with(&self, request: FinishRequest) -> bool {
        self.send(HandlerMessage::Finish(request))
    }

    /// Completes the request as a 500 carrying the cause's message.
    pub fn error(&self, cause: impl Into<anyhow::Error>) -> bool {
        self.send(HandlerMessage::Error(cause.into()))
    }

    /// Returns `true` once the request-scoped handler is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
