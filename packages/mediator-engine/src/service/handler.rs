//! Request-scoped handler.
//!
//! One instance runs as its own task for every inbound request. It owns the
//! request's envelope, the caller's reply channel and the async/finalizing
//! flags, and consumes [`HandlerMessage`]s sent through [`RequestHandle`]s.
//! Nothing in here is shared with another request, so no locking is needed.
//!
//! ```text
//! Routing ──Route──▶ AwaitingCompletion ──AcceptAsync──▶ AsyncAccepted
//!    │                      │                                 │
//!    └── no route ──────────┴──── Finish / Error ─────────────┘
//!                                     ▼
//!                                Finalizing ──▶ Destroyed
//! ```
//!
//! The handler keeps no sender to its own inbox. When every handle is gone
//! without a finalize message, the inbox closes and the request is finalized
//! as an error instead of waiting for the containment timeout.

use anyhow::anyhow;
use mediator_core::{CoreResponse, Response, OPENHIM_MIME_TYPE};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn, Instrument, Span};

use super::registry::MediatorContext;
use super::request::{
    FinishRequest, HandlerMessage, MediatorHttpRequest, MediatorHttpResponse, RequestHandle,
};

pub(crate) const ASYNC_WITHOUT_TRANSACTION: &str =
    "Cannot enable asynchronous processing if the transaction id is unknown";
pub(crate) const HANDLER_ABANDONED: &str = "request handler ended without completing the request";
const CORE_UPDATE_ORCHESTRATION: &str = "core-api-update-transaction";

/// Lifecycle of a request-scoped handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandlerState {
    Routing,
    AwaitingCompletion,
    AsyncAccepted,
    Finalizing,
    Destroyed,
}

pub(crate) struct MediatorRequestHandler {
    context: MediatorContext,
    inbox: mpsc::UnboundedReceiver<HandlerMessage>,
    state: HandlerState,
    envelope: CoreResponse,
    caller: Option<oneshot::Sender<MediatorHttpResponse>>,
    transaction_id: Option<String>,
    async_accepted: bool,
    finalizing: bool,
    /// Routed handler tasks. Dropped (and aborted) on teardown.
    children: JoinSet<()>,
}

impl MediatorRequestHandler {
    /// Spawns a handler task inside `span` and returns its first handle.
    pub(crate) fn spawn(context: MediatorContext, span: Span) -> (RequestHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Self::new(context, rx);
        let task = tokio::spawn(handler.run().instrument(span));
        (RequestHandle::new(tx), task)
    }

    fn new(context: MediatorContext, inbox: mpsc::UnboundedReceiver<HandlerMessage>) -> Self {
        let envelope = context
            .config
            .urn()
            .map_or_else(CoreResponse::new, CoreResponse::with_urn);
        Self {
            context,
            inbox,
            state: HandlerState::Routing,
            envelope,
            caller: None,
            transaction_id: None,
            async_accepted: false,
            finalizing: false,
            children: JoinSet::new(),
        }
    }

    async fn run(mut self) {
        while let Some(message) = self.inbox.recv().await {
            self.on_message(message).await;
            if self.finalizing {
                break;
            }
        }

        if !self.finalizing {
            self.fail(anyhow!(HANDLER_ABANDONED)).await;
        }

        self.state = HandlerState::Destroyed;
        debug!(children = self.children.len(), "request handler destroyed");
    }

    async fn on_message(&mut self, message: HandlerMessage) {
        match message {
            HandlerMessage::Route {
                request,
                reply,
                handle,
            } => self.on_route(request, reply, handle).await,
            HandlerMessage::AcceptAsync => self.on_accept_async().await,
            HandlerMessage::AddOrchestration(orchestration) => {
                if self.finalizing {
                    debug!(name = %orchestration.name, "orchestration after finalize ignored");
                } else {
                    self.envelope.add_orchestration(orchestration);
                }
            }
            HandlerMessage::PutProperty { name, value } => {
                if self.finalizing {
                    debug!(%name, "property after finalize ignored");
                } else {
                    self.envelope.put_property(name, value);
                }
            }
            HandlerMessage::Finish(finish) => self.on_finish(finish).await,
            HandlerMessage::Error(cause) => self.fail(cause).await,
        }
    }

    // -- message handlers ---------------------------------------------------

    async fn on_route(
        &mut self,
        mut request: MediatorHttpRequest,
        reply: oneshot::Sender<MediatorHttpResponse>,
        handle: RequestHandle,
    ) {
        if self.state != HandlerState::Routing {
            warn!(state = ?self.state, "request already routed, ignoring second route");
            return;
        }

        info!(method = %request.method, path = %request.path, "received request");
        self.caller = Some(reply);
        self.transaction_id = request
            .headers
            .get(&self.context.config.transaction_header)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        if request.correlation_id.is_none() {
            request.correlation_id.clone_from(&self.transaction_id);
        }

        let Some(descriptor) = self
            .context
            .config
            .routing_table
            .resolve(&request.path)
            .cloned()
        else {
            self.envelope.set_response(
                Response::new(404)
                    .with_body(format!("{} not found", request.path))
                    .with_content_type("text/plain"),
            );
            self.respond_and_end(404).await;
            return;
        };

        let handler = descriptor.build(&self.context);
        request.handle = Some(handle);
        self.state = HandlerState::AwaitingCompletion;
        debug!(route = descriptor.name(), "dispatching to routed handler");
        self.children.spawn(handler.handle(request).in_current_span());
    }

    async fn on_accept_async(&mut self) {
        match self.state {
            HandlerState::AwaitingCompletion => {}
            HandlerState::AsyncAccepted => {
                debug!("request already accepted for async processing");
                return;
            }
            state => {
                warn!(?state, "async acceptance outside of a routed request ignored");
                return;
            }
        }

        if self.transaction_id.is_none() {
            self.fail(anyhow!(ASYNC_WITHOUT_TRANSACTION)).await;
            return;
        }

        info!("accepted async request, responding to client");
        self.async_accepted = true;
        self.state = HandlerState::AsyncAccepted;

        // The 202 goes out from a copy; the owned envelope keeps whatever
        // response it had so the real completion is not blocked.
        let accepted = self
            .envelope
            .snapshot_with_response(Response::new(202).with_body("Accepted request"));
        self.respond_to_caller(envelope_response(&accepted, 202));
    }

    async fn on_finish(&mut self, finish: FinishRequest) {
        let status = finish.status_or_ok();
        if self.envelope.response().is_none() {
            let mut response = Response::new(status);
            if let Some(mime_type) = finish.mime_type {
                response = response.with_content_type(mime_type);
            }
            response.body = finish.body;
            self.envelope.set_response(response);
        }
        self.respond_and_end(status).await;
    }

    async fn fail(&mut self, cause: anyhow::Error) {
        error!(error = %cause, "error while processing request");
        self.envelope.set_response(
            Response::new(500)
                .with_body(cause.to_string())
                .with_content_type("text/plain"),
        );
        self.respond_and_end(500).await;
    }

    // -- finalization -------------------------------------------------------

    /// Single finalize gate. Every completion path ends here, and only the
    /// first call has an effect.
    async fn respond_and_end(&mut self, status: u16) {
        if self.finalizing {
            return;
        }
        self.finalizing = true;
        self.state = HandlerState::Finalizing;
        self.envelope.seal();

        if self.async_accepted {
            self.update_core_transaction().await;
        } else {
            let response = envelope_response(&self.envelope, status);
            self.respond_to_caller(response);
        }
    }

    fn respond_to_caller(&mut self, response: MediatorHttpResponse) {
        let Some(caller) = self.caller.take() else {
            warn!(status = response.status, "response ready but request caller is gone");
            return;
        };
        if caller.send(response).is_err() {
            warn!("request caller stopped waiting before the response was sent");
        }
    }

    async fn update_core_transaction(&mut self) {
        let Some(transaction_id) = self.transaction_id.clone() else {
            error!("async request finalized without a transaction id");
            return;
        };
        let body = match self.envelope.to_json() {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "failed to serialize transaction update");
                return;
            }
        };

        let core = &self.context.config.core;
        let request = MediatorHttpRequest::new(
            "PUT",
            core.scheme.clone(),
            core.host.clone(),
            core.port,
            format!("/transactions/{transaction_id}"),
        )
        .with_orchestration(CORE_UPDATE_ORCHESTRATION)
        .with_correlation_id(transaction_id.clone())
        .with_header("Content-Type", "application/json")
        .with_body(body);

        info!(%transaction_id, "sending updated transaction to core");
        match self.context.connectors.core_api.send(request).await {
            Ok(response) => info!(
                status = response.status,
                body = response.body.as_deref().unwrap_or(""),
                "received response from core"
            ),
            Err(e) => error!(error = %e, %transaction_id, "failed to update transaction in core"),
        }
    }
}

/// Wraps a serialized envelope into the reply for the original caller.
fn envelope_response(envelope: &CoreResponse, status: u16) -> MediatorHttpResponse {
    match envelope.to_json() {
        Ok(body) => MediatorHttpResponse::new(status)
            .with_header("Content-Type", OPENHIM_MIME_TYPE)
            .with_body(body),
        Err(e) => {
            error!(error = %e, "failed to serialize response envelope");
            MediatorHttpResponse::plain_text(500, format!("failed to serialize response envelope: {e}"))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
