//! Containment supervisor.
//!
//! Turns one canonical request into exactly one response: it spawns the
//! request-scoped handler, routes the request to it, and waits for the
//! caller's reply up to the configured containment timeout. Timeouts and
//! lost replies become a plain-text 500 and the handler task is aborted.
//! The outcome and duration are recorded on the request span.

use std::time::Instant;

use tokio::sync::oneshot;
use tracing::{info, info_span, warn};

use super::handler::MediatorRequestHandler;
use super::registry::MediatorContext;
use super::request::{MediatorHttpRequest, MediatorHttpResponse};

pub(crate) const UNEXPECTED_RESULT: &str = "Request handler responded with unexpected result";

/// Runs `request` through a fresh request-scoped handler and returns the
/// single response for the original caller.
///
/// Never fails: every failure mode is resolved into a response. After a
/// 202 the handler keeps running until its async update completes.
pub async fn contain(context: &MediatorContext, request: MediatorHttpRequest) -> MediatorHttpResponse {
    let started = Instant::now();
    let span = info_span!(
        "request",
        method = %request.method,
        path = %request.path,
        transaction_id = request
            .headers
            .get(&context.config.transaction_header)
            .unwrap_or("-"),
    );

    let (handle, task) = MediatorRequestHandler::spawn(context.clone(), span.clone());
    let (reply_tx, reply_rx) = oneshot::channel();
    handle.route(request, reply_tx);
    drop(handle);

    let timeout = context.config.root_timeout;
    let (outcome, response) = match tokio::time::timeout(timeout, reply_rx).await {
        Ok(Ok(response)) => ("ok", response),
        Ok(Err(_closed)) => {
            task.abort();
            warn!(parent: &span, "{UNEXPECTED_RESULT}");
            ("unexpected", MediatorHttpResponse::plain_text(500, UNEXPECTED_RESULT))
        }
        Err(_elapsed) => {
            task.abort();
            let message = format!(
                "Request handler did not respond within {} ms",
                timeout.as_millis()
            );
            warn!(parent: &span, "{message}");
            ("timeout", MediatorHttpResponse::plain_text(500, message))
        }
    };

    #[allow(clippy::cast_possible_truncation)]
    let duration_ms = started.elapsed().as_millis() as u64;
    info!(
        parent: &span,
        outcome,
        status = response.status,
        duration_ms,
        "request contained"
    );
    response
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::service::routing::{handler_fn, RoutingTable};
    use crate::service::testing::test_context;

    fn get(path: &str) -> MediatorHttpRequest {
        MediatorHttpRequest::new("GET", "http", "localhost", 8500, path)
    }

    #[tokio::test]
    async fn passes_through_handler_response() {
        let mut table = RoutingTable::new();
        table.add_route(
            "/test",
            handler_fn("ok", |_, _, handle| async move {
                handle.finish("basic-routing", "text/plain", 200);
            }),
        );
        let (context, _core_rx) = test_context(table);

        let response = contain(&context, get("/test")).await;

        assert_eq!(response.status, 200);
        assert!(response.body.unwrap().contains(r#""body":"basic-routing""#));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_handler_times_out_with_500() {
        let (stopped_tx, stopped_rx) = oneshot::channel::<()>();
        let stopped_tx = std::sync::Arc::new(parking_lot::Mutex::new(Some(stopped_tx)));
        let mut table = RoutingTable::new();
        table.add_route(
            "/hang",
            handler_fn("hang", move |_, _, handle| {
                let stopped = stopped_tx.lock().take();
                async move {
                    let _stopped = stopped;
                    let _handle = handle;
                    std::future::pending::<()>().await;
                }
            }),
        );
        let (mut context, _core_rx) = test_context(table);
        let mut config = (*context.config).clone();
        config.root_timeout = Duration::from_secs(2);
        context.config = std::sync::Arc::new(config);

        let response = contain(&context, get("/hang")).await;

        assert_eq!(response.status, 500);
        assert_eq!(response.content_type(), Some("text/plain"));
        assert_eq!(
            response.body.as_deref(),
            Some("Request handler did not respond within 2000 ms")
        );
        // The routed handler is torn down with its request.
        stopped_rx.await.expect_err("routed handler dropped without signalling");
    }
}
