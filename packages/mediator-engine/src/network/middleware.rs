//! Transport middleware wrapped around the ingress handler.
//!
//! Only request-id tagging, tracing and the body-size cap live here. The
//! request deadline belongs to the containment supervisor, so no timeout
//! layer is installed.

use axum::http::header::HeaderName;
use tower::layer::util::{Identity, Stack};
use tower::ServiceBuilder;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::config::NetworkConfig;

/// Header carrying the per-request id, echoed back on the response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

type HttpLayers = Stack<
    PropagateRequestIdLayer,
    Stack<
        RequestBodyLimitLayer,
        Stack<
            TraceLayer<SharedClassifier<ServerErrorsAsFailures>>,
            Stack<SetRequestIdLayer<MakeRequestUuid>, Identity>,
        >,
    >,
>;

/// Builds the layer stack, outermost first:
///
/// 1. `SetRequestId` -- tags the request with a UUID v4 unless it has one
/// 2. `Trace` -- one span per HTTP exchange
/// 3. `RequestBodyLimit` -- 413 for bodies over `max_body_bytes`
/// 4. `PropagateRequestId` -- copies the id onto the response
#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(PropagateRequestIdLayer::new(request_id))
        .into_inner()
}
