//! Ingress handler: the single axum fallback for every method and path.
//!
//! Reads the body without blocking, builds the canonical request, hands it
//! to the containment supervisor and writes whatever comes back. Routing is
//! done by the engine's routing table, not by axum.

use std::collections::BTreeMap;

use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::request::Parts;
use axum::http::uri::Authority;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use mediator_core::Headers;
use tracing::error;

use super::AppState;
use crate::service::{contain, MediatorConfig, MediatorHttpRequest, MediatorHttpResponse};

/// Handles every inbound request.
pub async fn ingress_handler(State(state): State<AppState>, request: Request) -> Response {
    if !state.shutdown.is_accepting() {
        return into_http_response(MediatorHttpResponse::plain_text(
            503,
            "mediator is shutting down",
        ));
    }
    let _in_flight = state.shutdown.in_flight_guard();

    let (parts, body) = request.into_parts();
    let limit = state.context.config.network.max_body_bytes;
    let body = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(
                method = %parts.method,
                path = parts.uri.path(),
                error = %e,
                "failed to read request body"
            );
            return into_http_response(MediatorHttpResponse::plain_text(500, e.to_string()));
        }
    };

    let request = canonical_request(&parts, &body, &state.context.config);
    into_http_response(contain(&state.context, request).await)
}

/// Builds the canonical request from the transport request.
pub(crate) fn canonical_request(
    parts: &Parts,
    body: &[u8],
    config: &MediatorConfig,
) -> MediatorHttpRequest {
    let scheme = parts.uri.scheme_str().unwrap_or(if config.network.tls.is_some() {
        "https"
    } else {
        "http"
    });

    let authority = parts.uri.authority().cloned().or_else(|| {
        parts
            .headers
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<Authority>().ok())
    });
    let (host, port) = match &authority {
        Some(authority) => (
            authority.host().to_string(),
            authority
                .port_u16()
                .unwrap_or(if scheme == "https" { 443 } else { 80 }),
        ),
        None => (config.network.host.clone(), config.network.port),
    };

    let mut request =
        MediatorHttpRequest::new(parts.method.as_str(), scheme, host, port, parts.uri.path());
    request.headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str(), value)))
        .collect::<Headers>();
    request.params = Query::<BTreeMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(params)| params)
        .unwrap_or_default();
    if !body.is_empty() {
        request.body = Some(String::from_utf8_lossy(body).into_owned());
    }
    request
}

/// Writes status, content type and body to the transport response.
pub(crate) fn into_http_response(response: MediatorHttpResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let content_type = response
        .content_type()
        .and_then(|value| HeaderValue::from_str(value).ok());

    let mut http_response = (status, Body::from(response.body.unwrap_or_default())).into_response();
    if let Some(content_type) = content_type {
        http_response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    http_response
}
