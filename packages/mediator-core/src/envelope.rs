//! Response envelope returned to every caller of a mediator.
//!
//! A [`CoreResponse`] is accumulated while one request is processed and is
//! serialized to JSON exactly once, when the request is finalized. Its shape:
//!
//! ```text
//! {
//!   "x-mediator-urn": "<urn>",            (omitted when unknown)
//!   "status": "<descriptive status>",
//!   "response": { "status": 200, "headers": {..}, "body": ".." },
//!   "orchestrations": [ { "name": "..", "request": {..}, "response": {..} } ],
//!   "properties": { "<key>": "<value>" }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, Serializer};

use crate::headers::Headers;

/// MIME type of the envelope body sent back to the original caller.
///
/// Distinct from the inner `response.headers["Content-Type"]`, which
/// describes the wrapped body.
pub const OPENHIM_MIME_TYPE: &str = "application/json+openhim";

// ---------------------------------------------------------------------------
// TransactionStatus
// ---------------------------------------------------------------------------

/// Descriptive transaction status reported in the envelope's `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Accepted for asynchronous processing (202).
    Processing,
    /// 2xx with no failed orchestration.
    Successful,
    /// 1xx, 3xx or 4xx.
    Completed,
    /// 2xx, but at least one orchestration response was 4xx/5xx.
    #[serde(rename = "Completed with error(s)")]
    CompletedWithErrors,
    /// 5xx.
    Failed,
}

impl TransactionStatus {
    /// Wire spelling of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "Processing",
            Self::Successful => "Successful",
            Self::Completed => "Completed",
            Self::CompletedWithErrors => "Completed with error(s)",
            Self::Failed => "Failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// The single terminal response wrapped by the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// HTTP status of the wrapped response.
    pub status: u16,
    /// Headers describing the wrapped body.
    #[serde(default)]
    pub headers: Headers,
    /// Wrapped body, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub body: Option<String>,
}

impl Response {
    /// Creates a response with the given status, no headers and no body.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: None,
        }
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the `Content-Type` header of the wrapped body.
    #[must_use]
    pub fn with_content_type(mut self, mime_type: impl Into<String>) -> Self {
        self.headers.insert("Content-Type", mime_type);
        self
    }

    /// The `Content-Type` of the wrapped body, if set.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("Content-Type")
    }
}

// ---------------------------------------------------------------------------
// Orchestrations
// ---------------------------------------------------------------------------

/// Request half of an orchestration record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    pub path: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub querystring: Option<String>,
    #[serde(default)]
    pub headers: Headers,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub port: Option<u16>,
}

/// Response half of an orchestration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub body: Option<String>,
}

/// Record of one sub-step (typically an outbound call) taken while
/// producing a response. Kept for audit and tracing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orchestration {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request: Option<OrchestrationRequest>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response: Option<OrchestrationResponse>,
}

impl Orchestration {
    /// Orchestration with both request and response detail.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        request: OrchestrationRequest,
        response: OrchestrationResponse,
    ) -> Self {
        Self {
            name: name.into(),
            request: Some(request),
            response: Some(response),
        }
    }

    /// Orchestration carrying only a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            request: None,
            response: None,
        }
    }

    fn failed(&self) -> bool {
        self.response.as_ref().is_some_and(|r| r.status >= 400)
    }
}

// ---------------------------------------------------------------------------
// CoreResponse
// ---------------------------------------------------------------------------

/// Mutable accumulator for the response envelope of a single request.
///
/// Owned by exactly one request handler for the lifetime of one request and
/// never shared across requests. Invariants:
/// - the terminal response, once set, is never overwritten;
/// - orchestrations keep insertion order;
/// - once [`seal`](Self::seal)ed, orchestration and property updates are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CoreResponse {
    #[serde(rename = "x-mediator-urn", default)]
    urn: Option<String>,
    #[serde(default)]
    status: Option<TransactionStatus>,
    #[serde(default)]
    response: Option<Response>,
    #[serde(default)]
    orchestrations: Vec<Orchestration>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
    #[serde(skip)]
    sealed: bool,
}

impl CoreResponse {
    /// Creates an empty envelope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty envelope tagged with the mediator URN.
    #[must_use]
    pub fn with_urn(urn: impl Into<String>) -> Self {
        Self {
            urn: Some(urn.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn urn(&self) -> Option<&str> {
        self.urn.as_deref()
    }

    /// Explicit status, if one was set.
    #[must_use]
    pub fn status(&self) -> Option<TransactionStatus> {
        self.status
    }

    /// Overrides the derived descriptive status.
    pub fn set_status(&mut self, status: TransactionStatus) {
        self.status = Some(status);
    }

    /// The terminal response, if set.
    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// Sets the terminal response unless one is already present.
    ///
    /// Returns `true` if the response was stored. A second call is ignored,
    /// so callers never need to check first.
    pub fn set_response(&mut self, response: Response) -> bool {
        if self.response.is_some() {
            return false;
        }
        self.response = Some(response);
        true
    }

    /// Appends an orchestration record. Ignored once sealed.
    pub fn add_orchestration(&mut self, orchestration: Orchestration) {
        if !self.sealed {
            self.orchestrations.push(orchestration);
        }
    }

    #[must_use]
    pub fn orchestrations(&self) -> &[Orchestration] {
        &self.orchestrations
    }

    /// Sets a property, overwriting any existing value. Ignored once sealed.
    pub fn put_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if !self.sealed {
            self.properties.insert(name.into(), value.into());
        }
    }

    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Freezes orchestrations and properties ahead of serialization.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Status derived from the terminal response and orchestration outcomes.
    ///
    /// Defaults to `Successful` (the 200 class) when no response is known.
    #[must_use]
    pub fn descriptive_status(&self) -> TransactionStatus {
        let Some(response) = &self.response else {
            return TransactionStatus::Successful;
        };
        match response.status {
            202 => TransactionStatus::Processing,
            200..=299 => {
                if self.orchestrations.iter().any(Orchestration::failed) {
                    TransactionStatus::CompletedWithErrors
                } else {
                    TransactionStatus::Successful
                }
            }
            500..=599 => TransactionStatus::Failed,
            _ => TransactionStatus::Completed,
        }
    }

    /// Copy of this envelope with the terminal response replaced.
    ///
    /// Used to answer with a transient response (e.g. 202 Accepted) without
    /// touching the accumulated state.
    #[must_use]
    pub fn snapshot_with_response(&self, response: Response) -> Self {
        Self {
            response: Some(response),
            ..self.clone()
        }
    }

    /// Serializes the envelope to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error only if `serde_json` fails to write the output.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Borrowed wire view: the status is resolved at serialization time.
#[derive(Serialize)]
struct EnvelopeView<'a> {
    #[serde(rename = "x-mediator-urn", skip_serializing_if = "Option::is_none")]
    urn: Option<&'a str>,
    status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<&'a Response>,
    orchestrations: &'a [Orchestration],
    properties: &'a BTreeMap<String, String>,
}

impl Serialize for CoreResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        EnvelopeView {
            urn: self.urn.as_deref(),
            status: self.status.unwrap_or_else(|| self.descriptive_status()),
            response: self.response.as_ref(),
            orchestrations: &self.orchestrations,
            properties: &self.properties,
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn ok_response(body: &str) -> Response {
        Response::new(200)
            .with_body(body)
            .with_content_type("text/plain")
    }

    #[test]
    fn set_response_ignores_second_call() {
        let mut envelope = CoreResponse::new();
        assert!(envelope.set_response(ok_response("first")));
        assert!(!envelope.set_response(Response::new(500).with_body("second")));

        let response = envelope.response().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body.as_deref(), Some("first"));
    }

    #[test]
    fn serializes_expected_shape() {
        let mut envelope = CoreResponse::with_urn("urn:mediator:test");
        envelope.set_response(ok_response("basic-routing"));
        envelope.add_orchestration(Orchestration::named("lookup"));
        envelope.put_property("patient", "123");

        let json = envelope.to_json().unwrap();
        assert_eq!(
            json,
            concat!(
                r#"{"x-mediator-urn":"urn:mediator:test","status":"Successful","#,
                r#""response":{"status":200,"headers":{"Content-Type":"text/plain"},"body":"basic-routing"},"#,
                r#""orchestrations":[{"name":"lookup"}],"properties":{"patient":"123"}}"#
            )
        );
    }

    #[test]
    fn urn_and_response_omitted_when_unknown() {
        let json = CoreResponse::new().to_json().unwrap();
        assert_eq!(
            json,
            r#"{"status":"Successful","orchestrations":[],"properties":{}}"#
        );
    }

    #[test]
    fn explicit_status_wins_over_derived() {
        let mut envelope = CoreResponse::new();
        envelope.set_response(Response::new(500));
        envelope.set_status(TransactionStatus::Completed);

        let value: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(value["status"], "Completed");
    }

    #[test]
    fn descriptive_status_follows_response_class() {
        let cases = [
            (202, TransactionStatus::Processing),
            (200, TransactionStatus::Successful),
            (201, TransactionStatus::Successful),
            (302, TransactionStatus::Completed),
            (404, TransactionStatus::Completed),
            (500, TransactionStatus::Failed),
            (503, TransactionStatus::Failed),
        ];
        for (code, expected) in cases {
            let mut envelope = CoreResponse::new();
            envelope.set_response(Response::new(code));
            assert_eq!(envelope.descriptive_status(), expected, "status {code}");
        }
    }

    #[test]
    fn failed_orchestration_downgrades_success() {
        let mut envelope = CoreResponse::new();
        envelope.set_response(Response::new(200));
        envelope.add_orchestration(Orchestration::new(
            "upstream",
            OrchestrationRequest {
                path: "/fhir/Patient".into(),
                method: "GET".into(),
                ..OrchestrationRequest::default()
            },
            OrchestrationResponse {
                status: 502,
                headers: Headers::new(),
                body: None,
            },
        ));

        assert_eq!(
            envelope.descriptive_status(),
            TransactionStatus::CompletedWithErrors
        );
        assert!(envelope.to_json().unwrap().contains(r#""status":"Completed with error(s)""#));
    }

    #[test]
    fn sealed_envelope_ignores_updates() {
        let mut envelope = CoreResponse::new();
        envelope.add_orchestration(Orchestration::named("before"));
        envelope.seal();
        envelope.add_orchestration(Orchestration::named("after"));
        envelope.put_property("late", "value");

        assert!(envelope.is_sealed());
        assert_eq!(envelope.orchestrations().len(), 1);
        assert!(envelope.properties().is_empty());
    }

    #[test]
    fn snapshot_leaves_original_untouched() {
        let mut envelope = CoreResponse::new();
        envelope.put_property("k", "v");

        let accepted = envelope.snapshot_with_response(Response::new(202).with_body("Accepted request"));

        assert!(envelope.response().is_none());
        assert_eq!(accepted.response().unwrap().status, 202);
        assert_eq!(accepted.properties().get("k").map(String::as_str), Some("v"));
        assert_eq!(accepted.descriptive_status(), TransactionStatus::Processing);
    }

    #[test]
    fn parses_its_own_output() {
        let mut envelope = CoreResponse::with_urn("urn:x");
        envelope.set_response(ok_response("body"));
        envelope.put_property("a", "1");

        let parsed: CoreResponse = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(parsed.urn(), Some("urn:x"));
        assert_eq!(parsed.response(), envelope.response());
        assert_eq!(parsed.properties(), envelope.properties());
        assert_eq!(parsed.status(), Some(TransactionStatus::Successful));
    }

    proptest! {
        #[test]
        fn serialization_keeps_orchestration_order_and_is_deterministic(
            names in proptest::collection::vec("[a-z]{1,8}", 0..16),
            props in proptest::collection::vec(("[a-z]{1,4}", "[a-z0-9]{0,6}"), 0..16),
        ) {
            let mut envelope = CoreResponse::new();
            for name in &names {
                envelope.add_orchestration(Orchestration::named(name.clone()));
            }
            let mut expected = BTreeMap::new();
            for (k, v) in &props {
                envelope.put_property(k.clone(), v.clone());
                expected.insert(k.clone(), v.clone());
            }

            let first = envelope.to_json().unwrap();
            let second = envelope.clone().to_json().unwrap();
            prop_assert_eq!(&first, &second);

            let value: serde_json::Value = serde_json::from_str(&first).unwrap();
            let serialized: Vec<String> = value["orchestrations"]
                .as_array()
                .unwrap()
                .iter()
                .map(|o| o["name"].as_str().unwrap().to_string())
                .collect();
            prop_assert_eq!(serialized, names);

            let properties: BTreeMap<String, String> =
                serde_json::from_value(value["properties"].clone()).unwrap();
            prop_assert_eq!(properties, expected);
        }
    }
}
