//! Generic HTTP connector backed by `reqwest`.

use async_trait::async_trait;
use mediator_core::Headers;
use reqwest::{Method, Url};
use tracing::debug;

use super::{Connector, ConnectorError};
use crate::service::request::{MediatorHttpRequest, MediatorHttpResponse};

#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, ConnectorError> {
        Ok(Self::with_client(reqwest::Client::builder().build()?))
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn send(
        &self,
        request: MediatorHttpRequest,
    ) -> Result<MediatorHttpResponse, ConnectorError> {
        execute(&self.client, &request).await
    }
}

/// Builds the target URL from scheme, host, port, path and query parameters.
pub(crate) fn build_url(request: &MediatorHttpRequest) -> Result<Url, ConnectorError> {
    let base = format!(
        "{}://{}:{}{}",
        request.scheme, request.host, request.port, request.path
    );
    let mut url = Url::parse(&base)
        .map_err(|e| ConnectorError::InvalidRequest(format!("{base}: {e}")))?;
    if !request.params.is_empty() {
        url.query_pairs_mut().extend_pairs(&request.params);
    }
    Ok(url)
}

/// Sends `request` with `client` and collects the full response.
pub(crate) async fn execute(
    client: &reqwest::Client,
    request: &MediatorHttpRequest,
) -> Result<MediatorHttpResponse, ConnectorError> {
    let method = Method::from_bytes(request.method.as_bytes())
        .map_err(|_| ConnectorError::InvalidRequest(format!("method {:?}", request.method)))?;
    let url = build_url(request)?;

    debug!(
        orchestration = request.orchestration.as_deref().unwrap_or("-"),
        %method,
        %url,
        "sending outbound request"
    );

    let mut builder = client.request(method, url);
    for (name, value) in request.headers.iter() {
        builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
        builder = builder.body(body.clone());
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let headers: Headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    let body = response.text().await?;

    Ok(MediatorHttpResponse {
        status,
        body: (!body.is_empty()).then_some(body),
        headers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_includes_port_path_and_params() {
        let request = MediatorHttpRequest::new("GET", "http", "localhost", 8080, "/fhir/Patient")
            .with_param("family", "smith")
            .with_param("_count", "10");

        let url = build_url(&request).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/fhir/Patient?_count=10&family=smith"
        );
    }

    #[test]
    fn malformed_host_is_invalid_request() {
        let request = MediatorHttpRequest::new("GET", "http", "bad host", 80, "/");
        assert!(matches!(
            build_url(&request),
            Err(ConnectorError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn malformed_method_is_rejected_before_sending() {
        let connector = HttpConnector::new().unwrap();
        let request = MediatorHttpRequest::new("GE T", "http", "localhost", 8080, "/");

        let err = connector.send(request).await.unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidRequest(_)));
    }
}
