//! Authenticated connector for the management (core) API.
//!
//! Every call is preceded by an authentication challenge:
//!
//! 1. `GET /authenticate/{username}` returns `{ "salt": .., "ts": .. }`.
//! 2. `passhash = sha512(salt + password)`, hex encoded.
//! 3. `token = sha512(passhash + request_salt + now)`, hex encoded, where
//!    `request_salt` is a fresh UUID and `now` an RFC 3339 UTC timestamp.
//! 4. The call carries `auth-username`, `auth-ts`, `auth-salt` and
//!    `auth-token` headers.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use mediator_core::Headers;
use serde::Deserialize;
use sha2::{Digest, Sha512};
use tracing::debug;

use super::http::execute;
use super::{Connector, ConnectorError};
use crate::service::config::CoreApiConfig;
use crate::service::request::{MediatorHttpRequest, MediatorHttpResponse};

/// Response body of the authentication challenge.
#[derive(Debug, Deserialize)]
struct AuthChallenge {
    salt: String,
}

#[derive(Debug, Clone)]
pub struct CoreApiConnector {
    client: reqwest::Client,
    config: CoreApiConfig,
}

impl CoreApiConnector {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: CoreApiConfig) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.trust_self_signed)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    async fn authenticate(&self) -> Result<AuthChallenge, ConnectorError> {
        let url = format!(
            "{}://{}:{}/authenticate/{}",
            self.config.scheme, self.config.host, self.config.port, self.config.username
        );
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::Authentication(format!(
                "challenge for {} returned {status}",
                self.config.username
            )));
        }
        response
            .json::<AuthChallenge>()
            .await
            .map_err(|e| ConnectorError::Authentication(format!("unreadable challenge: {e}")))
    }
}

#[async_trait]
impl Connector for CoreApiConnector {
    async fn send(
        &self,
        mut request: MediatorHttpRequest,
    ) -> Result<MediatorHttpResponse, ConnectorError> {
        let challenge = self.authenticate().await?;
        let request_salt = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        debug!(username = %self.config.username, "authenticated with management API");

        let auth = auth_headers(
            &self.config.username,
            &self.config.password,
            &challenge.salt,
            &request_salt,
            &now,
        );
        request.headers.extend(auth.iter());
        execute(&self.client, &request).await
    }
}

fn sha512_hex(parts: &[&str]) -> String {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Authentication headers for one management API call.
pub(crate) fn auth_headers(
    username: &str,
    password: &str,
    challenge_salt: &str,
    request_salt: &str,
    now: &str,
) -> Headers {
    let passhash = sha512_hex(&[challenge_salt, password]);
    let token = sha512_hex(&[passhash.as_str(), request_salt, now]);

    [
        ("auth-username", username.to_string()),
        ("auth-ts", now.to_string()),
        ("auth-salt", request_salt.to_string()),
        ("auth-token", token),
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: &str = "2024-03-01T10:15:30.000Z";

    #[test]
    fn auth_headers_carry_identity_and_salt() {
        let headers = auth_headers("root@openhim.org", "secret", "abc", "req-salt", NOW);

        assert_eq!(headers.len(), 4);
        assert_eq!(headers.get("auth-username"), Some("root@openhim.org"));
        assert_eq!(headers.get("auth-ts"), Some(NOW));
        assert_eq!(headers.get("auth-salt"), Some("req-salt"));

        let token = headers.get("auth-token").unwrap();
        assert_eq!(token.len(), 128);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn token_chains_passhash_with_request_salt_and_time() {
        let headers = auth_headers("user", "secret", "abc", "req-salt", NOW);

        let passhash = sha512_hex(&["abc", "secret"]);
        let expected = sha512_hex(&[passhash.as_str(), "req-salt", NOW]);
        assert_eq!(headers.get("auth-token"), Some(expected.as_str()));
    }

    #[test]
    fn token_changes_with_every_input() {
        let base = auth_headers("user", "secret", "abc", "s1", NOW);
        let token = |h: &Headers| h.get("auth-token").map(str::to_string);

        assert_ne!(token(&base), token(&auth_headers("user", "other", "abc", "s1", NOW)));
        assert_ne!(token(&base), token(&auth_headers("user", "secret", "xyz", "s1", NOW)));
        assert_ne!(token(&base), token(&auth_headers("user", "secret", "abc", "s2", NOW)));
        assert_ne!(
            token(&base),
            token(&auth_headers("user", "secret", "abc", "s1", "2024-03-01T10:15:31.000Z"))
        );
    }

    #[test]
    fn sha512_of_empty_input_matches_known_digest() {
        assert!(sha512_hex(&[]).starts_with("cf83e1357eefb8bdf1542850d66d8007"));
    }

    #[test]
    fn builds_with_self_signed_trust() {
        let config = CoreApiConfig {
            trust_self_signed: true,
            ..CoreApiConfig::default()
        };
        assert!(CoreApiConnector::new(config).is_ok());
    }
}
