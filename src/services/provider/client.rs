//! HTTP side of the identity provider.
//!
//! Responsibility:
//! - Authorization-code exchange (one bounded POST, never retried)
//! - Signing-key (JWKS) download for the key cache

use std::{fmt, time::Duration};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, jwk::JwkSet};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::jwks::KeySet;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Network(String),

    #[error("provider request timed out")]
    Timeout,

    #[error("provider rejected the request: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(e.to_string())
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// A client registration at the provider.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// `client` replaces the configured registration for this exchange.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        client: Option<&ClientCredentials>,
    ) -> Result<TokenResponse, ProviderError>;
}

#[async_trait]
pub trait KeySetFetcher: Send + Sync {
    async fn fetch_signing_keys(&self) -> Result<KeySet, ProviderError>;
}

#[derive(Clone)]
pub struct ProviderEndpoints {
    pub token_endpoint: String,
    pub jwks_uri: Option<String>,
    pub client: ClientCredentials,
    /// Keys advertising another algorithm are skipped.
    pub algorithm: Algorithm,
}

#[derive(Clone)]
pub struct HttpProviderClient {
    http: reqwest::Client,
    endpoints: ProviderEndpoints,
}

impl HttpProviderClient {
    pub fn new(endpoints: ProviderEndpoints, timeout: Duration) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(2)))
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self { http, endpoints })
    }
}

impl fmt::Debug for HttpProviderClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProviderClient")
            .field("token_endpoint", &self.endpoints.token_endpoint)
            .field("jwks_uri", &self.endpoints.jwks_uri)
            .field("client", &self.endpoints.client)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        client: Option<&ClientCredentials>,
    ) -> Result<TokenResponse, ProviderError> {
        let client = client.unwrap_or(&self.endpoints.client);
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(&self.endpoints.token_endpoint)
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let reason = match serde_json::from_slice::<ErrorBody>(&body) {
                Ok(ErrorBody {
                    error,
                    error_description: Some(description),
                }) => format!("{error}: {description}"),
                Ok(ErrorBody { error, .. }) => error,
                Err(_) => format!("token endpoint returned {status}"),
            };
            warn!(%status, %reason, "token exchange rejected");
            return Err(ProviderError::Rejected(reason));
        }

        let tokens = serde_json::from_slice::<TokenResponse>(&body).map_err(|e| {
            warn!(error = ?e, "malformed token response");
            ProviderError::Rejected("malformed token response".to_string())
        })?;

        debug!(
            client_id = %client.client_id,
            has_id_token = tokens.id_token.is_some(),
            "token exchange succeeded"
        );
        Ok(tokens)
    }
}

#[async_trait]
impl KeySetFetcher for HttpProviderClient {
    async fn fetch_signing_keys(&self) -> Result<KeySet, ProviderError> {
        let uri = self
            .endpoints
            .jwks_uri
            .as_deref()
            .ok_or_else(|| ProviderError::Rejected("no jwks uri configured".to_string()))?;

        let response = self.http.get(uri).header(ACCEPT, "application/json").send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Rejected(format!(
                "jwks endpoint returned {status}"
            )));
        }

        let body = response.bytes().await?;
        let set: JwkSet = serde_json::from_slice(&body)
            .map_err(|e| ProviderError::Rejected(format!("malformed jwks: {e}")))?;

        Ok(KeySet::from_jwks(&set, self.endpoints.algorithm))
    }
}
