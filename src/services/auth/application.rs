//! Per-host client registrations.
//!
//! A forwarded host may log in through its own provider client, with its own
//! redirect URI, cookie domain, session claims and logout target. Fields left
//! out inherit the service-wide defaults.
//!
//! ```json
//! [
//!   { "host": "grafana.example.com",
//!     "client_id": "grafana", "client_secret": "...",
//!     "redirect_uri": "https://grafana.example.com/oauth2/signin",
//!     "cookie_domain": "grafana.example.com",
//!     "claims": ["email", "groups"] }
//! ]
//! ```

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use super::{
    cookie::CookieSettings,
    engine::{LoginSettings, ProviderTokens},
};
use crate::services::{
    claims::ClaimsValidator, policy::rules::normalize_host, provider::ClientCredentials,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplicationError {
    #[error("application without host")]
    MissingHost,

    #[error("duplicate application host: {0}")]
    DuplicateHost(String),

    #[error("application {0}: invalid redirect_uri")]
    InvalidRedirect(String),

    #[error("application {0}: client_id and client_secret must be set together")]
    PartialCredentials(String),

    #[error("invalid application table: {0}")]
    Json(String),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawApplication {
    host: String,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    audience: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    redirect_uri: Option<String>,
    #[serde(default)]
    cookie_domain: Option<String>,
    #[serde(default)]
    claims: Vec<String>,
    #[serde(default)]
    return_to: Option<String>,
}

/// Overrides for one host. `None` and empty lists inherit the default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawApplication")]
pub struct ApplicationSettings {
    /// Normalized the way request hosts are.
    pub host: String,
    pub client: Option<ClientCredentials>,
    pub audience: Option<String>,
    pub scope: Option<String>,
    pub redirect_uri: Option<Url>,
    pub cookie_domain: Option<String>,
    pub claims: Vec<String>,
    pub return_to: Option<String>,
}

impl TryFrom<RawApplication> for ApplicationSettings {
    type Error = ApplicationError;

    fn try_from(raw: RawApplication) -> Result<Self, Self::Error> {
        let host = normalize_host(&raw.host);
        if host.is_empty() {
            return Err(ApplicationError::MissingHost);
        }

        let client = match (non_empty(raw.client_id), non_empty(raw.client_secret)) {
            (Some(client_id), Some(client_secret)) => Some(ClientCredentials {
                client_id,
                client_secret,
            }),
            (None, None) => None,
            _ => return Err(ApplicationError::PartialCredentials(host)),
        };

        let redirect_uri = non_empty(raw.redirect_uri)
            .map(|raw| Url::parse(&raw))
            .transpose()
            .map_err(|_| ApplicationError::InvalidRedirect(host.clone()))?;

        Ok(Self {
            client,
            audience: non_empty(raw.audience),
            scope: non_empty(raw.scope),
            redirect_uri,
            cookie_domain: non_empty(raw.cookie_domain),
            claims: raw
                .claims
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            return_to: non_empty(raw.return_to),
            host,
        })
    }
}

pub fn parse_applications(json: &str) -> Result<Vec<ApplicationSettings>, ApplicationError> {
    let applications: Vec<ApplicationSettings> =
        serde_json::from_str(json).map_err(|e| ApplicationError::Json(e.to_string()))?;

    for (i, app) in applications.iter().enumerate() {
        if applications[..i].iter().any(|other| other.host == app.host) {
            return Err(ApplicationError::DuplicateHost(app.host.clone()));
        }
    }
    Ok(applications)
}

/// Login parameters in effect for one host, defaults already applied.
#[derive(Clone)]
pub struct Application {
    /// The host it serves, or `default`.
    pub name: String,
    /// `None` logs in with the provider client's own registration.
    pub client: Option<ClientCredentials>,
    pub client_id: String,
    pub redirect_uri: Url,
    pub scope: String,
    /// Sent on the authorization request when it differs from the client.
    pub audience: Option<String>,
    pub return_to: Option<String>,
    pub cookies: CookieSettings,
    /// Claims copied into the session, policy claims included.
    pub session_claims: Vec<String>,
    pub id_token: ClaimsValidator,
    pub access_token: ClaimsValidator,
}

impl Application {
    pub(crate) fn defaults(
        login: &LoginSettings,
        cookies: CookieSettings,
        tokens: &ProviderTokens,
        policy_claims: &[String],
    ) -> Self {
        Self {
            name: "default".to_string(),
            client: None,
            client_id: login.client_id.clone(),
            redirect_uri: login.redirect_uri.clone(),
            scope: login.scope.clone(),
            audience: login.audience.clone(),
            return_to: login.logout_return_to.clone(),
            cookies,
            session_claims: merge_claims(&login.session_claims, policy_claims),
            id_token: tokens.id_token.clone(),
            access_token: tokens.access_token.clone(),
        }
    }

    /// This application with `settings` layered on top.
    pub(crate) fn overridden(
        &self,
        settings: &ApplicationSettings,
        policy_claims: &[String],
    ) -> Self {
        let client_id = settings
            .client
            .as_ref()
            .map_or_else(|| self.client_id.clone(), |c| c.client_id.clone());

        let (audience, access_token) = match &settings.audience {
            Some(audience) => (
                (*audience != client_id).then(|| audience.clone()),
                self.access_token.for_audience(audience.as_str()),
            ),
            None => (self.audience.clone(), self.access_token.clone()),
        };

        let mut cookies = self.cookies.clone();
        if let Some(domain) = &settings.cookie_domain {
            cookies.domain = Some(domain.clone());
        }

        let session_claims = if settings.claims.is_empty() {
            self.session_claims.clone()
        } else {
            merge_claims(&settings.claims, policy_claims)
        };

        Self {
            name: settings.host.clone(),
            client: settings.client.clone().or_else(|| self.client.clone()),
            id_token: self.id_token.for_audience(client_id.as_str()),
            client_id,
            redirect_uri: settings
                .redirect_uri
                .clone()
                .unwrap_or_else(|| self.redirect_uri.clone()),
            scope: settings.scope.clone().unwrap_or_else(|| self.scope.clone()),
            audience,
            return_to: settings.return_to.clone().or_else(|| self.return_to.clone()),
            cookies,
            session_claims,
            access_token,
        }
    }

    /// `host[:port]` the provider redirects back to.
    pub fn callback_authority(&self) -> Option<String> {
        let host = self.redirect_uri.host_str()?;
        Some(match self.redirect_uri.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }
}

fn merge_claims(base: &[String], policy_claims: &[String]) -> Vec<String> {
    let mut claims = base.to_vec();
    for name in policy_claims {
        if !claims.contains(name) {
            claims.push(name.clone());
        }
    }
    claims
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
