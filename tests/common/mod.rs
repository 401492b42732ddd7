#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicI64, AtomicUsize, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use url::Url;

use forward_auth::services::auth::{
    CookieSettings, DecisionEngine, LoginSettings, ProviderTokens, SameSite, SessionClaims,
    parse_applications,
};
use forward_auth::services::claims::{ClaimsValidator, Identity};
use forward_auth::services::clock::Clock;
use forward_auth::services::policy::PolicyEngine;
use forward_auth::services::provider::{
    ClientCredentials, ProviderClient, ProviderError, TokenResponse,
};
use forward_auth::services::token::{SigningKey, StaticKey, encode};

pub const NOW: i64 = 1_700_000_000;
pub const ISSUER: &str = "https://idp.example.com/";
pub const CLIENT_ID: &str = "client-1";
pub const API_AUDIENCE: &str = "https://api.example.com";
pub const SESSION_SECRET: &[u8] = b"session-secret-for-integration-tests!";
pub const PROVIDER_SECRET: &[u8] = b"provider-secret-for-integration-tests";
pub const SESSION_COOKIE: &str = "forward_auth";
pub const NONCE_COOKIE: &str = "forward_auth_nonce";

pub const RULES: &str = r#"[
    {"name": "public", "path": "/public", "action": "allow"},
    {"name": "admin", "path": "/admin", "action": "authenticate",
     "require": [{"claim": "groups", "value": "admin"}]},
    {"name": "blocked", "path": "/blocked", "action": "deny"},
    {"name": "default", "action": "authenticate"}
]"#;

pub struct TestClock(AtomicI64);

impl TestClock {
    pub fn at(timestamp: i64) -> Self {
        Self(AtomicI64::new(timestamp))
    }

    pub fn advance(&self, seconds: i64) {
        self.0.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0.load(Ordering::SeqCst), 0).unwrap()
    }
}

/// What the engine sent to the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub redirect_uri: String,
    /// Set when an application overrides the client.
    pub client_id: Option<String>,
}

/// Answers every code exchange with the same scripted result.
pub struct ScriptedProvider {
    result: Mutex<Result<TokenResponse, ProviderError>>,
    calls: AtomicUsize,
    last: Mutex<Option<Exchange>>,
}

impl ScriptedProvider {
    pub fn returning(result: Result<TokenResponse, ProviderError>) -> Self {
        Self {
            result: Mutex::new(result),
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn last_exchange(&self) -> Option<Exchange> {
        self.last.lock().unwrap().clone()
    }

    pub fn set(&self, result: Result<TokenResponse, ProviderError>) {
        *self.result.lock().unwrap() = result;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn exchange_code(
        &self,
        _: &str,
        redirect_uri: &str,
        client: Option<&ClientCredentials>,
    ) -> Result<TokenResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(Exchange {
            redirect_uri: redirect_uri.to_string(),
            client_id: client.map(|c| c.client_id.clone()),
        });
        self.result.lock().unwrap().clone()
    }
}

pub fn tokens(id_token: Option<String>, access_token: &str) -> TokenResponse {
    TokenResponse {
        access_token: access_token.to_string(),
        id_token,
        token_type: Some("Bearer".to_string()),
        expires_in: Some(3600),
        scope: Some("openid email".to_string()),
    }
}

/// Sign provider claims the way the identity provider would.
pub fn provider_token(claims: &Value) -> String {
    provider_token_with(Algorithm::HS256, PROVIDER_SECRET, claims)
}

pub fn provider_token_with(alg: Algorithm, secret: &[u8], claims: &Value) -> String {
    jsonwebtoken::encode(&Header::new(alg), claims, &EncodingKey::from_secret(secret)).unwrap()
}

pub fn id_token_claims(sub: &str, nonce: &str, groups: &[&str]) -> Value {
    json!({
        "iss": ISSUER,
        "aud": CLIENT_ID,
        "sub": sub,
        "iat": NOW,
        "exp": NOW + 600,
        "nonce": nonce,
        "email": format!("{sub}@example.com"),
        "groups": groups,
        "picture": "https://example.com/p.png",
    })
}

pub fn access_token_claims(sub: &str, groups: &[&str]) -> Value {
    json!({
        "iss": ISSUER,
        "aud": [API_AUDIENCE, "https://idp.example.com/userinfo"],
        "sub": sub,
        "iat": NOW,
        "exp": NOW + 600,
        "groups": groups,
        "scope": "openid read:reports",
    })
}

pub fn session_key() -> SigningKey {
    SigningKey::hmac(Algorithm::HS256, SESSION_SECRET).unwrap()
}

/// A session cookie value minted at `issued_at` that lives `ttl`.
pub fn session_cookie(identity: Identity, issued_at: i64, ttl: Duration) -> String {
    let claims = SessionClaims {
        jti: "test-session".to_string(),
        identity,
    };
    encode(&claims, &session_key(), ttl, issued_at).unwrap()
}

pub fn cookie_settings() -> CookieSettings {
    CookieSettings {
        session_name: SESSION_COOKIE.into(),
        nonce_name: NONCE_COOKIE.into(),
        domain: Some(".example.com".into()),
        secure: true,
        same_site: SameSite::Lax,
        session_ttl: Duration::from_secs(3600),
        nonce_ttl: Duration::from_secs(300),
    }
}

pub fn login_settings() -> LoginSettings {
    LoginSettings {
        authorize_endpoint: Url::parse("https://idp.example.com/authorize").unwrap(),
        redirect_uri: Url::parse("https://auth.example.com/signin").unwrap(),
        client_id: CLIENT_ID.into(),
        scope: "openid email profile".into(),
        audience: Some(API_AUDIENCE.into()),
        logout_endpoint: Some(Url::parse("https://idp.example.com/v2/logout").unwrap()),
        logout_return_to: Some("https://app.example.com/".into()),
        session_ttl: Duration::from_secs(3600),
        state_ttl: Duration::from_secs(300),
        session_claims: vec!["email".into()],
    }
}

pub struct Harness {
    pub engine: Arc<DecisionEngine>,
    pub provider: Arc<ScriptedProvider>,
    pub clock: Arc<TestClock>,
}

pub fn harness() -> Harness {
    harness_with_rules(RULES)
}

pub fn harness_with_rules(rules: &str) -> Harness {
    harness_with_applications(rules, "[]")
}

/// A second application with its own client, callback and cookie domain.
pub const GRAFANA_HOST: &str = "grafana.example.com";
pub const GRAFANA_CLIENT_ID: &str = "grafana";

pub const APPLICATIONS: &str = r#"[
    {"host": "grafana.example.com", "client_id": "grafana", "client_secret": "grafana-secret",
     "redirect_uri": "https://grafana.example.com/oauth2/signin",
     "cookie_domain": "grafana.example.com"}
]"#;

pub fn harness_with_applications(rules: &str, applications: &str) -> Harness {
    let provider = Arc::new(ScriptedProvider::returning(Err(ProviderError::Network(
        "not scripted".into(),
    ))));
    let clock = Arc::new(TestClock::at(NOW));

    let validator = |aud: &str| ClaimsValidator::new(ISSUER, aud, Algorithm::HS256, 10);
    let provider_key = SigningKey::hmac(Algorithm::HS256, PROVIDER_SECRET).unwrap();

    let engine = DecisionEngine::new(
        login_settings(),
        cookie_settings(),
        session_key(),
        PolicyEngine::from_json(rules).unwrap(),
        ProviderTokens {
            id_token: validator(CLIENT_ID),
            access_token: validator(API_AUDIENCE),
            keys: Arc::new(StaticKey::new(provider_key.verification_key().clone())),
        },
        provider.clone(),
        clock.clone(),
    )
    .with_applications(&parse_applications(applications).unwrap());

    Harness {
        engine: Arc::new(engine),
        provider,
        clock,
    }
}
