//! Per-request authentication state machine.
//!
//! Responsibility:
//! - Resolve evidence (session cookie, then bearer token) for a forwarded request
//! - Start the provider login for browsers that need one
//! - Finish the login on the provider callback and mint the session
//!
//! All state travels in cookies and the `state` parameter. The engine holds
//! only read-only configuration, so it is shared behind an `Arc`.

use std::{fmt, sync::Arc, time::Duration};

use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use super::{
    application::{Application, ApplicationSettings},
    context::{RequestContext, canonical_path},
    cookie::CookieSettings,
    decision::{Decision, DenyReason},
    nonce,
    session::{SessionClaims, StateClaims},
};
use crate::services::{
    claims::{ClaimsValidator, Identity},
    clock::Clock,
    policy::{PolicyEngine, PolicyOutcome, rules::normalize_host},
    provider::ProviderClient,
    token::{SigningKey, VerificationKeys, decode, encode},
};

/// Service-wide login settings. The client fields are the defaults that
/// per-host applications override.
#[derive(Debug, Clone)]
pub struct LoginSettings {
    pub authorize_endpoint: Url,
    /// Public URL of `/signin`.
    pub redirect_uri: Url,
    pub client_id: String,
    pub scope: String,
    pub audience: Option<String>,
    pub logout_endpoint: Option<Url>,
    pub logout_return_to: Option<String>,
    pub session_ttl: Duration,
    pub state_ttl: Duration,
    /// Claims copied from the provider token into the session cookie.
    pub session_claims: Vec<String>,
}

/// Validators and keys for tokens issued by the provider.
pub struct ProviderTokens {
    pub id_token: ClaimsValidator,
    pub access_token: ClaimsValidator,
    pub keys: Arc<dyn VerificationKeys>,
}

/// Query of the provider callback.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

enum Evidence {
    Absent,
    Valid(Identity),
    Invalid(DenyReason),
}

const AMBIGUOUS_PATH: &str = "request path is ambiguous";

pub struct DecisionEngine {
    login: LoginSettings,
    session_key: SigningKey,
    policy: PolicyEngine,
    keys: Arc<dyn VerificationKeys>,
    provider: Arc<dyn ProviderClient>,
    clock: Arc<dyn Clock>,
    default_app: Application,
    applications: Vec<Application>,
}

impl DecisionEngine {
    pub fn new(
        login: LoginSettings,
        cookies: CookieSettings,
        session_key: SigningKey,
        policy: PolicyEngine,
        tokens: ProviderTokens,
        provider: Arc<dyn ProviderClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        // sessions must carry whatever the rule table inspects
        let default_app =
            Application::defaults(&login, cookies, &tokens, &policy.referenced_claims());

        Self {
            login,
            session_key,
            policy,
            keys: tokens.keys,
            provider,
            clock,
            default_app,
            applications: Vec::new(),
        }
    }

    /// Register per-host overrides of the default application.
    pub fn with_applications(mut self, settings: &[ApplicationSettings]) -> Self {
        let policy_claims = self.policy.referenced_claims();
        self.applications = settings
            .iter()
            .map(|app| self.default_app.overridden(app, &policy_claims))
            .collect();
        self
    }

    /// The application serving `host`, or the default one.
    pub fn application(&self, host: &str) -> &Application {
        let host = normalize_host(host);
        self.applications
            .iter()
            .find(|app| app.name == host)
            .unwrap_or(&self.default_app)
    }

    /// Cookie attributes for responses to `host`.
    pub fn cookie_settings(&self, host: &str) -> &CookieSettings {
        &self.application(host).cookies
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Forward-auth check for one proxied request.
    pub fn authorize(&self, ctx: &RequestContext) -> Decision {
        let app = self.application(ctx.host());
        if is_callback(app, ctx) {
            debug!(url = %ctx.original_url(), "callback passes through");
            return Decision::Allow { identity: None };
        }

        let Some(path) = ctx.policy_path() else {
            return self.deny(DenyReason::PolicyDenied(AMBIGUOUS_PATH.to_string()));
        };

        let (identity, failure) = match self.resolve_evidence(app, ctx, path) {
            Evidence::Valid(identity) => (Some(identity), None),
            Evidence::Invalid(reason) => (None, Some(reason)),
            Evidence::Absent => (None, None),
        };

        match self
            .policy
            .evaluate(ctx.host(), path, ctx.method(), identity.as_ref())
        {
            PolicyOutcome::Allow => {
                debug!(
                    host = ctx.host(),
                    path,
                    sub = identity.as_ref().map(|i| i.sub.as_str()),
                    "request allowed"
                );
                Decision::Allow { identity }
            }
            PolicyOutcome::Deny(denial) => self.deny(DenyReason::PolicyDenied(denial.to_string())),
            PolicyOutcome::RequireAuth => {
                let upstream = failure.as_ref().is_some_and(DenyReason::is_upstream_failure);
                if ctx.is_api() || upstream {
                    return self.deny(failure.unwrap_or(DenyReason::Unauthenticated));
                }
                let stale_session = ctx.cookie(&app.cookies.session_name).is_some();
                self.begin_login(app, ctx, stale_session)
            }
        }
    }

    /// Provider callback: verify state, exchange the code, mint the session.
    pub async fn callback(&self, ctx: &RequestContext, params: &CallbackParams) -> Decision {
        match self.complete_login(self.application(ctx.host()), ctx, params).await {
            Ok(decision) => decision,
            Err(reason) => self.deny(reason),
        }
    }

    pub fn signout(&self, ctx: &RequestContext) -> Decision {
        let app = self.application(ctx.host());
        let target = match (&self.login.logout_endpoint, &app.return_to) {
            (Some(endpoint), return_to) => {
                let mut url = endpoint.clone();
                {
                    let mut query = url.query_pairs_mut();
                    query.append_pair("client_id", &app.client_id);
                    if let Some(return_to) = return_to {
                        query.append_pair("returnTo", return_to);
                    }
                }
                Some(url.to_string())
            }
            (None, Some(return_to)) => Some(return_to.clone()),
            (None, None) => None,
        };

        info!(application = %app.name, redirect = target.is_some(), "signing out");
        Decision::RedirectToLogin {
            target,
            clear_session: true,
        }
    }

    /// Identity behind the session cookie, if any.
    pub fn userinfo(&self, ctx: &RequestContext) -> Result<Identity, DenyReason> {
        let app = self.application(ctx.host());
        let value = ctx
            .cookie(&app.cookies.session_name)
            .ok_or(DenyReason::Unauthenticated)?;
        self.open_session(value)
    }

    fn resolve_evidence(&self, app: &Application, ctx: &RequestContext, path: &str) -> Evidence {
        let mut failure = None;

        if let Some(value) = ctx.cookie(&app.cookies.session_name) {
            match self.open_session(value) {
                Ok(identity) => return Evidence::Valid(identity),
                Err(reason) => {
                    debug!(code = reason.code(), "session cookie rejected");
                    failure = Some(reason);
                }
            }
        }

        if let Some(token) = ctx.bearer_token() {
            let required = self.policy.required_claims(ctx.host(), path, ctx.method());
            return match app.access_token.validate(
                token,
                self.keys.as_ref(),
                &required,
                self.clock.timestamp(),
            ) {
                Ok(claims) => Evidence::Valid(claims.into_full_identity()),
                Err(e) => {
                    debug!(error = %e, "bearer token rejected");
                    Evidence::Invalid(e.into())
                }
            };
        }

        failure.map_or(Evidence::Absent, Evidence::Invalid)
    }

    fn open_session(&self, value: &str) -> Result<Identity, DenyReason> {
        decode::<SessionClaims>(
            value,
            self.session_key.verification_key(),
            self.clock.timestamp(),
        )
        .map(|decoded| decoded.claims.identity)
        .map_err(DenyReason::from)
    }

    fn begin_login(
        &self,
        app: &Application,
        ctx: &RequestContext,
        clear_session: bool,
    ) -> Decision {
        let nonce = match nonce::generate() {
            Ok(nonce) => nonce,
            Err(e) => {
                error!(error = ?e, "failed to generate login nonce");
                return self.deny(DenyReason::Internal);
            }
        };

        let claims = StateClaims {
            url: ctx.original_url(),
            method: ctx.method().to_string(),
            nonce: nonce.digest.clone(),
        };
        let state = match encode(
            &claims,
            &self.session_key,
            self.login.state_ttl,
            self.clock.timestamp(),
        ) {
            Ok(state) => state,
            Err(e) => return self.deny(e.into()),
        };

        debug!(
            application = %app.name,
            url = %claims.url,
            clear_session,
            "redirecting to identity provider"
        );
        Decision::RedirectToProvider {
            authorization_url: self.authorization_url(app, &state, &nonce.digest),
            state,
            nonce: nonce.raw,
            clear_session,
        }
    }

    fn authorization_url(&self, app: &Application, state: &str, nonce: &str) -> String {
        let mut url = self.login.authorize_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &app.client_id)
                .append_pair("redirect_uri", app.redirect_uri.as_str())
                .append_pair("scope", &app.scope)
                .append_pair("state", state)
                .append_pair("nonce", nonce);
            if let Some(audience) = &app.audience {
                query.append_pair("audience", audience);
            }
        }
        url.to_string()
    }

    async fn complete_login(
        &self,
        app: &Application,
        ctx: &RequestContext,
        params: &CallbackParams,
    ) -> Result<Decision, DenyReason> {
        if let Some(error) = non_empty(&params.error) {
            let detail = match non_empty(&params.error_description) {
                Some(description) => format!("{error}: {description}"),
                None => error.to_string(),
            };
            return Err(DenyReason::ProviderRejected(detail));
        }

        let code = non_empty(&params.code)
            .ok_or_else(|| DenyReason::InvalidCallback("missing code".to_string()))?;
        let state_token = non_empty(&params.state)
            .ok_or_else(|| DenyReason::InvalidCallback("missing state".to_string()))?;

        // state and browser binding are settled before the provider is contacted
        let state = decode::<StateClaims>(
            state_token,
            self.session_key.verification_key(),
            self.clock.timestamp(),
        )
        .map_err(|e| DenyReason::StateMismatch(e.to_string()))?
        .claims;

        let raw_nonce = ctx
            .cookie(&app.cookies.nonce_name)
            .ok_or_else(|| DenyReason::StateMismatch("nonce cookie missing".to_string()))?;
        if !nonce::verify(raw_nonce, &state.nonce) {
            return Err(DenyReason::StateMismatch(
                "nonce cookie does not match".to_string(),
            ));
        }

        let target = Url::parse(&state.url)
            .map_err(|_| DenyReason::StateMismatch("state carries an invalid url".to_string()))?;
        let host = target.host_str().unwrap_or_default();
        let path = canonical_path(target.path())
            .ok_or_else(|| DenyReason::PolicyDenied(AMBIGUOUS_PATH.to_string()))?;

        let tokens = self
            .provider
            .exchange_code(code, app.redirect_uri.as_str(), app.client.as_ref())
            .await?;

        let required = self.policy.required_claims(host, &path, &state.method);
        let now = self.clock.timestamp();
        let keys = self.keys.as_ref();
        let claims = match tokens.id_token.as_deref() {
            Some(id_token) => app.id_token.validate(id_token, keys, &required, now)?,
            None => app
                .access_token
                .validate(&tokens.access_token, keys, &required, now)?,
        };

        if let Some(token_nonce) = claims.nonce()
            && token_nonce != state.nonce
        {
            return Err(DenyReason::StateMismatch(
                "id token nonce does not match".to_string(),
            ));
        }

        let identity = claims.into_identity(&app.session_claims);
        match self
            .policy
            .evaluate(host, &path, &state.method, Some(&identity))
        {
            PolicyOutcome::Allow => {}
            PolicyOutcome::Deny(denial) => {
                return Err(DenyReason::PolicyDenied(denial.to_string()));
            }
            PolicyOutcome::RequireAuth => return Err(DenyReason::Unauthenticated),
        }

        let sub = identity.sub.clone();
        let session = SessionClaims {
            jti: Uuid::new_v4().to_string(),
            identity,
        };
        let cookie = encode(&session, &self.session_key, self.login.session_ttl, now)?;

        info!(%sub, application = %app.name, url = %state.url, "login completed");
        Ok(Decision::SetSessionCookie {
            cookie,
            redirect_to: state.url,
        })
    }

    fn deny(&self, reason: DenyReason) -> Decision {
        if reason.is_upstream_failure() || reason == DenyReason::Internal {
            error!(code = reason.code(), %reason, "request denied");
        } else {
            warn!(code = reason.code(), %reason, "request denied");
        }
        Decision::Deny(reason)
    }
}

impl fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("login", &self.login)
            .field("session_key", &self.session_key)
            .field("rules", &self.policy.rules().len())
            .field("applications", &self.applications.len())
            .finish_non_exhaustive()
    }
}

/// The provider redirect lands on the exact path of the application's
/// redirect URI.
fn is_callback(app: &Application, ctx: &RequestContext) -> bool {
    app.callback_authority()
        .is_some_and(|authority| ctx.host().eq_ignore_ascii_case(&authority))
        && ctx.path() == app.redirect_uri.path()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use jsonwebtoken::Algorithm;

    use super::*;
    use crate::services::{
        auth::cookie::SameSite,
        auth::application::parse_applications,
        provider::{ClientCredentials, ProviderError, TokenResponse},
        token::StaticKey,
    };

    const SECRET: &[u8] = b"engine-unit-test-secret-0123456789ab";

    struct Frozen;

    impl Clock for Frozen {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp(1_700_000_000, 0).unwrap()
        }
    }

    struct Unreachable;

    #[async_trait]
    impl ProviderClient for Unreachable {
        async fn exchange_code(
            &self,
            _: &str,
            _: &str,
            _: Option<&ClientCredentials>,
        ) -> Result<TokenResponse, ProviderError> {
            Err(ProviderError::Network("unreachable".into()))
        }
    }

    fn login(logout: Option<&str>, return_to: Option<&str>) -> LoginSettings {
        LoginSettings {
            authorize_endpoint: Url::parse("https://idp.example.com/authorize").unwrap(),
            redirect_uri: Url::parse("https://auth.example.com/signin").unwrap(),
            client_id: "client-1".into(),
            scope: "openid email".into(),
            audience: Some("https://api.example.com".into()),
            logout_endpoint: logout.map(|l| Url::parse(l).unwrap()),
            logout_return_to: return_to.map(str::to_string),
            session_ttl: Duration::from_secs(3600),
            state_ttl: Duration::from_secs(300),
            session_claims: vec!["email".into()],
        }
    }

    fn engine(login: LoginSettings) -> DecisionEngine {
        let key = SigningKey::hmac(Algorithm::HS256, SECRET).unwrap();
        let validator = |aud: &str| {
            ClaimsValidator::new("https://idp.example.com/", aud, Algorithm::HS256, 10)
        };
        DecisionEngine::new(
            login,
            CookieSettings {
                session_name: "forward_auth".into(),
                nonce_name: "forward_auth_nonce".into(),
                domain: None,
                secure: true,
                same_site: SameSite::Lax,
                session_ttl: Duration::from_secs(3600),
                nonce_ttl: Duration::from_secs(300),
            },
            key.clone(),
            PolicyEngine::from_json(
                r#"[{"path": "/admin", "action": "authenticate",
                     "require": [{"claim": "groups", "value": "admin"}]},
                    {"action": "authenticate"}]"#,
            )
            .unwrap(),
            ProviderTokens {
                id_token: validator("client-1"),
                access_token: validator("https://api.example.com"),
                keys: Arc::new(StaticKey::new(key.verification_key().clone())),
            },
            Arc::new(Unreachable),
            Arc::new(Frozen),
        )
    }

    fn signout_ctx() -> RequestContext {
        RequestContext::new("GET", "https", "auth.example.com", "/signout")
    }

    fn query(url: &str) -> std::collections::HashMap<String, String> {
        Url::parse(url).unwrap().query_pairs().into_owned().collect()
    }

    const APPLICATIONS: &str = r#"[
        {"host": "grafana.example.com", "client_id": "grafana", "client_secret": "g",
         "redirect_uri": "https://grafana.example.com/oauth2/signin",
         "cookie_domain": "grafana.example.com", "scope": "openid",
         "claims": ["name"], "return_to": "https://grafana.example.com/"}
    ]"#;

    fn with_apps(login: LoginSettings) -> DecisionEngine {
        engine(login).with_applications(&parse_applications(APPLICATIONS).unwrap())
    }

    #[test]
    fn session_claims_include_policy_claims() {
        let e = engine(login(None, None));
        assert_eq!(e.default_app.session_claims, vec!["email", "groups"]);
    }

    #[test]
    fn callback_url_passes_through() {
        let e = engine(login(None, None));
        let ctx = RequestContext::new("GET", "https", "auth.example.com", "/signin?code=x&state=y");
        assert_eq!(e.authorize(&ctx), Decision::Allow { identity: None });

        let ctx = RequestContext::new("GET", "https", "auth.example.com", "/signinx");
        assert!(!e.authorize(&ctx).is_allow());
    }

    #[test]
    fn authorization_url_carries_login_parameters() {
        let e = engine(login(None, None));
        let ctx = RequestContext::new("GET", "https", "app.example.com", "/page");
        let Decision::RedirectToProvider {
            authorization_url,
            state,
            nonce,
            clear_session,
        } = e.authorize(&ctx)
        else {
            panic!("expected redirect");
        };

        assert!(!clear_session);
        let query = query(&authorization_url);
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "client-1");
        assert_eq!(query["redirect_uri"], "https://auth.example.com/signin");
        assert_eq!(query["scope"], "openid email");
        assert_eq!(query["audience"], "https://api.example.com");
        assert_eq!(query["state"], state);
        assert_eq!(query["nonce"], nonce::digest(&nonce));
    }

    #[test]
    fn signout_targets() {
        let with_logout = engine(login(
            Some("https://idp.example.com/v2/logout"),
            Some("https://app.example.com/"),
        ));
        let Decision::RedirectToLogin {
            target: Some(target),
            clear_session: true,
        } = with_logout.signout(&signout_ctx())
        else {
            panic!("expected redirect");
        };
        assert_eq!(
            target,
            "https://idp.example.com/v2/logout?client_id=client-1&returnTo=https%3A%2F%2Fapp.example.com%2F"
        );

        let return_only = engine(login(None, Some("https://app.example.com/bye")));
        assert_eq!(
            return_only.signout(&signout_ctx()),
            Decision::RedirectToLogin {
                target: Some("https://app.example.com/bye".into()),
                clear_session: true
            }
        );

        assert_eq!(
            engine(login(None, None)).signout(&signout_ctx()),
            Decision::RedirectToLogin {
                target: None,
                clear_session: true
            }
        );
    }

    #[tokio::test]
    async fn callback_requires_code_and_state() {
        let e = engine(login(None, None));
        let ctx = RequestContext::new("GET", "https", "auth.example.com", "/signin");

        let decision = e
            .callback(
                &ctx,
                &CallbackParams {
                    state: Some("s".into()),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(
            decision,
            Decision::Deny(DenyReason::InvalidCallback("missing code".into()))
        );

        let decision = e
            .callback(
                &ctx,
                &CallbackParams {
                    error: Some("access_denied".into()),
                    error_description: Some("user cancelled".into()),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(
            decision,
            Decision::Deny(DenyReason::ProviderRejected(
                "access_denied: user cancelled".into()
            ))
        );
    }

    #[test]
    fn userinfo_without_cookie_is_unauthenticated() {
        let e = engine(login(None, None));
        let ctx = RequestContext::new("GET", "https", "auth.example.com", "/userinfo");
        assert_eq!(e.userinfo(&ctx).unwrap_err(), DenyReason::Unauthenticated);
    }

    #[test]
    fn application_overrides_login_parameters() {
        let e = with_apps(login(None, None));

        let ctx = RequestContext::new("GET", "https", "Grafana.example.com:443", "/d/1");
        let Decision::RedirectToProvider {
            authorization_url, ..
        } = e.authorize(&ctx)
        else {
            panic!("expected redirect");
        };
        let query = query(&authorization_url);
        assert_eq!(query["client_id"], "grafana");
        assert_eq!(query["redirect_uri"], "https://grafana.example.com/oauth2/signin");
        assert_eq!(query["scope"], "openid");
        assert_eq!(query["audience"], "https://api.example.com");

        let app = e.application("grafana.example.com");
        assert_eq!(app.id_token.audience(), "grafana");
        assert_eq!(app.access_token.audience(), "https://api.example.com");
        assert_eq!(app.session_claims, vec!["name", "groups"]);
        assert_eq!(
            e.cookie_settings("grafana.example.com").domain.as_deref(),
            Some("grafana.example.com")
        );
        assert_eq!(e.cookie_settings("other.example.com").domain, None);
        assert_eq!(e.application("other.example.com").client_id, "client-1");
    }

    #[test]
    fn application_callback_passes_through() {
        let e = with_apps(login(None, None));
        let ctx = RequestContext::new(
            "GET",
            "https",
            "grafana.example.com",
            "/oauth2/signin?code=x&state=y",
        );
        assert_eq!(e.authorize(&ctx), Decision::Allow { identity: None });

        let ctx = RequestContext::new("GET", "https", "grafana.example.com", "/signin");
        assert!(!e.authorize(&ctx).is_allow());
    }

    #[test]
    fn application_signout_returns_to_its_host() {
        let e = with_apps(login(
            Some("https://idp.example.com/v2/logout"),
            Some("https://app.example.com/"),
        ));
        let ctx = RequestContext::new("GET", "https", "grafana.example.com", "/signout");
        let Decision::RedirectToLogin {
            target: Some(target),
            ..
        } = e.signout(&ctx)
        else {
            panic!("expected redirect");
        };
        let query = query(&target);
        assert_eq!(query["client_id"], "grafana");
        assert_eq!(query["returnTo"], "https://grafana.example.com/");
    }

    #[test]
    fn ambiguous_path_is_denied() {
        let e = engine(login(None, None));
        let ctx = RequestContext::new("GET", "https", "app.example.com", "/public/..%2Fadmin");
        assert_eq!(
            e.authorize(&ctx),
            Decision::Deny(DenyReason::PolicyDenied(AMBIGUOUS_PATH.into()))
        );
    }
}
