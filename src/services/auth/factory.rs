/// Factory: build the `DecisionEngine` and its collaborators from `Config`.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::config::{Config, ProviderKeySource, SessionSigning};
use crate::services::auth::cookie::CookieSettings;
use crate::services::auth::engine::{DecisionEngine, LoginSettings, ProviderTokens};
use crate::services::claims::ClaimsValidator;
use crate::services::clock::{Clock, SystemClock};
use crate::services::policy::PolicyEngine;
use crate::services::provider::{
    ClientCredentials, HttpProviderClient, JwksCache, ProviderEndpoints,
};
use crate::services::token::{SigningKey, StaticKey, VerificationKey, VerificationKeys};

pub struct AuthComponents {
    pub engine: Arc<DecisionEngine>,
    /// Present when keys come from a JWKS endpoint; the caller owns the refresh task.
    pub jwks: Option<Arc<JwksCache>>,
}

pub fn build_decision_engine(config: &Config) -> anyhow::Result<AuthComponents> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let session_key = match &config.session_signing {
        SessionSigning::Hmac { alg, secret } => SigningKey::hmac(*alg, secret.as_bytes()),
        SessionSigning::Ed25519 {
            private_pem,
            public_pem,
        } => SigningKey::ed25519_pem(private_pem, public_pem),
    }
    .context("session signing key")?;

    let policy = PolicyEngine::from_json(&config.policy_rules_json).context("policy rules")?;

    let provider = Arc::new(
        HttpProviderClient::new(
            ProviderEndpoints {
                token_endpoint: config.token_endpoint.to_string(),
                jwks_uri: match &config.provider_keys {
                    ProviderKeySource::Jwks(uri) => Some(uri.to_string()),
                    ProviderKeySource::Pem(_) => None,
                },
                client: ClientCredentials {
                    client_id: config.client_id.clone(),
                    client_secret: config.client_secret.clone(),
                },
                algorithm: config.provider_token_alg,
            },
            Duration::from_secs(config.provider_timeout_seconds),
        )
        .context("provider http client")?,
    );

    let (keys, jwks) = match &config.provider_keys {
        ProviderKeySource::Jwks(_) => {
            let cache = Arc::new(JwksCache::new(
                provider.clone(),
                clock.clone(),
                Duration::from_secs(config.jwks_cache_ttl_seconds),
            ));
            let keys: Arc<dyn VerificationKeys> = cache.clone();
            (keys, Some(cache))
        }
        ProviderKeySource::Pem(pem) => {
            let key = VerificationKey::from_pem(config.provider_token_alg, pem)
                .context("PROVIDER_PUBLIC_KEY_PEM")?;
            let keys: Arc<dyn VerificationKeys> = Arc::new(StaticKey::new(key));
            (keys, None)
        }
    };

    let validator = |audience: &str| {
        ClaimsValidator::new(
            config.issuer.clone(),
            audience,
            config.provider_token_alg,
            config.token_leeway_seconds,
        )
    };
    let tokens = ProviderTokens {
        id_token: validator(&config.client_id),
        access_token: validator(&config.audience),
        keys,
    };

    let session_ttl = Duration::from_secs(config.session_ttl_seconds);
    let state_ttl = Duration::from_secs(config.state_ttl_seconds);

    let login = LoginSettings {
        authorize_endpoint: config.authorize_endpoint.clone(),
        redirect_uri: config.redirect_uri.clone(),
        client_id: config.client_id.clone(),
        scope: config.scope.clone(),
        // only sent when an API audience differs from the client
        audience: (config.audience != config.client_id).then(|| config.audience.clone()),
        logout_endpoint: config.logout_endpoint.clone(),
        logout_return_to: config.logout_return_to.clone(),
        session_ttl,
        state_ttl,
        session_claims: config.session_claims.clone(),
    };

    let cookies = CookieSettings {
        session_name: config.session_cookie_name.clone(),
        nonce_name: config.nonce_cookie_name.clone(),
        domain: config.cookie_domain.clone(),
        secure: config.cookie_secure,
        same_site: config.cookie_same_site,
        session_ttl,
        nonce_ttl: state_ttl,
    };

    let engine = DecisionEngine::new(login, cookies, session_key, policy, tokens, provider, clock)
        .with_applications(&config.applications);

    Ok(AuthComponents {
        engine: Arc::new(engine),
        jwks,
    })
}
