/*
 * Responsibility
 * - Read settings from the environment (provider, session signing, cookies, policy)
 * - Validate them so a misconfigured service fails at startup, not per request
 */
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use jsonwebtoken::Algorithm;
use url::Url;

use crate::services::auth::application::{ApplicationSettings, parse_applications};
use crate::services::auth::cookie::{SameSite, parse_same_site};
use crate::services::token::keys::MIN_HMAC_SECRET_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn parse(raw: Option<&str>) -> Self {
        match raw.unwrap_or("development").to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Where provider verification keys come from.
#[derive(Clone)]
pub enum ProviderKeySource {
    Jwks(Url),
    Pem(String),
}

/// Key material for the service's own session/state tokens.
#[derive(Clone)]
pub enum SessionSigning {
    Hmac {
        alg: Algorithm,
        secret: String,
    },
    Ed25519 {
        private_pem: String,
        public_pem: String,
    },
}

#[derive(Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,
    pub request_timeout_seconds: u64,

    pub redirect_uri: Url,
    pub authorize_endpoint: Url,
    pub token_endpoint: Url,
    pub logout_endpoint: Option<Url>,
    pub logout_return_to: Option<String>,

    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    pub audience: String,
    pub scope: String,

    pub provider_keys: ProviderKeySource,
    pub provider_token_alg: Algorithm,
    pub provider_timeout_seconds: u64,
    pub jwks_refresh_interval_seconds: u64,
    pub jwks_cache_ttl_seconds: u64,
    pub token_leeway_seconds: u64,

    pub session_signing: SessionSigning,
    pub session_cookie_name: String,
    pub nonce_cookie_name: String,
    pub cookie_domain: Option<String>,
    pub cookie_secure: bool,
    pub cookie_same_site: SameSite,
    pub session_ttl_seconds: u64,
    pub state_ttl_seconds: u64,
    pub session_claims: Vec<String>,

    pub policy_rules_json: String,
    /// Per-host overrides; empty when every host uses the defaults.
    pub applications: Vec<ApplicationSettings>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));
        let number = |key: &str, default: u64| {
            get(key)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(default)
        };
        let url = |key: &'static str, raw: String| {
            Url::parse(&raw).map_err(|_| ConfigError::Invalid(key))
        };

        let port: u16 = get("PORT").and_then(|s| s.parse().ok()).unwrap_or(4181);
        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let app_env = AppEnv::parse(get("APP_ENV").as_deref());

        let redirect_uri = url("AUTH_REDIRECT_URI", required("AUTH_REDIRECT_URI")?)?;
        let authorize_endpoint = url(
            "PROVIDER_AUTHORIZE_ENDPOINT",
            required("PROVIDER_AUTHORIZE_ENDPOINT")?,
        )?;
        let token_endpoint = url("PROVIDER_TOKEN_ENDPOINT", required("PROVIDER_TOKEN_ENDPOINT")?)?;
        let logout_endpoint = get("PROVIDER_LOGOUT_ENDPOINT")
            .map(|raw| url("PROVIDER_LOGOUT_ENDPOINT", raw))
            .transpose()?;
        let logout_return_to = get("LOGOUT_RETURN_TO");

        let issuer = required("PROVIDER_ISSUER")?;
        let client_id = required("PROVIDER_CLIENT_ID")?;
        let client_secret = required("PROVIDER_CLIENT_SECRET")?;
        let audience = get("PROVIDER_AUDIENCE").unwrap_or_else(|| client_id.clone());
        let scope = get("PROVIDER_SCOPE").unwrap_or_else(|| "openid profile email".to_string());

        let provider_keys = match (get("PROVIDER_JWKS_URI"), get("PROVIDER_PUBLIC_KEY_PEM")) {
            (Some(uri), _) => ProviderKeySource::Jwks(url("PROVIDER_JWKS_URI", uri)?),
            (None, Some(pem)) => ProviderKeySource::Pem(pem.replace("\\n", "\n")),
            (None, None) => return Err(ConfigError::Missing("PROVIDER_JWKS_URI")),
        };
        let provider_token_alg = get("PROVIDER_TOKEN_ALG")
            .unwrap_or_else(|| "RS256".to_string())
            .parse::<Algorithm>()
            .map_err(|_| ConfigError::Invalid("PROVIDER_TOKEN_ALG"))?;

        let session_signing = session_signing(&get)?;

        let cookie_secure = match get("COOKIE_SECURE") {
            None => true,
            Some(v) => parse_bool(&v).ok_or(ConfigError::Invalid("COOKIE_SECURE"))?,
        };
        let cookie_same_site = match get("COOKIE_SAME_SITE") {
            None => SameSite::Lax,
            Some(v) => parse_same_site(&v).ok_or(ConfigError::Invalid("COOKIE_SAME_SITE"))?,
        };

        let session_claims = get("SESSION_CLAIMS")
            .unwrap_or_else(|| "email,name,groups,scope,permissions".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        let policy_rules_json = match (get("POLICY_RULES_FILE"), get("POLICY_RULES")) {
            (Some(path), _) => std::fs::read_to_string(path)
                .map_err(|_| ConfigError::Invalid("POLICY_RULES_FILE"))?,
            (None, Some(inline)) => inline,
            (None, None) => return Err(ConfigError::Missing("POLICY_RULES")),
        };

        let applications = match (get("APPLICATIONS_FILE"), get("APPLICATIONS")) {
            (Some(path), _) => std::fs::read_to_string(path)
                .map_err(|_| ConfigError::Invalid("APPLICATIONS_FILE"))
                .and_then(|json| {
                    parse_applications(&json).map_err(|_| ConfigError::Invalid("APPLICATIONS_FILE"))
                })?,
            (None, Some(inline)) => {
                parse_applications(&inline).map_err(|_| ConfigError::Invalid("APPLICATIONS"))?
            }
            (None, None) => Vec::new(),
        };

        let session_ttl_seconds = number("SESSION_TTL_SECONDS", 43_200);
        let state_ttl_seconds = number("STATE_TTL_SECONDS", 300);
        if session_ttl_seconds == 0 {
            return Err(ConfigError::Invalid("SESSION_TTL_SECONDS"));
        }
        if state_ttl_seconds == 0 {
            return Err(ConfigError::Invalid("STATE_TTL_SECONDS"));
        }

        // cached keys must outlive the gap between two refreshes
        let jwks_refresh_interval_seconds = number("JWKS_REFRESH_INTERVAL_SECONDS", 300).max(1);
        let jwks_cache_ttl_seconds = number("JWKS_CACHE_TTL_SECONDS", 3600);
        if jwks_cache_ttl_seconds <= jwks_refresh_interval_seconds {
            return Err(ConfigError::Invalid("JWKS_CACHE_TTL_SECONDS"));
        }

        Ok(Self {
            addr,
            app_env,
            request_timeout_seconds: number("REQUEST_TIMEOUT_SECONDS", 30),
            redirect_uri,
            authorize_endpoint,
            token_endpoint,
            logout_endpoint,
            logout_return_to,
            issuer,
            client_id,
            client_secret,
            audience,
            scope,
            provider_keys,
            provider_token_alg,
            provider_timeout_seconds: number("PROVIDER_TIMEOUT_SECONDS", 5).max(1),
            jwks_refresh_interval_seconds,
            jwks_cache_ttl_seconds,
            token_leeway_seconds: number("TOKEN_LEEWAY_SECONDS", 10),
            session_signing,
            session_cookie_name: get("SESSION_COOKIE_NAME")
                .unwrap_or_else(|| "forward_auth".to_string()),
            nonce_cookie_name: get("NONCE_COOKIE_NAME")
                .unwrap_or_else(|| "forward_auth_nonce".to_string()),
            cookie_domain: get("COOKIE_DOMAIN"),
            cookie_secure,
            cookie_same_site,
            session_ttl_seconds,
            state_ttl_seconds,
            session_claims,
            policy_rules_json,
            applications,
        })
    }
}

fn session_signing<G>(get: &G) -> Result<SessionSigning, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let alg = get("SESSION_SIGNING_ALG")
        .unwrap_or_else(|| "HS256".to_string())
        .parse::<Algorithm>()
        .map_err(|_| ConfigError::Invalid("SESSION_SIGNING_ALG"))?;

    match alg {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            let secret =
                get("SESSION_SIGNING_SECRET").ok_or(ConfigError::Missing("SESSION_SIGNING_SECRET"))?;
            if secret.len() < MIN_HMAC_SECRET_LEN {
                return Err(ConfigError::Invalid("SESSION_SIGNING_SECRET"));
            }
            Ok(SessionSigning::Hmac { alg, secret })
        }
        Algorithm::EdDSA => {
            let private_pem = get("SESSION_SIGNING_PRIVATE_KEY_PEM")
                .ok_or(ConfigError::Missing("SESSION_SIGNING_PRIVATE_KEY_PEM"))?
                .replace("\\n", "\n");
            let public_pem = get("SESSION_SIGNING_PUBLIC_KEY_PEM")
                .ok_or(ConfigError::Missing("SESSION_SIGNING_PUBLIC_KEY_PEM"))?
                .replace("\\n", "\n");
            Ok(SessionSigning::Ed25519 {
                private_pem,
                public_pem,
            })
        }
        _ => Err(ConfigError::Invalid("SESSION_SIGNING_ALG")),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn base() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("AUTH_REDIRECT_URI", "https://auth.example.com/signin"),
            ("PROVIDER_AUTHORIZE_ENDPOINT", "https://idp.example.com/authorize"),
            ("PROVIDER_TOKEN_ENDPOINT", "https://idp.example.com/oauth/token"),
            ("PROVIDER_ISSUER", "https://idp.example.com/"),
            ("PROVIDER_CLIENT_ID", "client-1"),
            ("PROVIDER_CLIENT_SECRET", "shh"),
            ("PROVIDER_JWKS_URI", "https://idp.example.com/.well-known/jwks.json"),
            ("SESSION_SIGNING_SECRET", "0123456789abcdef0123456789abcdef"),
            ("POLICY_RULES", r#"[{"action": "authenticate"}]"#),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply() {
        let config = load(&base()).unwrap();
        assert_eq!(config.addr.port(), 4181);
        assert_eq!(config.app_env, AppEnv::Development);
        assert_eq!(config.audience, "client-1");
        assert_eq!(config.scope, "openid profile email");
        assert_eq!(config.provider_token_alg, Algorithm::RS256);
        assert_eq!(config.token_leeway_seconds, 10);
        assert_eq!(config.session_cookie_name, "forward_auth");
        assert!(config.cookie_secure);
        assert_eq!(config.cookie_same_site, SameSite::Lax);
        assert_eq!(
            config.session_claims,
            vec!["email", "name", "groups", "scope", "permissions"]
        );
        assert!(matches!(
            config.session_signing,
            SessionSigning::Hmac {
                alg: Algorithm::HS256,
                ..
            }
        ));
    }

    #[test]
    fn missing_required_value() {
        let mut vars = base();
        vars.remove("PROVIDER_CLIENT_SECRET");
        assert_eq!(
            load(&vars).err(),
            Some(ConfigError::Missing("PROVIDER_CLIENT_SECRET"))
        );
    }

    #[test]
    fn provider_keys_need_a_source() {
        let mut vars = base();
        vars.remove("PROVIDER_JWKS_URI");
        assert_eq!(load(&vars).err(), Some(ConfigError::Missing("PROVIDER_JWKS_URI")));

        vars.insert("PROVIDER_PUBLIC_KEY_PEM", "-----BEGIN PUBLIC KEY-----\\nabc");
        let config = load(&vars).unwrap();
        assert!(matches!(
            config.provider_keys,
            ProviderKeySource::Pem(ref pem) if pem.contains('\n')
        ));
    }

    #[test]
    fn weak_session_secret_is_rejected() {
        let mut vars = base();
        vars.insert("SESSION_SIGNING_SECRET", "short");
        assert_eq!(
            load(&vars).err(),
            Some(ConfigError::Invalid("SESSION_SIGNING_SECRET"))
        );
    }

    #[test]
    fn session_alg_must_be_hmac_or_eddsa() {
        let mut vars = base();
        vars.insert("SESSION_SIGNING_ALG", "RS256");
        assert_eq!(load(&vars).err(), Some(ConfigError::Invalid("SESSION_SIGNING_ALG")));
    }

    #[test]
    fn invalid_values() {
        let mut vars = base();
        vars.insert("COOKIE_SECURE", "maybe");
        assert_eq!(load(&vars).err(), Some(ConfigError::Invalid("COOKIE_SECURE")));

        let mut vars = base();
        vars.insert("AUTH_REDIRECT_URI", "not a url");
        assert_eq!(load(&vars).err(), Some(ConfigError::Invalid("AUTH_REDIRECT_URI")));
    }

    #[test]
    fn jwks_cache_must_outlive_refresh_interval() {
        let mut vars = base();
        vars.insert("JWKS_REFRESH_INTERVAL_SECONDS", "600");
        vars.insert("JWKS_CACHE_TTL_SECONDS", "600");
        assert_eq!(load(&vars).err(), Some(ConfigError::Invalid("JWKS_CACHE_TTL_SECONDS")));

        vars.insert("JWKS_CACHE_TTL_SECONDS", "0");
        assert_eq!(load(&vars).err(), Some(ConfigError::Invalid("JWKS_CACHE_TTL_SECONDS")));

        vars.insert("JWKS_CACHE_TTL_SECONDS", "601");
        let config = load(&vars).unwrap();
        assert_eq!(config.jwks_refresh_interval_seconds, 600);
        assert_eq!(config.jwks_cache_ttl_seconds, 601);
    }

    #[test]
    fn applications_table() {
        assert!(load(&base()).unwrap().applications.is_empty());

        let mut vars = base();
        vars.insert(
            "APPLICATIONS",
            r#"[{"host": "grafana.example.com", "cookie_domain": "grafana.example.com"}]"#,
        );
        let config = load(&vars).unwrap();
        assert_eq!(config.applications.len(), 1);
        assert_eq!(config.applications[0].host, "grafana.example.com");

        vars.insert("APPLICATIONS", r#"[{"host": "a", "client_secret": "x"}]"#);
        assert_eq!(load(&vars).err(), Some(ConfigError::Invalid("APPLICATIONS")));
    }

    #[test]
    fn same_site_is_parsed() {
        let mut vars = base();
        vars.insert("COOKIE_SAME_SITE", "Strict");
        assert_eq!(load(&vars).unwrap().cookie_same_site, SameSite::Strict);

        vars.insert("COOKIE_SAME_SITE", "sometimes");
        assert_eq!(load(&vars).err(), Some(ConfigError::Invalid("COOKIE_SAME_SITE")));
    }

    #[test]
    fn production_env() {
        let mut vars = base();
        vars.insert("APP_ENV", "prod");
        assert!(load(&vars).unwrap().app_env.is_production());
    }
}
