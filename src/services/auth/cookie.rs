use std::{fmt, time::Duration};

use cookie::{Cookie, time::OffsetDateTime};

pub use cookie::SameSite;

/// `lax`, `strict` or `none`, any case.
pub fn parse_same_site(raw: &str) -> Option<SameSite> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "lax" => Some(SameSite::Lax),
        "strict" => Some(SameSite::Strict),
        "none" => Some(SameSite::None),
        _ => None,
    }
}

/// Attributes shared by the session and nonce cookies.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub session_name: String,
    pub nonce_name: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub same_site: SameSite,
    pub session_ttl: Duration,
    pub nonce_ttl: Duration,
}

impl CookieSettings {
    pub fn session(&self, value: impl Into<String>) -> SetCookie {
        self.build(&self.session_name, value.into(), self.session_ttl.as_secs())
    }

    pub fn nonce(&self, value: impl Into<String>) -> SetCookie {
        self.build(&self.nonce_name, value.into(), self.nonce_ttl.as_secs())
    }

    pub fn clear_session(&self) -> SetCookie {
        self.build(&self.session_name, String::new(), 0)
    }

    pub fn clear_nonce(&self) -> SetCookie {
        self.build(&self.nonce_name, String::new(), 0)
    }

    fn build(&self, name: &str, value: String, max_age: u64) -> SetCookie {
        SetCookie {
            name: name.to_string(),
            value,
            max_age,
            domain: self.domain.clone(),
            // browsers drop SameSite=None cookies without Secure
            secure: self.secure || self.same_site == SameSite::None,
            same_site: self.same_site,
        }
    }
}

/// One `Set-Cookie` header.
#[derive(Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub max_age: u64,
    pub domain: Option<String>,
    pub secure: bool,
    pub same_site: SameSite,
}

impl SetCookie {
    pub fn is_removal(&self) -> bool {
        self.max_age == 0
    }

    pub fn to_cookie(&self) -> Cookie<'static> {
        let max_age = i64::try_from(self.max_age).unwrap_or(i64::MAX);
        let mut builder = Cookie::build((self.name.clone(), self.value.clone()))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(self.same_site)
            .max_age(cookie::time::Duration::seconds(max_age));
        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        if self.is_removal() {
            builder = builder.expires(OffsetDateTime::UNIX_EPOCH);
        }
        builder.build()
    }

    pub fn header_value(&self) -> String {
        self.to_cookie().to_string()
    }
}

impl fmt::Debug for SetCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetCookie")
            .field("name", &self.name)
            .field("max_age", &self.max_age)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}
