use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Registered claims that never travel as policy claims.
const REGISTERED: &[&str] = &["sub", "iss", "aud", "exp", "nbf", "iat", "jti", "nonce", "azp"];

/// Verified provider claims. Short-lived: turned into an `Identity` right
/// after validation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IdentityClaims {
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub iss: String,
    /// String or array of strings depending on the provider.
    #[serde(default)]
    pub aud: Value,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub nbf: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IdentityClaims {
    pub fn audience_contains(&self, expected: &str) -> bool {
        match &self.aud {
            Value::String(aud) => aud == expected,
            Value::Array(values) => values.iter().any(|v| v.as_str() == Some(expected)),
            _ => false,
        }
    }

    /// Presence check used for route-required claims.
    pub fn has_claim(&self, name: &str) -> bool {
        match name {
            "sub" => !self.sub.trim().is_empty(),
            "iss" => !self.iss.is_empty(),
            "aud" => !self.aud.is_null(),
            "exp" => self.exp.is_some(),
            "nbf" => self.nbf.is_some(),
            "iat" => self.iat.is_some(),
            other => self.extra.get(other).is_some_and(is_present),
        }
    }

    pub fn nonce(&self) -> Option<&str> {
        self.extra.get("nonce").and_then(Value::as_str)
    }

    /// Keep only the listed claims. Used when the identity ends up in a cookie.
    pub fn into_identity<S: AsRef<str>>(self, keep: &[S]) -> Identity {
        let mut claims = Map::new();
        let mut extra = self.extra;
        for name in keep {
            let name = name.as_ref();
            if REGISTERED.contains(&name) {
                continue;
            }
            if let Some(value) = extra.remove(name) {
                claims.insert(name.to_string(), value);
            }
        }
        Identity {
            sub: self.sub,
            claims,
        }
    }

    /// Keep every non-registered claim. Used for bearer requests.
    pub fn into_full_identity(self) -> Identity {
        let claims = self
            .extra
            .into_iter()
            .filter(|(name, _)| !REGISTERED.contains(&name.as_str()))
            .collect();
        Identity {
            sub: self.sub,
            claims,
        }
    }
}

/// The policy-facing view of a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub sub: String,
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

impl Identity {
    pub fn new(sub: impl Into<String>) -> Self {
        Self {
            sub: sub.into(),
            claims: Map::new(),
        }
    }

    pub fn with_claim(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.claims.insert(name.into(), value.into());
        self
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    pub fn has_claim(&self, name: &str) -> bool {
        if name == "sub" {
            return !self.sub.is_empty();
        }
        self.claim(name).is_some_and(is_present)
    }

    /// String claims must equal `expected`; array claims must contain it.
    pub fn claim_matches(&self, name: &str, expected: &str) -> bool {
        if name == "sub" {
            return self.sub == expected;
        }
        match self.claim(name) {
            Some(Value::String(s)) => s == expected,
            Some(Value::Array(values)) => values.iter().any(|v| v.as_str() == Some(expected)),
            Some(Value::Bool(b)) => b.to_string() == expected,
            Some(Value::Number(n)) => n.to_string() == expected,
            _ => false,
        }
    }

    /// Space-separated `scope` plus the `permissions` array.
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        let from_scope = self
            .claim("scope")
            .and_then(Value::as_str)
            .into_iter()
            .flat_map(str::split_whitespace);
        let from_permissions = self
            .claim("permissions")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str);
        from_scope.chain(from_permissions)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().any(|s| s == scope)
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        _ => true,
    }
}
