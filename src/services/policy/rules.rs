//! Rule table entries and their pattern matching.
//!
//! Rules are loaded once from JSON at startup:
//!
//! ```json
//! [
//!   { "host": "*.example.com", "path": "/public", "action": "allow" },
//!   { "path": "/admin", "action": "authenticate",
//!     "require": [{ "claim": "groups", "value": "admin" }] },
//!   { "path": "/", "action": "authenticate" }
//! ]
//! ```

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("invalid host pattern: {0}")]
    InvalidHost(String),

    #[error("invalid path pattern: {0}")]
    InvalidPath(String),

    #[error("invalid method: {0}")]
    InvalidMethod(String),

    #[error("rule {0}: require/scopes only apply to authenticate rules")]
    RequirementsWithoutAuth(String),

    #[error("invalid rule table: {0}")]
    Json(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    Any,
    Exact(String),
    /// `*.example.com`, stored as `.example.com`. Matches one or more labels.
    Suffix(String),
}

impl HostPattern {
    pub fn parse(raw: &str) -> Result<Self, RuleError> {
        let raw = raw.trim().to_ascii_lowercase();
        if raw.is_empty() || raw == "*" {
            return Ok(Self::Any);
        }
        if let Some(suffix) = raw.strip_prefix("*.") {
            if suffix.is_empty() || suffix.contains('*') {
                return Err(RuleError::InvalidHost(raw));
            }
            return Ok(Self::Suffix(format!(".{suffix}")));
        }
        if raw.contains('*') || raw.contains('/') {
            return Err(RuleError::InvalidHost(raw));
        }
        Ok(Self::Exact(raw))
    }

    pub fn matches(&self, host: &str) -> bool {
        let host = normalize_host(host);
        match self {
            Self::Any => true,
            Self::Exact(expected) => host == *expected,
            Self::Suffix(suffix) => host.len() > suffix.len() && host.ends_with(suffix.as_str()),
        }
    }
}

/// Patterns are lower-cased; they are matched against canonical request
/// paths, which are lower-case too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    /// Segment-aware prefix. `/` matches everything.
    Prefix(String),
    /// Written `=/exact`.
    Exact(String),
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, RuleError> {
        let raw = raw.trim();
        if let Some(exact) = raw.strip_prefix('=') {
            if !exact.starts_with('/') {
                return Err(RuleError::InvalidPath(raw.to_string()));
            }
            return Ok(Self::Exact(exact.to_lowercase()));
        }
        if raw.is_empty() {
            return Ok(Self::Prefix("/".to_string()));
        }
        if !raw.starts_with('/') {
            return Err(RuleError::InvalidPath(raw.to_string()));
        }
        let trimmed = raw.trim_end_matches('/');
        if trimmed.is_empty() {
            Ok(Self::Prefix("/".to_string()))
        } else {
            Ok(Self::Prefix(trimmed.to_lowercase()))
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = strip_query(path);
        match self {
            Self::Exact(expected) => path == expected,
            Self::Prefix(prefix) if prefix == "/" => true,
            Self::Prefix(prefix) => match path.strip_prefix(prefix.as_str()) {
                Some(rest) => rest.is_empty() || rest.starts_with('/'),
                None => false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Deny,
    Authenticate,
}

/// Without `value` the claim must be present and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaimRequirement {
    pub claim: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    methods: Vec<String>,
    action: RuleAction,
    #[serde(default)]
    require: Vec<ClaimRequirement>,
    #[serde(default)]
    scopes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawRule")]
pub struct PolicyRule {
    pub name: Option<String>,
    pub host: HostPattern,
    pub path: PathPattern,
    /// Upper-case. Empty means every method.
    pub methods: Vec<String>,
    pub action: RuleAction,
    pub require: Vec<ClaimRequirement>,
    pub scopes: Vec<String>,
}

impl TryFrom<RawRule> for PolicyRule {
    type Error = RuleError;

    fn try_from(raw: RawRule) -> Result<Self, Self::Error> {
        let host = HostPattern::parse(raw.host.as_deref().unwrap_or("*"))?;
        let path = PathPattern::parse(raw.path.as_deref().unwrap_or("/"))?;

        let methods = raw
            .methods
            .iter()
            .map(|m| {
                let m = m.trim().to_ascii_uppercase();
                if m.is_empty() || !m.bytes().all(|b| b.is_ascii_alphabetic()) {
                    Err(RuleError::InvalidMethod(m))
                } else {
                    Ok(m)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        if raw.action != RuleAction::Authenticate
            && (!raw.require.is_empty() || !raw.scopes.is_empty())
        {
            let label = raw
                .name
                .clone()
                .or(raw.path.clone())
                .unwrap_or_else(|| "/".to_string());
            return Err(RuleError::RequirementsWithoutAuth(label));
        }

        Ok(Self {
            name: raw.name,
            host,
            path,
            methods,
            action: raw.action,
            require: raw.require,
            scopes: raw.scopes,
        })
    }
}

impl PolicyRule {
    pub fn new(host: HostPattern, path: PathPattern, action: RuleAction) -> Self {
        Self {
            name: None,
            host,
            path,
            methods: Vec::new(),
            action,
            require: Vec::new(),
            scopes: Vec::new(),
        }
    }

    pub fn matches(&self, host: &str, path: &str, method: &str) -> bool {
        self.host.matches(host)
            && self.path.matches(path)
            && (self.methods.is_empty()
                || self.methods.iter().any(|m| m.eq_ignore_ascii_case(method)))
    }

    /// Claim names the validator must see on a token for this rule.
    pub fn required_claims(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for requirement in &self.require {
            if !names.contains(&requirement.claim) {
                names.push(requirement.claim.clone());
            }
        }
        names
    }

    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{:?} {:?}", self.host, self.path),
        }
    }
}

pub fn parse_rules(json: &str) -> Result<Vec<PolicyRule>, RuleError> {
    serde_json::from_str(json).map_err(|e| RuleError::Json(e.to_string()))
}

/// Lower-cased host without port or trailing dot.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    // keep IPv6 literals intact
    let without_port = if host.starts_with('[') {
        host.split_once(']')
            .map(|(addr, _)| &host[..=addr.len()])
            .unwrap_or(host)
    } else {
        host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host)
    };
    without_port.trim_end_matches('.').to_ascii_lowercase()
}

fn strip_query(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_patterns() {
        let exact = HostPattern::parse("App.Example.com").unwrap();
        assert!(exact.matches("app.example.com"));
        assert!(exact.matches("APP.example.com:8443"));
        assert!(!exact.matches("x.app.example.com"));

        let wildcard = HostPattern::parse("*.example.com").unwrap();
        assert!(wildcard.matches("a.example.com"));
        assert!(wildcard.matches("a.b.example.com"));
        assert!(!wildcard.matches("example.com"));
        assert!(!wildcard.matches("badexample.com"));

        assert!(HostPattern::parse("*").unwrap().matches("anything"));
        assert!(HostPattern::parse("a*.example.com").is_err());
    }

    #[test]
    fn path_prefix_is_segment_aware() {
        let admin = PathPattern::parse("/admin/").unwrap();
        assert!(admin.matches("/admin"));
        assert!(admin.matches("/admin/users"));
        assert!(admin.matches("/admin?tab=1"));
        assert!(!admin.matches("/administrator"));

        let root = PathPattern::parse("/").unwrap();
        assert!(root.matches("/anything/at/all"));
    }

    #[test]
    fn path_patterns_are_case_folded() {
        assert_eq!(
            PathPattern::parse("/Admin/").unwrap(),
            PathPattern::Prefix("/admin".into())
        );
        assert_eq!(
            PathPattern::parse("=/HealthZ").unwrap(),
            PathPattern::Exact("/healthz".into())
        );
    }

    #[test]
    fn path_exact() {
        let health = PathPattern::parse("=/healthz").unwrap();
        assert!(health.matches("/healthz"));
        assert!(health.matches("/healthz?ready=1"));
        assert!(!health.matches("/healthz/deep"));
    }

    #[test]
    fn parses_rule_table() {
        let rules = parse_rules(
            r#"[
                {"host": "*.example.com", "path": "/public", "action": "allow"},
                {"path": "/admin", "methods": ["get", "post"], "action": "authenticate",
                 "require": [{"claim": "groups", "value": "admin"}], "scopes": ["read:admin"]}
            ]"#,
        )
        .unwrap();

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].methods, vec!["GET", "POST"]);
        assert!(rules[1].matches("app.example.com", "/admin/x", "post"));
        assert!(!rules[1].matches("app.example.com", "/admin/x", "DELETE"));
        assert_eq!(rules[1].required_claims(), vec!["groups"]);
    }

    #[test]
    fn requirements_need_authenticate() {
        let err = parse_rules(
            r#"[{"path": "/x", "action": "allow", "require": [{"claim": "email"}]}]"#,
        )
        .unwrap_err();
        assert!(matches!(&err, RuleError::Json(msg) if msg.contains("rule /x")));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(parse_rules(r#"[{"path": "/x", "action": "allow", "hots": "a"}]"#).is_err());
        assert!(parse_rules(r#"[{"path": "/x", "action": "permit"}]"#).is_err());
    }
}
