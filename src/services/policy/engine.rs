use std::fmt;

use tracing::debug;

use super::rules::{PolicyRule, RuleAction, RuleError, parse_rules};
use crate::services::claims::Identity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyOutcome {
    Allow,
    RequireAuth,
    Deny(PolicyDenial),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDenial {
    NoMatchingRule,
    DeniedByRule(String),
    MissingClaim(String),
    ClaimMismatch { claim: String, expected: String },
    MissingScope(String),
}

impl fmt::Display for PolicyDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMatchingRule => write!(f, "no rule matches this request"),
            Self::DeniedByRule(rule) => write!(f, "denied by rule {rule}"),
            Self::MissingClaim(claim) => write!(f, "claim {claim} is required"),
            Self::ClaimMismatch { claim, expected } => {
                write!(f, "claim {claim} must contain {expected}")
            }
            Self::MissingScope(scope) => write!(f, "scope {scope} is required"),
        }
    }
}

/// Ordered rule table. First matching rule wins; no match denies.
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    rules: Vec<PolicyRule>,
}

impl PolicyEngine {
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self { rules }
    }

    pub fn from_json(json: &str) -> Result<Self, RuleError> {
        parse_rules(json).map(Self::new)
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    pub fn matching_rule(&self, host: &str, path: &str, method: &str) -> Option<&PolicyRule> {
        self.rules.iter().find(|r| r.matches(host, path, method))
    }

    pub fn evaluate(
        &self,
        host: &str,
        path: &str,
        method: &str,
        identity: Option<&Identity>,
    ) -> PolicyOutcome {
        let Some(rule) = self.matching_rule(host, path, method) else {
            debug!(host, path, method, "no policy rule matched");
            return PolicyOutcome::Deny(PolicyDenial::NoMatchingRule);
        };

        match rule.action {
            RuleAction::Allow => PolicyOutcome::Allow,
            RuleAction::Deny => PolicyOutcome::Deny(PolicyDenial::DeniedByRule(rule.label())),
            RuleAction::Authenticate => match identity {
                None => PolicyOutcome::RequireAuth,
                Some(identity) => match check_requirements(rule, identity) {
                    Ok(()) => PolicyOutcome::Allow,
                    Err(denial) => PolicyOutcome::Deny(denial),
                },
            },
        }
    }

    /// Claims the matched rule needs to see on a token. Empty when nothing matches.
    pub fn required_claims(&self, host: &str, path: &str, method: &str) -> Vec<String> {
        self.matching_rule(host, path, method)
            .map(PolicyRule::required_claims)
            .unwrap_or_default()
    }

    /// Every claim name any rule inspects, so sessions carry what policy reads.
    pub fn referenced_claims(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for rule in &self.rules {
            let mut wanted = rule.required_claims();
            if !rule.scopes.is_empty() {
                wanted.extend(["scope".to_string(), "permissions".to_string()]);
            }
            for name in wanted {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }
}

fn check_requirements(rule: &PolicyRule, identity: &Identity) -> Result<(), PolicyDenial> {
    for requirement in &rule.require {
        match &requirement.value {
            None if !identity.has_claim(&requirement.claim) => {
                return Err(PolicyDenial::MissingClaim(requirement.claim.clone()));
            }
            Some(expected) if !identity.claim_matches(&requirement.claim, expected) => {
                return Err(PolicyDenial::ClaimMismatch {
                    claim: requirement.claim.clone(),
                    expected: expected.clone(),
                });
            }
            _ => {}
        }
    }

    for scope in &rule.scopes {
        if !identity.has_scope(scope) {
            return Err(PolicyDenial::MissingScope(scope.clone()));
        }
    }

    Ok(())
}
