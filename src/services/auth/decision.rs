use std::fmt;

use super::cookie::{CookieSettings, SetCookie};
use crate::services::{
    claims::{ClaimsError, Identity},
    provider::ProviderError,
    token::CodecError,
};

/// Why a request was rejected. Every variant is terminal for the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    MalformedToken,
    InvalidSignature,
    Expired,
    NotYetValid,
    IssuerMismatch,
    AudienceMismatch,
    MissingClaim(String),
    StateMismatch(String),
    ProviderRejected(String),
    NetworkError(String),
    Timeout,
    PolicyDenied(String),
    Unauthenticated,
    KeysUnavailable,
    InvalidCallback(String),
    Internal,
}

impl DenyReason {
    /// Stable machine-readable code, used in logs and error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedToken => "MALFORMED_TOKEN",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::Expired => "TOKEN_EXPIRED",
            Self::NotYetValid => "TOKEN_NOT_YET_VALID",
            Self::IssuerMismatch => "ISSUER_MISMATCH",
            Self::AudienceMismatch => "AUDIENCE_MISMATCH",
            Self::MissingClaim(_) => "MISSING_CLAIM",
            Self::StateMismatch(_) => "STATE_MISMATCH",
            Self::ProviderRejected(_) => "PROVIDER_REJECTED",
            Self::NetworkError(_) => "PROVIDER_UNREACHABLE",
            Self::Timeout => "PROVIDER_TIMEOUT",
            Self::PolicyDenied(_) => "POLICY_DENIED",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::KeysUnavailable => "KEYS_UNAVAILABLE",
            Self::InvalidCallback(_) => "INVALID_CALLBACK",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// Failures caused by the provider side rather than the caller.
    pub fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_) | Self::Timeout | Self::KeysUnavailable
        )
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedToken => write!(f, "token is malformed"),
            Self::InvalidSignature => write!(f, "token signature is invalid"),
            Self::Expired => write!(f, "token has expired"),
            Self::NotYetValid => write!(f, "token is not yet valid"),
            Self::IssuerMismatch => write!(f, "token issuer is not trusted"),
            Self::AudienceMismatch => write!(f, "token audience does not match"),
            Self::MissingClaim(claim) => write!(f, "token is missing claim {claim}"),
            Self::StateMismatch(detail) => write!(f, "login state rejected: {detail}"),
            Self::ProviderRejected(detail) => write!(f, "identity provider rejected login: {detail}"),
            Self::NetworkError(_) => write!(f, "identity provider is unreachable"),
            Self::Timeout => write!(f, "identity provider timed out"),
            Self::PolicyDenied(detail) => write!(f, "access denied: {detail}"),
            Self::Unauthenticated => write!(f, "authentication required"),
            Self::KeysUnavailable => write!(f, "token signing keys are unavailable"),
            Self::InvalidCallback(detail) => write!(f, "invalid callback: {detail}"),
            Self::Internal => write!(f, "internal error"),
        }
    }
}

impl From<ClaimsError> for DenyReason {
    fn from(e: ClaimsError) -> Self {
        match e {
            ClaimsError::Malformed => Self::MalformedToken,
            ClaimsError::InvalidSignature => Self::InvalidSignature,
            ClaimsError::KeysUnavailable => Self::KeysUnavailable,
            ClaimsError::IssuerMismatch => Self::IssuerMismatch,
            ClaimsError::AudienceMismatch => Self::AudienceMismatch,
            ClaimsError::Expired => Self::Expired,
            ClaimsError::NotYetValid => Self::NotYetValid,
            ClaimsError::MissingClaim(claim) => Self::MissingClaim(claim),
        }
    }
}

/// Session cookies go through the codec directly.
impl From<CodecError> for DenyReason {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Expired => Self::Expired,
            CodecError::InvalidSignature
            | CodecError::AlgorithmMismatch
            | CodecError::UnknownKey => Self::InvalidSignature,
            CodecError::KeysUnavailable => Self::KeysUnavailable,
            CodecError::Malformed | CodecError::WrongType => Self::MalformedToken,
            CodecError::Signing(_) => Self::Internal,
        }
    }
}

impl From<ProviderError> for DenyReason {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Network(detail) => Self::NetworkError(detail),
            ProviderError::Timeout => Self::Timeout,
            ProviderError::Rejected(detail) => Self::ProviderRejected(detail),
        }
    }
}

/// Outcome of one request. Produced fresh, never stored.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Pass through. `identity` is absent on public routes reached anonymously.
    Allow { identity: Option<Identity> },
    /// Browser must log in. `nonce` is the raw value for the nonce cookie.
    RedirectToProvider {
        authorization_url: String,
        state: String,
        nonce: String,
        clear_session: bool,
    },
    /// Login finished. `cookie` is the signed session token.
    SetSessionCookie { cookie: String, redirect_to: String },
    /// Sign-out. No target means there is nowhere to send the browser.
    RedirectToLogin {
        target: Option<String>,
        clear_session: bool,
    },
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Self::Deny(reason) => Some(reason),
            _ => None,
        }
    }

    /// Cookies the HTTP response must set or clear for this outcome.
    pub fn cookies(&self, settings: &CookieSettings) -> Vec<SetCookie> {
        match self {
            Self::Allow { .. } | Self::Deny(_) => Vec::new(),
            Self::RedirectToProvider {
                nonce,
                clear_session,
                ..
            } => {
                let mut cookies = vec![settings.nonce(nonce.as_str())];
                if *clear_session {
                    cookies.push(settings.clear_session());
                }
                cookies
            }
            Self::SetSessionCookie { cookie, .. } => {
                vec![settings.session(cookie.as_str()), settings.clear_nonce()]
            }
            Self::RedirectToLogin { clear_session, .. } => {
                if *clear_session {
                    vec![settings.clear_session(), settings.clear_nonce()]
                } else {
                    Vec::new()
                }
            }
        }
    }
}
