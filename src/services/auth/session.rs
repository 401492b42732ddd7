use serde::{Deserialize, Serialize};

use crate::services::{claims::Identity, token::TokenKind};

/// Payload of the session cookie. `iat`/`exp` are added by the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub jti: String,
    #[serde(flatten)]
    pub identity: Identity,
}

impl TokenKind for SessionClaims {
    const TYP: &'static str = "session+jwt";
}

/// Payload of the `state` parameter sent through the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateClaims {
    /// The URL the browser asked for before login.
    pub url: String,
    pub method: String,
    /// Digest of the raw nonce held in the nonce cookie.
    pub nonce: String,
}

impl TokenKind for StateClaims {
    const TYP: &'static str = "state+jwt";
}
