use std::fmt;

use jsonwebtoken::Algorithm;
use thiserror::Error;
use tracing::warn;

use super::types::IdentityClaims;
use crate::services::token::{CodecError, VerificationKeys, verify_signature};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimsError {
    #[error("malformed token")]
    Malformed,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("signing keys unavailable")]
    KeysUnavailable,

    #[error("issuer mismatch")]
    IssuerMismatch,

    #[error("audience mismatch")]
    AudienceMismatch,

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("missing claim: {0}")]
    MissingClaim(String),
}

impl From<CodecError> for ClaimsError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::InvalidSignature
            | CodecError::AlgorithmMismatch
            | CodecError::UnknownKey => Self::InvalidSignature,
            CodecError::KeysUnavailable => Self::KeysUnavailable,
            CodecError::Expired => Self::Expired,
            CodecError::Malformed | CodecError::WrongType | CodecError::Signing(_) => {
                Self::Malformed
            }
        }
    }
}

/// Validates provider-issued tokens for one issuer/audience pair.
///
/// Checks run in a fixed order and the first failure is the one reported:
/// signature, issuer, audience, time window, required claims.
#[derive(Clone)]
pub struct ClaimsValidator {
    issuer: String,
    audience: String,
    algorithm: Algorithm,
    leeway: i64,
}

impl ClaimsValidator {
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        algorithm: Algorithm,
        leeway_seconds: u64,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            algorithm,
            leeway: i64::try_from(leeway_seconds).unwrap_or(i64::MAX),
        }
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Same issuer and checks, different audience.
    pub fn for_audience(&self, audience: impl Into<String>) -> Self {
        Self {
            audience: audience.into(),
            ..self.clone()
        }
    }

    pub fn validate<S: AsRef<str>>(
        &self,
        token: &str,
        keys: &dyn VerificationKeys,
        required: &[S],
        now: i64,
    ) -> Result<IdentityClaims, ClaimsError> {
        let claims: IdentityClaims =
            verify_signature(token, keys, self.algorithm).map_err(|e| {
                warn!(error = ?e, "provider token signature rejected");
                ClaimsError::from(e)
            })?;

        self.check_claims(&claims, required, now)?;
        Ok(claims)
    }

    /// Claim checks on an already verified token. Pure.
    pub fn check_claims<S: AsRef<str>>(
        &self,
        claims: &IdentityClaims,
        required: &[S],
        now: i64,
    ) -> Result<(), ClaimsError> {
        if claims.iss != self.issuer {
            return Err(ClaimsError::IssuerMismatch);
        }

        if !claims.audience_contains(&self.audience) {
            return Err(ClaimsError::AudienceMismatch);
        }

        let exp = claims
            .exp
            .ok_or_else(|| ClaimsError::MissingClaim("exp".to_string()))?;
        if now >= exp.saturating_add(self.leeway) {
            return Err(ClaimsError::Expired);
        }

        if let Some(nbf) = claims.nbf
            && now.saturating_add(self.leeway) < nbf
        {
            return Err(ClaimsError::NotYetValid);
        }

        if !claims.has_claim("sub") {
            return Err(ClaimsError::MissingClaim("sub".to_string()));
        }

        for name in required {
            let name = name.as_ref();
            if !claims.has_claim(name) {
                return Err(ClaimsError::MissingClaim(name.to_string()));
            }
        }

        Ok(())
    }
}

impl fmt::Debug for ClaimsValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimsValidator")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("algorithm", &self.algorithm)
            .field("leeway", &self.leeway)
            .finish()
    }
}
