//! Key material for compact tokens.
//!
//! Responsibility:
//! - Hold the service's own signing key (HMAC secret or Ed25519 pair)
//! - Hold provider verification keys (PEM or JWK)
//! - Resolve a verification key for a token header via `VerificationKeys`

use std::{fmt, sync::Arc};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use thiserror::Error;

use super::codec::CodecError;

/// HMAC secrets shorter than this are refused at startup.
pub const MIN_HMAC_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("unsupported algorithm for this key type: {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    #[error("hmac secret must be at least {MIN_HMAC_SECRET_LEN} bytes")]
    WeakSecret,

    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

fn is_hmac(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// Key used to sign session and state tokens.
///
/// Always carries the matching verification key so a token minted by this
/// service can be checked with the same value.
#[derive(Clone)]
pub struct SigningKey {
    alg: Algorithm,
    kid: Option<String>,
    encoding: EncodingKey,
    verification: VerificationKey,
}

impl SigningKey {
    pub fn hmac(alg: Algorithm, secret: &[u8]) -> Result<Self, KeyError> {
        if !is_hmac(alg) {
            return Err(KeyError::UnsupportedAlgorithm(alg));
        }
        if secret.len() < MIN_HMAC_SECRET_LEN {
            return Err(KeyError::WeakSecret);
        }

        Ok(Self {
            alg,
            kid: None,
            encoding: EncodingKey::from_secret(secret),
            verification: VerificationKey::hmac(alg, secret)?,
        })
    }

    pub fn ed25519_pem(private_pem: &str, public_pem: &str) -> Result<Self, KeyError> {
        let encoding = EncodingKey::from_ed_pem(private_pem.as_bytes())
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;

        Ok(Self {
            alg: Algorithm::EdDSA,
            kid: None,
            encoding,
            verification: VerificationKey::from_pem(Algorithm::EdDSA, public_pem)?,
        })
    }

    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        let kid = kid.into();
        self.verification.kid = Some(kid.clone());
        self.kid = Some(kid);
        self
    }

    pub fn algorithm(&self) -> Algorithm {
        self.alg
    }

    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    pub fn verification_key(&self) -> &VerificationKey {
        &self.verification
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("alg", &self.alg)
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

/// A single verification key bound to one algorithm.
#[derive(Clone)]
pub struct VerificationKey {
    alg: Algorithm,
    kid: Option<String>,
    decoding: DecodingKey,
}

impl VerificationKey {
    pub fn new(alg: Algorithm, decoding: DecodingKey, kid: Option<String>) -> Self {
        Self { alg, kid, decoding }
    }

    pub fn hmac(alg: Algorithm, secret: &[u8]) -> Result<Self, KeyError> {
        if !is_hmac(alg) {
            return Err(KeyError::UnsupportedAlgorithm(alg));
        }
        Ok(Self::new(alg, DecodingKey::from_secret(secret), None))
    }

    /// Public key in PEM form. HMAC algorithms have no PEM representation.
    pub fn from_pem(alg: Algorithm, pem: &str) -> Result<Self, KeyError> {
        let bytes = pem.as_bytes();
        let decoding = match alg {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => DecodingKey::from_rsa_pem(bytes),
            Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(bytes),
            Algorithm::EdDSA => DecodingKey::from_ed_pem(bytes),
            other => return Err(KeyError::UnsupportedAlgorithm(other)),
        }
        .map_err(|e| KeyError::InvalidKey(e.to_string()))?;

        Ok(Self::new(alg, decoding, None))
    }

    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    pub fn algorithm(&self) -> Algorithm {
        self.alg
    }

    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("alg", &self.alg)
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

/// Source of verification keys for tokens issued by someone else.
///
/// `alg` has already been checked against the expected algorithm by the
/// codec when this is called.
pub trait VerificationKeys: Send + Sync {
    fn key_for(&self, kid: Option<&str>, alg: Algorithm)
    -> Result<Arc<VerificationKey>, CodecError>;
}

/// One configured key, e.g. `PROVIDER_PUBLIC_KEY_PEM`.
#[derive(Debug, Clone)]
pub struct StaticKey(Arc<VerificationKey>);

impl StaticKey {
    pub fn new(key: VerificationKey) -> Self {
        Self(Arc::new(key))
    }
}

impl VerificationKeys for StaticKey {
    fn key_for(
        &self,
        kid: Option<&str>,
        alg: Algorithm,
    ) -> Result<Arc<VerificationKey>, CodecError> {
        if self.0.algorithm() != alg {
            return Err(CodecError::AlgorithmMismatch);
        }
        if let (Some(wanted), Some(have)) = (kid, self.0.kid())
            && wanted != have
        {
            return Err(CodecError::UnknownKey);
        }
        Ok(Arc::clone(&self.0))
    }
}
