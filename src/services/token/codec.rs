//! Compact JWT encoding and verification.
//!
//! The service's own tokens (session cookie, login state) go through
//! `encode`/`decode`, which own `iat`/`exp` and the `typ` header.
//! Provider tokens go through `verify_signature`; their time window is the
//! claims validator's job.

use std::time::Duration;

use jsonwebtoken::{Algorithm, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{debug, error};

use super::keys::{SigningKey, VerificationKey, VerificationKeys};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed token")]
    Malformed,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("unexpected signing algorithm")]
    AlgorithmMismatch,

    #[error("unexpected token type")]
    WrongType,

    #[error("no key matches the token key id")]
    UnknownKey,

    #[error("verification keys unavailable")]
    KeysUnavailable,

    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for CodecError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAlgorithm => Self::AlgorithmMismatch,
            ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::Malformed,
        }
    }
}

/// Claims minted by this service. `TYP` ends up in the JOSE header so a
/// state token can never be replayed as a session token.
pub trait TokenKind {
    const TYP: &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded<T> {
    pub claims: T,
    pub issued_at: i64,
    pub expires_at: i64,
}

#[derive(Serialize)]
struct OutgoingEnvelope<'a, T> {
    iat: i64,
    exp: i64,
    #[serde(flatten)]
    claims: &'a T,
}

#[derive(Deserialize)]
struct IncomingEnvelope<T> {
    iat: i64,
    exp: i64,
    #[serde(flatten)]
    claims: T,
}

pub fn encode<T>(claims: &T, key: &SigningKey, ttl: Duration, now: i64) -> Result<String, CodecError>
where
    T: TokenKind + Serialize,
{
    let ttl = i64::try_from(ttl.as_secs())
        .map_err(|_| CodecError::Signing("ttl out of range".to_string()))?;

    let mut header = Header::new(key.algorithm());
    header.typ = Some(T::TYP.to_string());
    header.kid = key.kid().map(str::to_string);

    let envelope = OutgoingEnvelope {
        iat: now,
        exp: now.saturating_add(ttl),
        claims,
    };

    jsonwebtoken::encode(&header, &envelope, key.encoding_key()).map_err(|e| {
        error!(error = ?e, typ = T::TYP, "failed to sign token");
        CodecError::Signing(e.to_string())
    })
}

/// Verify and open a token minted by `encode`. Valid while `iat <= now < exp`
/// with no leeway.
pub fn decode<T>(token: &str, key: &VerificationKey, now: i64) -> Result<Decoded<T>, CodecError>
where
    T: TokenKind + DeserializeOwned,
{
    let header = check_header(token, key.algorithm())?;
    match header.typ.as_deref() {
        Some(typ) if typ.eq_ignore_ascii_case(T::TYP) => {}
        other => {
            debug!(expected = T::TYP, found = ?other, "token typ mismatch");
            return Err(CodecError::WrongType);
        }
    }

    let data = jsonwebtoken::decode::<IncomingEnvelope<T>>(
        token,
        key.decoding_key(),
        &signature_only(key.algorithm()),
    )?;
    let envelope = data.claims;

    if now >= envelope.exp {
        return Err(CodecError::Expired);
    }

    Ok(Decoded {
        claims: envelope.claims,
        issued_at: envelope.iat,
        expires_at: envelope.exp,
    })
}

/// Signature-only verification of a token issued by someone else.
pub fn verify_signature<T>(
    token: &str,
    keys: &dyn VerificationKeys,
    expected: Algorithm,
) -> Result<T, CodecError>
where
    T: DeserializeOwned,
{
    let header = check_header(token, expected)?;
    let key = keys.key_for(header.kid.as_deref(), expected)?;

    let data = jsonwebtoken::decode::<T>(token, key.decoding_key(), &signature_only(expected))?;
    Ok(data.claims)
}

// alg is compared before any key is touched
fn check_header(token: &str, expected: Algorithm) -> Result<Header, CodecError> {
    let header = jsonwebtoken::decode_header(token).map_err(|_| CodecError::Malformed)?;
    if header.alg != expected {
        debug!(expected = ?expected, found = ?header.alg, "token alg mismatch");
        return Err(CodecError::AlgorithmMismatch);
    }
    Ok(header)
}

fn signature_only(alg: Algorithm) -> Validation {
    let mut validation = Validation::new(alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation
}
