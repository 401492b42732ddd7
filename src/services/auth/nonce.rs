//! Login nonce binding the provider callback to the browser that started it.
//!
//! The raw value goes into the nonce cookie; only its digest is embedded in
//! the state token and sent to the provider.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub struct LoginNonce {
    pub raw: String,
    pub digest: String,
}

pub fn generate() -> Result<LoginNonce, getrandom::Error> {
    let mut bytes = [0u8; 32];
    getrandom::fill(&mut bytes)?;
    let raw = URL_SAFE_NO_PAD.encode(bytes);
    let digest = digest(&raw);
    Ok(LoginNonce { raw, digest })
}

pub fn digest(raw: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(raw.as_bytes()))
}

pub fn verify(raw: &str, expected_digest: &str) -> bool {
    digest(raw)
        .as_bytes()
        .ct_eq(expected_digest.as_bytes())
        .into()
}
