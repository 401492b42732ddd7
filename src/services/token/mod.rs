pub mod codec;
pub mod keys;

pub use codec::{CodecError, Decoded, TokenKind, decode, encode, verify_signature};
pub use keys::{KeyError, SigningKey, StaticKey, VerificationKey, VerificationKeys};
