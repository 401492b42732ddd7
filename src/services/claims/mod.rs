pub mod types;
pub mod validator;

pub use types::{Identity, IdentityClaims};
pub use validator::{ClaimsError, ClaimsValidator};
