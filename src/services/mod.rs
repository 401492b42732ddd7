pub mod auth;
pub mod claims;
pub mod clock;
pub mod policy;
pub mod provider;
pub mod token;
