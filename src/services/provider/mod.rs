pub mod client;
pub mod jwks;

pub use client::{
    ClientCredentials, HttpProviderClient, KeySetFetcher, ProviderClient, ProviderEndpoints, ProviderError,
    TokenResponse,
};
pub use jwks::{JwksCache, KeySet};
