/*
 * Responsibility
 * - Response body of GET /userinfo
 */
use serde::Serialize;
use serde_json::{Map, Value};

use crate::services::claims::Identity;

#[derive(Debug, Serialize)]
pub struct UserinfoResponse {
    pub sub: String,
    pub claims: Map<String, Value>,
}

impl From<Identity> for UserinfoResponse {
    fn from(identity: Identity) -> Self {
        Self {
            sub: identity.sub,
            claims: identity.claims,
        }
    }
}
