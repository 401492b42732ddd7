/*
 * Responsibility
 * - Query of GET /signin (provider callback)
 * - Either code + state, or error + error_description
 */
use serde::Deserialize;

use crate::services::auth::CallbackParams;

#[derive(Debug, Deserialize)]
pub struct SigninQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl From<SigninQuery> for CallbackParams {
    fn from(q: SigninQuery) -> Self {
        Self {
            code: q.code,
            state: q.state,
            error: q.error,
            error_description: q.error_description,
        }
    }
}
