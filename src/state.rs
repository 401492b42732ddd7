/*
 * Responsibility
 * - Shared context attached to the Router (AppState)
 * - Cheap to clone: the engine sits behind an Arc
 */
use std::sync::Arc;

use crate::services::auth::DecisionEngine;

#[derive(Clone, Debug)]
pub struct AppState {
    pub engine: Arc<DecisionEngine>,
}

impl AppState {
    pub fn new(engine: Arc<DecisionEngine>) -> Self {
        Self { engine }
    }
}
