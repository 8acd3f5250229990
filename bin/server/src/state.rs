//! Shared application state.

use lantern_workflow::{Engine, WorkflowStore};
use std::sync::Arc;

/// State shared by all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub workflows: Arc<dyn WorkflowStore>,
}

impl AppState {
    /// Creates application state.
    pub fn new(engine: Engine, workflows: Arc<dyn WorkflowStore>) -> Self {
        Self { engine, workflows }
    }
}
