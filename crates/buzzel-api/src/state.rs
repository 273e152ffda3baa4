//! Application state shared across handlers.

use buzzel_core::Backend;
use std::sync::Arc;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<dyn Backend>,
}

impl AppState {
    pub fn new(cache: Arc<dyn Backend>) -> Self {
        Self { cache }
    }
}
