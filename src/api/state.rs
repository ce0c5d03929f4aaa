//! Application state for the API server

use crate::identifier::IdGrammar;
use crate::queue::WorkQueue;
use crate::{Config, Result};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request; every field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The work queue fed by the handlers
    pub queue: Arc<WorkQueue>,

    /// Configuration (read-only)
    pub config: Arc<Config>,

    /// Grammar every path identifier is validated against
    pub grammar: Arc<IdGrammar>,
}

impl AppState {
    /// Create a new AppState, compiling the configured identifier grammar
    pub fn new(queue: Arc<WorkQueue>, config: Arc<Config>) -> Result<Self> {
        let grammar = IdGrammar::new(&config.storage.id_pattern)?;
        Ok(Self {
            queue,
            config,
            grammar: Arc::new(grammar),
        })
    }
}
