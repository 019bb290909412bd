//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use nichoir_core::config::NichoirConfig;
use nichoir_storage::{Database, ImageRepository};

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<NichoirConfig>,
    /// Read access to the image records.
    pub repository: ImageRepository,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: NichoirConfig, database: Arc<Database>) -> Self {
        Self {
            config: Arc::new(config),
            repository: ImageRepository::new(database),
            start_time: Instant::now(),
        }
    }
}
