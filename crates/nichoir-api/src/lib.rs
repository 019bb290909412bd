//! Nichoir API crate - read-only HTTP viewer over the ingested images.
//!
//! Lists image records newest first, serves the stored bytes by id, and
//! renders a minimal HTML gallery. The ingest loop is the only writer.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
