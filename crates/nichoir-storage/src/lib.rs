//! Nichoir Storage crate - SQLite persistence and startup reconciliation.
//!
//! Provides a WAL-mode SQLite database with migrations, the image record
//! repository behind the `RecordStore` trait, and the integrity reconciler
//! that drops records whose files have disappeared from disk.

pub mod db;
pub mod migrations;
pub mod reconcile;
pub mod repository;

pub use db::Database;
pub use reconcile::{IntegrityReconciler, ReconcileReport};
pub use repository::{ImageRepository, RecordStore};
