//! Image record persistence.
//!
//! `RecordStore` is the seam the ingest router and the reconciler depend on;
//! `ImageRepository` implements it on top of the shared SQLite `Database`
//! and adds the read-side queries used by the viewer.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rusqlite::OptionalExtension;

use nichoir_core::error::NichoirError;
use nichoir_core::types::{ImageRecord, RecordId, RecordRef};

use crate::db::Database;

/// Relational persistence for ingestion records.
pub trait RecordStore: Send + Sync {
    /// Insert one record stamped with the current time and return its id.
    fn insert(
        &self,
        file_path: &str,
        telemetry_level: Option<f64>,
        comment: Option<&str>,
    ) -> Result<RecordId, NichoirError>;

    /// Every record's id and file path, ascending by id.
    fn list_all(&self) -> Result<Vec<RecordRef>, NichoirError>;

    /// Remove a record. Returns `false` if no such id existed.
    fn delete_by_id(&self, id: RecordId) -> Result<bool, NichoirError>;
}

/// Repository for image ingestion records.
#[derive(Debug, Clone)]
pub struct ImageRepository {
    db: Arc<Database>,
}

impl ImageRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Most recent records first, at most `limit` of them.
    pub fn list_recent(&self, limit: u64) -> Result<Vec<ImageRecord>, NichoirError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, file_path, captured_at, telemetry_level, comment
                     FROM images
                     ORDER BY captured_at DESC, id DESC
                     LIMIT ?1",
                )
                .map_err(|e| NichoirError::Store(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![limit as i64], row_to_image_record)
                .map_err(|e| NichoirError::Store(e.to_string()))?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| NichoirError::Store(e.to_string()))
        })
    }

    /// Find a record by id.
    pub fn find_by_id(&self, id: RecordId) -> Result<Option<ImageRecord>, NichoirError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, file_path, captured_at, telemetry_level, comment
                 FROM images WHERE id = ?1",
                rusqlite::params![id],
                row_to_image_record,
            )
            .optional()
            .map_err(|e| NichoirError::Store(e.to_string()))
        })
    }

    /// Count stored records.
    pub fn count(&self) -> Result<u64, NichoirError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))
                .map_err(|e| NichoirError::Store(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

impl RecordStore for ImageRepository {
    fn insert(
        &self,
        file_path: &str,
        telemetry_level: Option<f64>,
        comment: Option<&str>,
    ) -> Result<RecordId, NichoirError> {
        let captured_at = Utc::now().timestamp();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO images (file_path, captured_at, telemetry_level, comment)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![file_path, captured_at, telemetry_level, comment],
            )
            .map_err(|e| NichoirError::Store(format!("Failed to insert image record: {}", e)))?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn list_all(&self) -> Result<Vec<RecordRef>, NichoirError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, file_path FROM images ORDER BY id ASC")
                .map_err(|e| NichoirError::Store(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok(RecordRef {
                        id: row.get(0)?,
                        file_path: row.get(1)?,
                    })
                })
                .map_err(|e| NichoirError::Store(e.to_string()))?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| NichoirError::Store(e.to_string()))
        })
    }

    fn delete_by_id(&self, id: RecordId) -> Result<bool, NichoirError> {
        self.db.with_conn(|conn| {
            let affected = conn
                .execute("DELETE FROM images WHERE id = ?1", rusqlite::params![id])
                .map_err(|e| {
                    NichoirError::Store(format!("Failed to delete image record {}: {}", id, e))
                })?;
            Ok(affected > 0)
        })
    }
}

fn row_to_image_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImageRecord> {
    let captured_at: i64 = row.get(2)?;
    Ok(ImageRecord {
        id: row.get(0)?,
        file_path: row.get(1)?,
        captured_at: Utc
            .timestamp_opt(captured_at, 0)
            .single()
            .unwrap_or_default(),
        telemetry_level: row.get(3)?,
        comment: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_repo() -> ImageRepository {
        ImageRepository::new(Arc::new(Database::in_memory().unwrap()))
    }

    #[test]
    fn test_insert_and_find() {
        let repo = make_repo();
        let id = repo
            .insert("/data/images/a.jpg", Some(3.7), Some("Image auto"))
            .unwrap();

        let found = repo.find_by_id(id).unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.file_path, "/data/images/a.jpg");
        assert_eq!(found.telemetry_level, Some(3.7));
        assert_eq!(found.comment.as_deref(), Some("Image auto"));
        assert!((Utc::now() - found.captured_at).num_seconds() < 5);
    }

    #[test]
    fn test_insert_without_telemetry() {
        let repo = make_repo();
        let id = repo.insert("/data/images/b.jpg", None, None).unwrap();

        let found = repo.find_by_id(id).unwrap().unwrap();
        assert!(found.telemetry_level.is_none());
        assert!(found.comment.is_none());
    }

    #[test]
    fn test_ids_are_assigned_by_store() {
        let repo = make_repo();
        let first = repo.insert("/a.jpg", None, None).unwrap();
        let second = repo.insert("/b.jpg", None, None).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_find_nonexistent() {
        let repo = make_repo();
        assert!(repo.find_by_id(42).unwrap().is_none());
    }

    #[test]
    fn test_list_all_is_ordered_by_id() {
        let repo = make_repo();
        let a = repo.insert("/a.jpg", None, None).unwrap();
        let b = repo.insert("/b.jpg", Some(1.0), None).unwrap();
        let c = repo.insert("/c.jpg", None, Some("note")).unwrap();

        let all = repo.list_all().unwrap();
        let ids: Vec<RecordId> = all.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a, b, c]);
        assert_eq!(all[1].file_path, "/b.jpg");
    }

    #[test]
    fn test_delete_is_idempotent() {
        let repo = make_repo();
        let id = repo.insert("/a.jpg", None, None).unwrap();

        assert!(repo.delete_by_id(id).unwrap());
        assert!(!repo.delete_by_id(id).unwrap());
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn test_list_recent_newest_first() {
        let repo = make_repo();
        let old = repo.insert("/old.jpg", None, None).unwrap();
        let new = repo.insert("/new.jpg", None, None).unwrap();

        repo.db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE images SET captured_at = captured_at - 3600 WHERE id = ?1",
                    rusqlite::params![old],
                )
                .map_err(|e| NichoirError::Store(e.to_string()))?;
                Ok(())
            })
            .unwrap();

        let recent = repo.list_recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, new);
        assert_eq!(recent[1].id, old);

        let limited = repo.list_recent(1).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, new);
    }

    #[test]
    fn test_count() {
        let repo = make_repo();
        assert_eq!(repo.count().unwrap(), 0);
        repo.insert("/a.jpg", None, None).unwrap();
        repo.insert("/b.jpg", None, None).unwrap();
        assert_eq!(repo.count().unwrap(), 2);
    }
}
