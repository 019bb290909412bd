//! Database schema migrations.
//!
//! Applies the `images` table and the schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use nichoir_core::error::NichoirError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), NichoirError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| NichoirError::Store(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| NichoirError::Store(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: images");
    }

    Ok(())
}

/// Version 1: image ingestion records.
fn apply_v1(conn: &Connection) -> Result<(), NichoirError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS images (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path       TEXT NOT NULL,
            captured_at     INTEGER NOT NULL,
            telemetry_level REAL,
            comment         TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_images_captured_at
            ON images (captured_at DESC);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'images');
        ",
    )
    .map_err(|e| NichoirError::Store(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_once() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_images_table_accepts_nullable_columns() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO images (file_path, captured_at) VALUES ('/a.jpg', 1700000000)",
            [],
        )
        .unwrap();

        let (level, comment): (Option<f64>, Option<String>) = conn
            .query_row(
                "SELECT telemetry_level, comment FROM images WHERE file_path = '/a.jpg'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!(level.is_none());
        assert!(comment.is_none());
    }

    #[test]
    fn test_images_require_file_path() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let result = conn.execute("INSERT INTO images (captured_at) VALUES (0)", []);
        assert!(result.is_err());
    }
}
