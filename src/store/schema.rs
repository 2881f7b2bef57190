//! Schema creation and WAL/pragma setup.

use rusqlite::Connection;

use super::StoreError;

pub const CURRENT_SCHEMA_VERSION: i64 = 2;

pub fn configure_connection(conn: &Connection) -> Result<(), StoreError> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(StoreError::from)?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(StoreError::from)?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(StoreError::from)?;
    Ok(())
}

pub fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            created INTEGER NOT NULL,
            updated INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS snapshots (
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            data BLOB NOT NULL,
            size INTEGER NOT NULL,
            hash TEXT NOT NULL,
            ts INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_snapshots_file_ts
            ON snapshots(file_id, ts DESC, id DESC);

        CREATE TABLE IF NOT EXISTS renames (
            id TEXT PRIMARY KEY,
            source_file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            dest_file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            source_path TEXT NOT NULL,
            dest_path TEXT NOT NULL,
            ts INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_renames_ts ON renames(ts DESC, id DESC);

        CREATE TABLE IF NOT EXISTS schema_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );
        INSERT OR IGNORE INTO schema_meta (id, version) VALUES (1, 2);
        ",
    )
    .map_err(StoreError::from)?;
    Ok(())
}

/// `true` if `files.id` is still the legacy integer auto-increment column.
pub fn files_table_uses_legacy_int_id(conn: &Connection) -> Result<bool, StoreError> {
    let exists: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='files'",
            [],
            |_| Ok(true),
        )
        .unwrap_or(false);
    if !exists {
        return Ok(false);
    }

    let mut stmt = conn.prepare("PRAGMA table_info(files)").map_err(StoreError::from)?;
    let mut rows = stmt.query([]).map_err(StoreError::from)?;
    while let Some(row) = rows.next().map_err(StoreError::from)? {
        let name: String = row.get(1).map_err(StoreError::from)?;
        let col_type: String = row.get(2).map_err(StoreError::from)?;
        if name == "id" {
            return Ok(col_type.eq_ignore_ascii_case("INTEGER"));
        }
    }
    Ok(false)
}
