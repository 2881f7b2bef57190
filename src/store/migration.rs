//! Legacy integer-id -> UUIDv7 schema migration.
//!
//! Runs in a single transaction: builds new `files`/`snapshots` tables
//! with text identifiers, assigns a fresh UUIDv7 to each existing row,
//! rewrites cross-references through a temporary `(old_int_id,
//! new_uuid)` mapping, drops the old tables, renames the new ones, and
//! re-enables and verifies foreign-key integrity. Either fully completes
//! or leaves the original data intact.

use rusqlite::{params, Connection};

use crate::ids::new_id;

use super::StoreError;

pub fn migrate_legacy_to_uuid(conn: &mut Connection) -> Result<(), StoreError> {
    conn.pragma_update(None, "foreign_keys", "OFF")?;
    let tx = conn.transaction()?;

    tx.execute_batch(
        "CREATE TEMP TABLE id_map (
            old_id INTEGER PRIMARY KEY,
            new_id TEXT NOT NULL
        );",
    )?;

    {
        let mut stmt = tx.prepare("SELECT id FROM files")?;
        let mut rows = stmt.query([])?;
        let mut insert = tx.prepare("INSERT INTO id_map (old_id, new_id) VALUES (?1, ?2)")?;
        while let Some(row) = rows.next()? {
            let old_id: i64 = row.get(0)?;
            insert.execute(params![old_id, new_id()])?;
        }
    }

    tx.execute_batch(
        "CREATE TABLE files_new (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            created INTEGER NOT NULL,
            updated INTEGER NOT NULL
        );

        INSERT INTO files_new (id, path, created, updated)
        SELECT m.new_id, f.path, f.created, f.updated
        FROM files f JOIN id_map m ON m.old_id = f.id;

        CREATE TABLE snapshots_new (
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL REFERENCES files_new(id) ON DELETE CASCADE,
            data BLOB NOT NULL,
            size INTEGER NOT NULL,
            hash TEXT NOT NULL,
            ts INTEGER NOT NULL
        );",
    )?;

    {
        let mut stmt = tx.prepare("SELECT id, file_id, data, size, hash, ts FROM snapshots")?;
        let mut rows = stmt.query([])?;
        let mut insert = tx.prepare(
            "INSERT INTO snapshots_new (id, file_id, data, size, hash, ts)
             SELECT ?1, m.new_id, ?2, ?3, ?4, ?5 FROM id_map m WHERE m.old_id = ?6",
        )?;
        while let Some(row) = rows.next()? {
            let old_snapshot_id: i64 = row.get(0)?;
            let old_file_id: i64 = row.get(1)?;
            let data: Vec<u8> = row.get(2)?;
            let size: i64 = row.get(3)?;
            let hash: String = row.get(4)?;
            let ts: i64 = row.get(5)?;
            insert.execute(params![
                new_id(),
                data,
                size,
                hash,
                ts,
                old_file_id,
            ])?;
            let _ = old_snapshot_id;
        }
    }

    tx.execute_batch(
        "DROP TABLE snapshots;
        DROP TABLE files;
        ALTER TABLE files_new RENAME TO files;
        ALTER TABLE snapshots_new RENAME TO snapshots;
        CREATE INDEX IF NOT EXISTS idx_snapshots_file_ts
            ON snapshots(file_id, ts DESC, id DESC);
        DROP TABLE id_map;",
    )?;

    tx.commit()?;

    conn.pragma_update(None, "foreign_keys", "ON")?;
    let violations: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_foreign_key_check",
        [],
        |row| row.get(0),
    )?;
    if violations > 0 {
        return Err(StoreError::MigrationIntegrity(violations));
    }

    Ok(())
}
