//! Content-addressed, compressed, append-only history store.
//!
//! One persistent writer connection (guarded by a mutex, since the
//! capture worker is meant to be the sole writer but the type itself
//! stays internally safe) backs `save_snapshot_batch`/`save_rename`;
//! read queries open their own short-lived connection, which the WAL
//! journal mode (`schema::configure_connection`) allows to run
//! concurrently with the writer.

mod migration;
mod schema;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, ToSql};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::ids::{new_id, now_unix};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("migration left {0} foreign-key violation(s)")]
    MigrationIntegrity(i64),

    #[error("insufficient storage: need at least {needed} bytes, {available} available")]
    InsufficientStorage { needed: u64, available: u64 },
}

impl StoreError {
    /// Whether this is the "database is locked" transient condition the
    /// capture worker retries.
    pub fn is_transient_lock(&self) -> bool {
        matches!(
            self,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
        )
    }
}

#[derive(Debug, Clone)]
pub struct SaveItem {
    pub path: String,
    pub bytes: Vec<u8>,
    pub retention: u32,
}

#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub path: String,
    pub saved: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: String,
    pub file_id: String,
    pub size: i64,
    pub hash: String,
    pub ts: i64,
}

#[derive(Debug, Clone)]
pub struct SnapshotWithData {
    pub snapshot: Snapshot,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum HistoryEntry {
    Save {
        id: String,
        path: String,
        size: i64,
        hash: String,
        ts: i64,
    },
    Rename {
        id: String,
        old_path: String,
        new_path: String,
        ts: i64,
    },
}

impl HistoryEntry {
    fn ts(&self) -> i64 {
        match self {
            HistoryEntry::Save { ts, .. } => *ts,
            HistoryEntry::Rename { ts, .. } => *ts,
        }
    }

    fn id(&self) -> &str {
        match self {
            HistoryEntry::Save { id, .. } => id,
            HistoryEntry::Rename { id, .. } => id,
        }
    }
}

pub struct Store {
    db_path: PathBuf,
    writer: Mutex<Connection>,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let mut conn = Connection::open(db_path)?;
        schema::configure_connection(&conn)?;

        if schema::files_table_uses_legacy_int_id(&conn)? {
            migration::migrate_legacy_to_uuid(&mut conn)?;
        }

        schema::ensure_schema(&conn)?;

        Ok(Self {
            db_path: db_path.to_path_buf(),
            writer: Mutex::new(conn),
        })
    }

    fn read_conn(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    /// One transaction covers all items. Duplicate content (same hash as
    /// the file's latest snapshot) reports `saved=false, error=None`
    /// rather than inserting a row. On commit failure the whole batch
    /// fails together - the caller decides whether the error is worth a
    /// whole-batch retry.
    pub fn save_snapshot_batch(&self, items: &[SaveItem]) -> Result<Vec<SaveOutcome>, StoreError> {
        let mut conn = self.writer.lock().expect("store writer mutex poisoned");
        self.save_snapshot_batch_inner(&mut conn, items)
    }

    fn save_snapshot_batch_inner(
        &self,
        conn: &mut Connection,
        items: &[SaveItem],
    ) -> Result<Vec<SaveOutcome>, StoreError> {
        let tx = conn.transaction()?;
        let mut outcomes = Vec::with_capacity(items.len());

        for item in items {
            let hash = hex::encode(Sha256::digest(&item.bytes));

            let existing: Option<(String, i64)> = tx
                .query_row(
                    "SELECT id, created FROM files WHERE path = ?1",
                    params![item.path],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            if let Some((file_id, _)) = &existing {
                let latest_hash: Option<String> = tx
                    .query_row(
                        "SELECT hash FROM snapshots WHERE file_id = ?1
                         ORDER BY ts DESC, id DESC LIMIT 1",
                        params![file_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if latest_hash.as_deref() == Some(hash.as_str()) {
                    outcomes.push(SaveOutcome {
                        path: item.path.clone(),
                        saved: false,
                        error: None,
                    });
                    continue;
                }
            }

            let now = now_unix();
            let file_id = match &existing {
                Some((id, _)) => {
                    tx.execute(
                        "UPDATE files SET updated = ?1 WHERE id = ?2",
                        params![now, id],
                    )?;
                    id.clone()
                }
                None => {
                    let id = new_id();
                    tx.execute(
                        "INSERT INTO files (id, path, created, updated) VALUES (?1, ?2, ?3, ?3)",
                        params![id, item.path, now],
                    )?;
                    id
                }
            };

            let compressed = zstd::encode_all(item.bytes.as_slice(), 0).map_err(|source| {
                StoreError::Io {
                    path: PathBuf::from(&item.path),
                    source,
                }
            })?;

            let snapshot_id = new_id();
            tx.execute(
                "INSERT INTO snapshots (id, file_id, data, size, hash, ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![snapshot_id, file_id, compressed, item.bytes.len() as i64, hash, now],
            )?;

            if item.retention > 0 {
                tx.execute(
                    "DELETE FROM snapshots WHERE file_id = ?1 AND id NOT IN (
                        SELECT id FROM snapshots WHERE file_id = ?1
                        ORDER BY ts DESC, id DESC LIMIT ?2
                    )",
                    params![file_id, item.retention],
                )?;
            }

            outcomes.push(SaveOutcome {
                path: item.path.clone(),
                saved: true,
                error: None,
            });
        }

        tx.commit()?;
        Ok(outcomes)
    }

    /// If no `TrackedFile` exists at `old_path`, returns `(None, Ok(()))`
    /// - silently ignored upstream, not an error.
    pub fn save_rename(&self, old_path: &str, new_path: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.writer.lock().expect("store writer mutex poisoned");
        let tx = conn.transaction()?;

        let source_file_id: Option<String> = tx
            .query_row(
                "SELECT id FROM files WHERE path = ?1",
                params![old_path],
                |row| row.get(0),
            )
            .optional()?;

        let Some(source_file_id) = source_file_id else {
            return Ok(None);
        };

        let now = now_unix();
        let dest_file_id: Option<String> = tx
            .query_row(
                "SELECT id FROM files WHERE path = ?1",
                params![new_path],
                |row| row.get(0),
            )
            .optional()?;

        let dest_file_id = match dest_file_id {
            Some(id) => {
                tx.execute("UPDATE files SET updated = ?1 WHERE id = ?2", params![now, id])?;
                id
            }
            None => {
                let id = new_id();
                tx.execute(
                    "INSERT INTO files (id, path, created, updated) VALUES (?1, ?2, ?3, ?3)",
                    params![id, new_path, now],
                )?;
                id
            }
        };

        tx.execute(
            "INSERT INTO renames (id, source_file_id, dest_file_id, source_path, dest_path, ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![new_id(), source_file_id, dest_file_id, old_path, new_path, now],
        )?;

        tx.commit()?;
        Ok(Some(dest_file_id))
    }

    /// All snapshots for a file, newest first.
    pub fn get_snapshots(&self, file_id: &str) -> Result<Vec<Snapshot>, StoreError> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, file_id, size, hash, ts FROM snapshots
             WHERE file_id = ?1 ORDER BY ts DESC, id DESC",
        )?;
        let rows = stmt
            .query_map(params![file_id], |row| {
                Ok(Snapshot {
                    id: row.get(0)?,
                    file_id: row.get(1)?,
                    size: row.get(2)?,
                    hash: row.get(3)?,
                    ts: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// A single snapshot, including decompressed bytes.
    pub fn get_snapshot(&self, id: &str) -> Result<Option<SnapshotWithData>, StoreError> {
        let conn = self.read_conn()?;
        let row: Option<(String, String, i64, String, i64, Vec<u8>)> = conn
            .query_row(
                "SELECT id, file_id, size, hash, ts, data FROM snapshots WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, file_id, size, hash, ts, compressed)) = row else {
            return Ok(None);
        };

        let data = zstd::decode_all(compressed.as_slice()).map_err(|source| StoreError::Io {
            path: PathBuf::from(&id),
            source,
        })?;

        Ok(Some(SnapshotWithData {
            snapshot: Snapshot {
                id,
                file_id,
                size,
                hash,
                ts,
            },
            data,
        }))
    }

    /// Union of snapshots and renames as `HistoryEntry` rows, newest
    /// first, returning `limit + 1` rows so the caller can report "there
    /// is more" without a separate count. `query` and `dir_filter` are
    /// applied in SQL, before `LIMIT`, so a match outside the most recent
    /// `limit + 1 + offset` rows is still found.
    pub fn get_recent_history(
        &self,
        limit: usize,
        offset: usize,
        query: Option<&str>,
        dir_filter: Option<&[String]>,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = self.read_conn()?;
        let fetch_count = limit + 1 + offset;

        let (save_where, save_params) = build_history_predicate(&["f.path"], query, dir_filter);
        let (rename_where, rename_params) =
            build_history_predicate(&["source_path", "dest_path"], query, dir_filter);

        let mut saves = {
            let sql = format!(
                "SELECT s.id, f.path, s.size, s.hash, s.ts
                 FROM snapshots s JOIN files f ON f.id = s.file_id
                 {save_where}
                 ORDER BY s.ts DESC, s.id DESC LIMIT ?",
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut bound: Vec<&dyn ToSql> = save_params.iter().map(|p| p.as_ref()).collect();
            let fetch_count = fetch_count as i64;
            bound.push(&fetch_count);
            stmt.query_map(bound.as_slice(), |row| {
                Ok(HistoryEntry::Save {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    size: row.get(2)?,
                    hash: row.get(3)?,
                    ts: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?
        };

        let mut renames = {
            let sql = format!(
                "SELECT id, source_path, dest_path, ts FROM renames
                 {rename_where}
                 ORDER BY ts DESC, id DESC LIMIT ?",
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut bound: Vec<&dyn ToSql> = rename_params.iter().map(|p| p.as_ref()).collect();
            let fetch_count = fetch_count as i64;
            bound.push(&fetch_count);
            stmt.query_map(bound.as_slice(), |row| {
                Ok(HistoryEntry::Rename {
                    id: row.get(0)?,
                    old_path: row.get(1)?,
                    new_path: row.get(2)?,
                    ts: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?
        };

        let mut entries = Vec::with_capacity(saves.len() + renames.len());
        entries.append(&mut saves);
        entries.append(&mut renames);
        entries.sort_by(|a, b| b.ts().cmp(&a.ts()).then_with(|| b.id().cmp(a.id())));
        entries.truncate(fetch_count);

        let end = (offset + limit + 1).min(entries.len());
        if offset >= entries.len() {
            return Ok(Vec::new());
        }
        Ok(entries[offset..end].to_vec())
    }

    /// A consistent point-in-time copy of the store via `VACUUM INTO`,
    /// refusing up front if disk space would not suffice.
    pub fn create_backup_snapshot(&self, tmp_dir: &Path) -> Result<PathBuf, StoreError> {
        let store_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        let available = available_space(tmp_dir)?;
        if available < store_size {
            return Err(StoreError::InsufficientStorage {
                needed: store_size,
                available,
            });
        }

        let backup_path = tmp_dir.join(format!("lochist-backup-{}.db", new_id()));
        let conn = self.read_conn()?;
        conn.execute(
            "VACUUM INTO ?1",
            params![backup_path.to_string_lossy().to_string()],
        )?;
        Ok(backup_path)
    }
}

fn available_space(dir: &Path) -> Result<u64, StoreError> {
    fs2::available_space(dir).map_err(|source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

/// Builds a `WHERE ...` clause (empty string if neither filter applies)
/// plus its bound parameters, in the order the `?` placeholders appear:
/// the `query` substring match across `columns` first, then the
/// `dir_filter` prefix match across `columns`. An empty `dir_filter`
/// slice matches nothing, mirroring the old in-memory `retain` behavior.
fn build_history_predicate(
    columns: &[&str],
    query: Option<&str>,
    dir_filter: Option<&[String]>,
) -> (String, Vec<Box<dyn ToSql>>) {
    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(q) = query {
        let pattern = format!("%{}%", q.to_lowercase());
        let ors: Vec<String> = columns.iter().map(|c| format!("LOWER({c}) LIKE ?")).collect();
        conditions.push(format!("({})", ors.join(" OR ")));
        for _ in columns {
            params.push(Box::new(pattern.clone()));
        }
    }

    if let Some(dirs) = dir_filter {
        if dirs.is_empty() {
            conditions.push("0".to_string());
        } else {
            let mut ors = Vec::with_capacity(dirs.len() * columns.len());
            for dir in dirs {
                let prefix = if dir.ends_with(std::path::MAIN_SEPARATOR) {
                    dir.clone()
                } else {
                    format!("{dir}{}", std::path::MAIN_SEPARATOR)
                };
                for c in columns {
                    ors.push(format!("{c} LIKE ?"));
                    params.push(Box::new(format!("{prefix}%")));
                }
            }
            conditions.push(format!("({})", ors.join(" OR ")));
        }
    }

    if conditions.is_empty() {
        (String::new(), params)
    } else {
        (format!("WHERE {}", conditions.join(" AND ")), params)
    }
}
