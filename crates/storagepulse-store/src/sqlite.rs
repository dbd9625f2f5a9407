use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tracing::debug;

use storagepulse_core::{
    AggregationStore, DuplicateGroup, FileRecord, FileTypeStats, MonitoredRoot, RootId,
    RootScanCommit, ScanToken, StoreError, StoreResult, UsageSnapshot,
};

const ROOT_COLUMNS: &str = "id, path, size, items, last_scan, added_at";

/// Aggregation store persisted in a single SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::unavailable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(store_error)?;
        let store = Self::from_connection(conn)?;
        debug!("opened store at {}", path.display());
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory().map_err(store_error)?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(store_error)?;
        conn.execute_batch(include_str!("schema.sql"))
            .map_err(store_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn root_where(&self, clause: &str, key: &str) -> StoreResult<Option<MonitoredRoot>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {ROOT_COLUMNS} FROM monitored_roots WHERE {clause} = ?1"),
            params![key],
            root_from_row,
        )
        .optional()
        .map_err(store_error)
    }
}

impl AggregationStore for SqliteStore {
    fn ping(&self) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(store_error)?;
        Ok(())
    }

    fn insert_root(&self, root: &MonitoredRoot) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO monitored_roots (id, path, size, items, last_scan, added_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                root.id.as_str(),
                path_text(&root.path),
                to_sql_int(root.size),
                to_sql_int(root.items),
                root.last_scan,
                root.added_at,
            ],
        )
        .map_err(store_error)?;
        Ok(())
    }

    fn root(&self, id: &RootId) -> StoreResult<Option<MonitoredRoot>> {
        self.root_where("id", id.as_str())
    }

    fn root_by_path(&self, path: &Path) -> StoreResult<Option<MonitoredRoot>> {
        self.root_where("path", &path_text(path))
    }

    fn roots(&self) -> StoreResult<Vec<MonitoredRoot>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {ROOT_COLUMNS} FROM monitored_roots ORDER BY path"
            ))
            .map_err(store_error)?;
        let roots = stmt
            .query_map([], root_from_row)
            .map_err(store_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_error)?;
        Ok(roots)
    }

    fn delete_root(&self, id: &RootId) -> StoreResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(store_error)?;

        let path: Option<String> = tx
            .query_row(
                "SELECT path FROM monitored_roots WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_error)?;
        let Some(path) = path else {
            return Ok(false);
        };

        tx.execute("DELETE FROM file_records WHERE root_path = ?1", params![path])
            .map_err(store_error)?;
        tx.execute(
            "DELETE FROM usage_history WHERE root_id = ?1",
            params![id.as_str()],
        )
        .map_err(store_error)?;
        tx.execute(
            "DELETE FROM monitored_roots WHERE id = ?1",
            params![id.as_str()],
        )
        .map_err(store_error)?;
        tx.commit().map_err(store_error)?;

        debug!("deleted root {} ({})", id, path);
        Ok(true)
    }

    fn upsert_file_records(&self, records: &[FileRecord]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(store_error)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO file_records \
                     (path, name, size, file_type, modified, root_path, scan_token) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                     ON CONFLICT(path) DO UPDATE SET \
                     name = excluded.name, size = excluded.size, \
                     file_type = excluded.file_type, modified = excluded.modified, \
                     root_path = excluded.root_path, scan_token = excluded.scan_token",
                )
                .map_err(store_error)?;

            for record in records {
                stmt.execute(params![
                    path_text(&record.path),
                    record.name.as_str(),
                    to_sql_int(record.size),
                    record.file_type.as_str(),
                    record.modified,
                    path_text(&record.root_path),
                    record.scan_token.0,
                ])
                .map_err(store_error)?;
            }
        }
        tx.commit().map_err(store_error)?;
        Ok(())
    }

    fn commit_root_scan(&self, commit: &RootScanCommit) -> StoreResult<bool> {
        let root_path = path_text(&commit.root_path);
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(store_error)?;

        let updated = tx
            .execute(
                "UPDATE monitored_roots SET size = ?1, items = ?2, last_scan = ?3 WHERE id = ?4",
                params![
                    to_sql_int(commit.size),
                    to_sql_int(commit.items),
                    commit.completed_at,
                    commit.root_id.as_str(),
                ],
            )
            .map_err(store_error)?;

        if updated == 0 {
            // Root removed mid-scan: drop whatever the scan wrote.
            tx.execute(
                "DELETE FROM file_records WHERE root_path = ?1",
                params![root_path],
            )
            .map_err(store_error)?;
            tx.commit().map_err(store_error)?;
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO usage_history (root_id, timestamp, used_bytes, free_bytes) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                commit.root_id.as_str(),
                commit.completed_at,
                to_sql_int(commit.size),
                to_sql_int(commit.free_bytes),
            ],
        )
        .map_err(store_error)?;

        let pruned = tx
            .execute(
                "DELETE FROM file_records WHERE root_path = ?1 AND scan_token != ?2",
                params![root_path, commit.scan_token.0],
            )
            .map_err(store_error)?;

        tx.commit().map_err(store_error)?;
        debug!(
            "committed scan of {} ({} items, {} stale records pruned)",
            root_path, commit.items, pruned
        );
        Ok(true)
    }

    fn file_records(&self) -> StoreResult<Vec<FileRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT path, name, size, file_type, modified, root_path, scan_token \
                 FROM file_records ORDER BY path",
            )
            .map_err(store_error)?;
        let records = stmt
            .query_map([], |row| {
                Ok(FileRecord {
                    path: PathBuf::from(row.get::<_, String>(0)?),
                    name: CompactString::from(row.get::<_, String>(1)?),
                    size: from_sql_int(row.get(2)?),
                    file_type: CompactString::from(row.get::<_, String>(3)?),
                    modified: row.get(4)?,
                    root_path: PathBuf::from(row.get::<_, String>(5)?),
                    scan_token: ScanToken(row.get(6)?),
                })
            })
            .map_err(store_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_error)?;
        Ok(records)
    }

    fn replace_duplicate_groups(&self, groups: &[DuplicateGroup]) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(store_error)?;
        tx.execute("DELETE FROM duplicate_groups", [])
            .map_err(store_error)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO duplicate_groups (name, size, paths) VALUES (?1, ?2, ?3)",
                )
                .map_err(store_error)?;
            for group in groups {
                let paths: Vec<String> = group.paths.iter().map(|p| path_text(p)).collect();
                let paths = serde_json::to_string(&paths).map_err(|e| StoreError::Corrupt {
                    message: e.to_string(),
                })?;
                stmt.execute(params![group.name.as_str(), to_sql_int(group.size), paths])
                    .map_err(store_error)?;
            }
        }
        tx.commit().map_err(store_error)?;
        debug!("stored {} duplicate groups", groups.len());
        Ok(())
    }

    fn duplicate_groups(&self) -> StoreResult<Vec<DuplicateGroup>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT name, size, paths FROM duplicate_groups ORDER BY id")
            .map_err(store_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    from_sql_int(row.get(1)?),
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(store_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_error)?;

        rows.into_iter()
            .map(|(name, size, paths)| {
                let paths: Vec<String> =
                    serde_json::from_str(&paths).map_err(|e| StoreError::Corrupt {
                        message: format!("duplicate group '{name}': {e}"),
                    })?;
                Ok(DuplicateGroup {
                    name: CompactString::from(name),
                    size,
                    paths: paths.into_iter().map(PathBuf::from).collect(),
                })
            })
            .collect()
    }

    fn usage_history(&self, limit: usize) -> StoreResult<Vec<UsageSnapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT id, root_id, timestamp, used_bytes, free_bytes \
                 FROM usage_history ORDER BY id DESC LIMIT ?1",
            )
            .map_err(store_error)?;
        let mut history = stmt
            .query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                Ok(UsageSnapshot {
                    id: row.get(0)?,
                    root_id: RootId::new(row.get::<_, String>(1)?),
                    timestamp: row.get(2)?,
                    used_bytes: from_sql_int(row.get(3)?),
                    free_bytes: from_sql_int(row.get(4)?),
                })
            })
            .map_err(store_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_error)?;
        history.reverse();
        Ok(history)
    }

    fn file_type_breakdown(&self) -> StoreResult<Vec<FileTypeStats>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT file_type, SUM(size) AS total, COUNT(*) FROM file_records \
                 GROUP BY file_type ORDER BY total DESC, file_type",
            )
            .map_err(store_error)?;
        let stats = stmt
            .query_map([], |row| {
                Ok(FileTypeStats {
                    file_type: CompactString::from(row.get::<_, String>(0)?),
                    total_size: from_sql_int(row.get(1)?),
                    count: from_sql_int(row.get(2)?),
                })
            })
            .map_err(store_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_error)?;
        Ok(stats)
    }

    fn reset(&self) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(store_error)?;
        tx.execute_batch(
            "DELETE FROM duplicate_groups;
             DELETE FROM file_records;
             DELETE FROM usage_history;
             DELETE FROM monitored_roots;",
        )
        .map_err(store_error)?;
        tx.commit().map_err(store_error)?;
        debug!("all tables cleared");
        Ok(())
    }
}

fn root_from_row(row: &Row<'_>) -> rusqlite::Result<MonitoredRoot> {
    Ok(MonitoredRoot {
        id: RootId::new(row.get::<_, String>(0)?),
        path: PathBuf::from(row.get::<_, String>(1)?),
        size: from_sql_int(row.get(2)?),
        items: from_sql_int(row.get(3)?),
        last_scan: row.get::<_, Option<DateTime<Utc>>>(4)?,
        added_at: row.get(5)?,
    })
}

fn store_error(err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => StoreError::Conflict {
            message: err.to_string(),
        },
        Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase) => StoreError::Corrupt {
            message: err.to_string(),
        },
        _ => match err {
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..) => StoreError::Corrupt {
                message: err.to_string(),
            },
            other => StoreError::unavailable(other.to_string()),
        },
    }
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// SQLite integers are signed; sizes beyond i64::MAX saturate.
fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_and_ping() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.ping().unwrap();
        assert!(store.roots().unwrap().is_empty());
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("nested/dir/monitor.sqlite");
        let store = SqliteStore::open(&path).unwrap();
        store.ping().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_sql_int_conversions_saturate() {
        assert_eq!(to_sql_int(u64::MAX), i64::MAX);
        assert_eq!(from_sql_int(-5), 0);
        assert_eq!(from_sql_int(42), 42);
    }
}
