//! SQLite query cache for tasks.
//!
//! The cache is expendable: it is always rebuildable from `tasks.jsonl`.
//! Freshness is decided by comparing the SHA-256 of the JSONL bytes with the
//! hash stored in the `metadata` table at the last rebuild. A cache file that
//! cannot be opened or queried is deleted and recreated.
//!
//! # Schema
//!
//! ```text
//! tasks(id PK, title, status, priority, description?, parent?, created, updated, closed?)
//! dependencies(task_id, blocked_by, position)   -- one row per blocked_by entry
//! metadata(key PK, value)                        -- 'jsonl_hash' singleton
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};

use crate::error::{Error, Result};
use crate::fingerprint::fingerprint;
use crate::task::{format_timestamp, Task};
use crate::verbose::VerboseLogger;

const HASH_KEY: &str = "jsonl_hash";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'open',
    priority INTEGER NOT NULL DEFAULT 2,
    description TEXT,
    parent TEXT,
    created TEXT NOT NULL,
    updated TEXT NOT NULL,
    closed TEXT
);

CREATE TABLE IF NOT EXISTS dependencies (
    task_id TEXT NOT NULL,
    blocked_by TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (task_id, blocked_by)
);

CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_priority ON tasks(priority);
CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent);
"#;

/// Handle on the cache database.
#[derive(Debug)]
pub struct Cache {
    conn: Connection,
}

impl Cache {
    /// Open (or create) the cache database and ensure the schema exists.
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Open an existing cache without creating or changing anything.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(path.as_ref(), OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self { conn })
    }

    /// Direct access to the connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a read-only function against the connection.
    pub fn query<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        f(&self.conn)
    }

    /// Hash stored by the last successful rebuild, if any.
    pub fn stored_fingerprint(&self) -> Result<Option<String>> {
        let hash = self
            .conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![HASH_KEY],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(hash.flatten())
    }

    /// Whether the cache was last rebuilt from exactly these bytes.
    ///
    /// A cache that has never been rebuilt is stale, not an error.
    pub fn is_fresh(&self, jsonl_data: &[u8]) -> Result<bool> {
        let current = fingerprint(jsonl_data);
        Ok(self.stored_fingerprint()?.as_deref() == Some(current.as_str()))
    }

    /// Replace all cached rows with `tasks` and record the hash of `jsonl_data`.
    ///
    /// Runs in one transaction; on any failure nothing is applied.
    pub fn rebuild(&mut self, tasks: &[Task], jsonl_data: &[u8]) -> Result<()> {
        // Dropping the transaction without commit rolls it back.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| rebuild_error("begin rebuild transaction", e))?;

        tx.execute_batch("DELETE FROM dependencies; DELETE FROM tasks;")
            .map_err(|e| rebuild_error("clear cached tasks", e))?;

        {
            let mut task_stmt = tx
                .prepare(
                    "INSERT INTO tasks (id, title, status, priority, description, parent, created, updated, closed)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )
                .map_err(|e| rebuild_error("prepare task insert", e))?;
            // A hand-edited file may repeat a blocker; the first position wins.
            let mut dep_stmt = tx
                .prepare(
                    "INSERT OR IGNORE INTO dependencies (task_id, blocked_by, position) VALUES (?1, ?2, ?3)",
                )
                .map_err(|e| rebuild_error("prepare dependency insert", e))?;

            for task in tasks {
                task_stmt
                    .execute(params![
                        task.id,
                        task.title,
                        task.status.as_str(),
                        task.priority,
                        task.description.as_deref().filter(|d| !d.is_empty()),
                        task.parent.as_deref().filter(|p| !p.is_empty()),
                        format_timestamp(&task.created),
                        format_timestamp(&task.updated),
                        task.closed.as_ref().map(format_timestamp),
                    ])
                    .map_err(|e| rebuild_error(&format!("insert task {}", task.id), e))?;

                for (position, blocked_by) in task.blocked_by.iter().enumerate() {
                    dep_stmt
                        .execute(params![task.id, blocked_by, position as i64])
                        .map_err(|e| {
                            rebuild_error(
                                &format!("insert dependency {} -> {}", task.id, blocked_by),
                                e,
                            )
                        })?;
                }
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![HASH_KEY, fingerprint(jsonl_data)],
        )
        .map_err(|e| rebuild_error("store jsonl_hash", e))?;

        tx.commit()
            .map_err(|e| rebuild_error("commit rebuild transaction", e))?;

        Ok(())
    }
}

fn rebuild_error(step: &str, err: rusqlite::Error) -> Error {
    Error::CacheRebuild(format!("failed to {}: {}", step, err))
}

/// Open the cache at `path`, recreating it from scratch if it is unreadable.
pub fn open_or_recover(path: &Path, verbose: &VerboseLogger) -> Result<Cache> {
    match Cache::open_or_create(path) {
        Ok(cache) => Ok(cache),
        Err(err) => recreate(path, &err, verbose),
    }
}

/// Gatekeeper run before every operation.
///
/// Reuses `existing` when given, otherwise opens the cache at `path`. If
/// opening or the freshness query fails the file is deleted and recreated.
/// A stale cache is rebuilt from `tasks`/`jsonl_data`.
pub fn ensure_fresh(
    existing: Option<Cache>,
    path: &Path,
    tasks: &[Task],
    jsonl_data: &[u8],
    verbose: &VerboseLogger,
) -> Result<Cache> {
    let cache = match existing {
        Some(cache) => cache,
        None => open_or_recover(path, verbose)?,
    };

    let (mut cache, fresh) = match cache.is_fresh(jsonl_data) {
        Ok(fresh) => (cache, fresh),
        Err(err) => {
            drop(cache);
            (recreate(path, &err, verbose)?, false)
        }
    };

    if fresh {
        verbose.log_fmt(format_args!(
            "cache freshness check: fresh (hash {})",
            short_hash(jsonl_data)
        ));
        return Ok(cache);
    }

    verbose.log_fmt(format_args!(
        "cache freshness check: stale (hash {})",
        short_hash(jsonl_data)
    ));
    verbose.log_fmt(format_args!("cache rebuild: {} tasks", tasks.len()));
    cache.rebuild(tasks, jsonl_data)?;
    verbose.log("cache rebuild complete");

    Ok(cache)
}

fn recreate(path: &Path, cause: &Error, verbose: &VerboseLogger) -> Result<Cache> {
    verbose.warn(&format!(
        "cache at {} appears corrupted, rebuilding from scratch: {}",
        path.display(),
        cause
    ));

    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::Io(e)),
    }
    for suffix in ["-journal", "-wal", "-shm"] {
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(suffix);
        let _ = fs::remove_file(PathBuf::from(sidecar));
    }

    Cache::open_or_create(path)
}

fn short_hash(data: &[u8]) -> String {
    fingerprint(data)[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonl::serialize_tasks;
    use crate::task::Status;
    use crate::verbose::SharedBuffer;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn task(id: &str) -> Task {
        let at = Utc.with_ymd_and_hms(2026, 1, 19, 10, 0, 0).unwrap();
        Task {
            id: id.to_string(),
            title: format!("Task {id}"),
            status: Status::Open,
            priority: 2,
            description: None,
            blocked_by: Vec::new(),
            parent: None,
            created: at,
            updated: at,
            closed: None,
        }
    }

    fn count(cache: &Cache, table: &str) -> i64 {
        cache
            .conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn open_creates_schema_idempotently() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");

        let cache = Cache::open_or_create(&path).unwrap();
        drop(cache);
        let cache = Cache::open_or_create(&path).unwrap();

        let tables: Vec<String> = cache
            .conn()
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(tables, vec!["dependencies", "metadata", "tasks"]);

        let indexes: i64 = cache
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_tasks_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(indexes, 3);
    }

    #[test]
    fn never_rebuilt_cache_is_stale() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open_or_create(dir.path().join("cache.db")).unwrap();
        assert!(!cache.is_fresh(b"").unwrap());
        assert!(cache.stored_fingerprint().unwrap().is_none());
    }

    #[test]
    fn rebuild_populates_rows_and_hash() {
        let dir = TempDir::new().unwrap();
        let mut cache = Cache::open_or_create(dir.path().join("cache.db")).unwrap();

        let mut child = task("tick-bbbbbb");
        child.parent = Some("tick-aaaaaa".to_string());
        child.description = Some(String::new());
        child.blocked_by = vec!["tick-cccccc".to_string(), "tick-aaaaaa".to_string()];
        child.status = Status::Done;
        child.closed = Some(Utc.with_ymd_and_hms(2026, 1, 20, 9, 5, 0).unwrap());
        let tasks = vec![task("tick-aaaaaa"), child, task("tick-cccccc")];
        let data = serialize_tasks(&tasks).unwrap();

        cache.rebuild(&tasks, &data).unwrap();
        assert!(cache.is_fresh(&data).unwrap());
        assert_eq!(count(&cache, "tasks"), 3);
        assert_eq!(count(&cache, "dependencies"), 2);

        let (description, parent, closed, status): (Option<String>, Option<String>, Option<String>, String) = cache
            .conn()
            .query_row(
                "SELECT description, parent, closed, status FROM tasks WHERE id = 'tick-bbbbbb'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(description, None);
        assert_eq!(parent.as_deref(), Some("tick-aaaaaa"));
        assert_eq!(closed.as_deref(), Some("2026-01-20T09:05:00Z"));
        assert_eq!(status, "done");

        let blockers: Vec<String> = cache
            .conn()
            .prepare("SELECT blocked_by FROM dependencies WHERE task_id = 'tick-bbbbbb' ORDER BY position")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(blockers, vec!["tick-cccccc", "tick-aaaaaa"]);
    }

    #[test]
    fn rebuild_replaces_previous_generation() {
        let dir = TempDir::new().unwrap();
        let mut cache = Cache::open_or_create(dir.path().join("cache.db")).unwrap();

        let first = vec![task("tick-aaaaaa"), task("tick-bbbbbb")];
        cache.rebuild(&first, b"one").unwrap();
        let second = vec![task("tick-cccccc")];
        cache.rebuild(&second, b"two").unwrap();

        assert_eq!(count(&cache, "tasks"), 1);
        assert!(cache.is_fresh(b"two").unwrap());
        assert!(!cache.is_fresh(b"one").unwrap());
    }

    #[test]
    fn rebuild_with_duplicate_id_leaves_previous_state() {
        let dir = TempDir::new().unwrap();
        let mut cache = Cache::open_or_create(dir.path().join("cache.db")).unwrap();

        let good = vec![task("tick-aaaaaa"), task("tick-bbbbbb")];
        cache.rebuild(&good, b"good").unwrap();

        let bad = vec![task("tick-cccccc"), task("tick-dddddd"), task("tick-cccccc")];
        let err = cache.rebuild(&bad, b"bad").unwrap_err();
        assert!(matches!(err, Error::CacheRebuild(_)));

        assert_eq!(count(&cache, "tasks"), 2);
        let ids: Vec<String> = cache
            .conn()
            .prepare("SELECT id FROM tasks ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(ids, vec!["tick-aaaaaa", "tick-bbbbbb"]);
        assert!(cache.is_fresh(b"good").unwrap());
    }

    #[test]
    fn rebuild_tolerates_repeated_blocker() {
        let dir = TempDir::new().unwrap();
        let mut cache = Cache::open_or_create(dir.path().join("cache.db")).unwrap();

        let mut child = task("tick-bbbbbb");
        child.blocked_by = vec![
            "tick-aaaaaa".to_string(),
            "tick-cccccc".to_string(),
            "tick-aaaaaa".to_string(),
        ];
        let tasks = vec![task("tick-aaaaaa"), child, task("tick-cccccc")];
        let data = serialize_tasks(&tasks).unwrap();

        cache.rebuild(&tasks, &data).unwrap();
        assert!(cache.is_fresh(&data).unwrap());

        let blockers: Vec<(String, i64)> = cache
            .conn()
            .prepare("SELECT blocked_by, position FROM dependencies WHERE task_id = 'tick-bbbbbb' ORDER BY position")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(
            blockers,
            vec![("tick-aaaaaa".to_string(), 0), ("tick-cccccc".to_string(), 1)]
        );
    }

    #[test]
    fn ensure_fresh_rebuilds_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        let buf = SharedBuffer::new();
        let verbose = VerboseLogger::new(buf.clone(), true);

        let tasks = vec![task("tick-aaaaaa")];
        let data = serialize_tasks(&tasks).unwrap();

        let cache = ensure_fresh(None, &path, &tasks, &data, &verbose).unwrap();
        assert!(buf.contents().contains("cache rebuild"));

        buf.clear();
        let cache = ensure_fresh(Some(cache), &path, &tasks, &data, &verbose).unwrap();
        let out = buf.contents();
        assert!(out.contains("cache freshness check: fresh"));
        assert!(!out.contains("cache rebuild"));
        assert_eq!(count(&cache, "tasks"), 1);
    }

    #[test]
    fn ensure_fresh_recovers_from_garbage_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        fs::write(&path, "this is definitely not a sqlite database file\n".repeat(64)).unwrap();

        let buf = SharedBuffer::new();
        let verbose = VerboseLogger::new(buf.clone(), false);
        let tasks = vec![task("tick-aaaaaa"), task("tick-bbbbbb")];
        let data = serialize_tasks(&tasks).unwrap();

        let cache = ensure_fresh(None, &path, &tasks, &data, &verbose).unwrap();
        assert_eq!(count(&cache, "tasks"), 2);
        assert!(cache.is_fresh(&data).unwrap());
        assert!(buf.contents().starts_with("warning: cache at"));
    }

    #[test]
    fn query_propagates_callback_error() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open_or_create(dir.path().join("cache.db")).unwrap();
        let err = cache
            .query(|_| -> Result<()> { Err(Error::OperationFailed("nope".to_string())) })
            .unwrap_err();
        assert!(matches!(err, Error::OperationFailed(msg) if msg == "nope"));
    }
}
