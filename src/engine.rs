//! Storage engine: `tasks.jsonl` + SQLite cache behind `.tick/lock`.
//!
//! Every operation follows the same protocol:
//!
//! 1. Acquire the lock (shared for [`Store::query`], exclusive for [`Store::mutate`])
//! 2. Read `tasks.jsonl` once and parse it
//! 3. Compare its hash with the cache and rebuild the cache if stale
//! 4. Run the caller's query against SQLite, or the caller's mutation
//!    against the parsed tasks followed by an atomic rewrite of `tasks.jsonl`
//!    and a cache refresh
//! 5. Release the lock (on drop, so on every exit path)
//!
//! The JSONL file is authoritative. A cache refresh that fails after a
//! successful write is logged as a warning and the mutation still succeeds;
//! the next operation sees the stale hash and rebuilds. A rebuild that fails
//! before a query is an error, since the query has nothing to run against.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;

use crate::cache::{self, Cache};
use crate::error::{Error, Result};
use crate::jsonl;
use crate::lock::{FileLock, LockKind, DEFAULT_LOCK_TIMEOUT};
use crate::storage::TickDir;
use crate::task::Task;
use crate::verbose::VerboseLogger;

/// Construction-time settings for a [`Store`].
#[derive(Debug, Default)]
pub struct StoreOptions {
    lock_timeout: Option<Duration>,
    verbose: Option<VerboseLogger>,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum time to wait for `.tick/lock` (default 5s).
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Sink for checkpoint and warning output (default: quiet, stderr).
    pub fn verbose(mut self, logger: VerboseLogger) -> Self {
        self.verbose = Some(logger);
        self
    }
}

/// The storage engine for one `.tick/` directory.
#[derive(Debug)]
pub struct Store {
    dir: TickDir,
    jsonl_path: PathBuf,
    lock_path: PathBuf,
    cache_path: PathBuf,
    cache: Mutex<CacheSlot>,
    lock_timeout: Duration,
    verbose: VerboseLogger,
}

impl Store {
    /// Open the engine for `tick_dir`, which must contain `tasks.jsonl`.
    pub fn open(tick_dir: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let dir = TickDir::new(tick_dir.as_ref());
        dir.validate()?;

        Ok(Self {
            jsonl_path: dir.tasks_file(),
            lock_path: dir.lock_file(),
            cache_path: dir.cache_file(),
            dir,
            cache: Mutex::new(CacheSlot::default()),
            lock_timeout: options.lock_timeout.unwrap_or(DEFAULT_LOCK_TIMEOUT),
            verbose: options.verbose.unwrap_or_default(),
        })
    }

    pub fn dir(&self) -> &TickDir {
        &self.dir
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Read flow under a shared lock; `f` runs against a fresh cache.
    ///
    /// The cache handle is checked out of the store while `f` runs, so `f`
    /// may call back into [`Store::query`], [`Store::read_tasks`] or
    /// [`Store::close_cache`]. A nested call opens its own connection.
    /// Calling [`Store::mutate`] or [`Store::rebuild`] from `f` waits on the
    /// shared lock held here and fails with the contention error.
    pub fn query<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let _lock = self.lock(LockKind::Shared)?;
        let (tasks, data) = self.read_source()?;

        let (cache, generation) = {
            let mut slot = self.cache_slot();
            self.ensure_fresh(&mut slot.cache, &tasks, &data)?;
            match slot.cache.take() {
                Some(cache) => (cache, slot.generation),
                None => return Err(Error::CacheUnavailable),
            }
        };

        let result = cache.query(f);
        self.check_in(cache, generation);
        result
    }

    /// Write flow under an exclusive lock.
    ///
    /// `f` receives the current tasks and returns the new task list. If it
    /// fails nothing is written.
    pub fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(Vec<Task>) -> Result<Vec<Task>>,
    {
        let _lock = self.lock(LockKind::Exclusive)?;
        let (tasks, data) = self.read_source()?;

        {
            let mut slot = self.cache_slot();
            self.ensure_fresh(&mut slot.cache, &tasks, &data)?;
        }

        let modified = f(tasks)?;

        self.verbose.log_fmt(format_args!(
            "atomic write: {} ({} tasks)",
            self.jsonl_path.display(),
            modified.len()
        ));
        jsonl::write_tasks(&self.jsonl_path, &modified)?;
        self.verbose.log("atomic write complete");

        if let Err(err) = self.refresh_after_write(&modified) {
            self.verbose.warn(&format!(
                "SQLite cache update failed after successful JSONL write: {}",
                err
            ));
        }

        Ok(())
    }

    /// Rebuild the cache unconditionally, ignoring freshness.
    ///
    /// Returns the number of tasks cached.
    pub fn rebuild(&self) -> Result<usize> {
        let _lock = self.lock(LockKind::Exclusive)?;
        let (tasks, data) = self.read_source()?;

        let mut slot = self.cache_slot();
        let mut cache = match slot.cache.take() {
            Some(cache) => cache,
            None => cache::open_or_recover(&self.cache_path, &self.verbose)?,
        };

        self.verbose
            .log_fmt(format_args!("cache rebuild: {} tasks (forced)", tasks.len()));
        cache.rebuild(&tasks, &data)?;
        self.verbose.log("cache rebuild complete");
        slot.cache = Some(cache);

        Ok(tasks.len())
    }

    /// Read flow returning the parsed tasks themselves.
    pub fn read_tasks(&self) -> Result<Vec<Task>> {
        let _lock = self.lock(LockKind::Shared)?;
        let (tasks, data) = self.read_source()?;

        let mut slot = self.cache_slot();
        self.ensure_fresh(&mut slot.cache, &tasks, &data)?;
        Ok(tasks)
    }

    /// Drop the cache handle. The next read or write reopens it; a write
    /// already in flight skips its post-write refresh.
    pub fn close_cache(&self) {
        let mut slot = self.cache_slot();
        slot.cache = None;
        slot.generation += 1;
    }

    fn lock(&self, kind: LockKind) -> Result<HeldLock<'_>> {
        let lock = FileLock::acquire(&self.lock_path, kind, self.lock_timeout)?;
        self.verbose
            .log_fmt(format_args!("lock acquired ({})", kind));
        Ok(HeldLock {
            lock: Some(lock),
            verbose: &self.verbose,
        })
    }

    fn read_source(&self) -> Result<(Vec<Task>, Vec<u8>)> {
        let data = fs::read(&self.jsonl_path)?;
        let tasks = jsonl::parse_tasks(&data)?;
        Ok((tasks, data))
    }

    fn cache_slot(&self) -> MutexGuard<'_, CacheSlot> {
        // A panicking query callback poisons the mutex; the connection itself
        // is still usable since SQLite rolled back whatever was open.
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn ensure_fresh(&self, slot: &mut Option<Cache>, tasks: &[Task], data: &[u8]) -> Result<()> {
        let cache = cache::ensure_fresh(slot.take(), &self.cache_path, tasks, data, &self.verbose)?;
        *slot = Some(cache);
        Ok(())
    }

    /// Return a handle checked out by [`Store::query`]. It is dropped if the
    /// cache was closed meanwhile or a nested call already put one back.
    fn check_in(&self, cache: Cache, generation: u64) {
        let mut slot = self.cache_slot();
        if slot.generation == generation && slot.cache.is_none() {
            slot.cache = Some(cache);
        }
    }

    /// Rebuild the already-open cache from what was just written.
    fn refresh_after_write(&self, tasks: &[Task]) -> Result<()> {
        let data = fs::read(&self.jsonl_path)?;

        let mut slot = self.cache_slot();
        let cache = slot.cache.as_mut().ok_or(Error::CacheUnavailable)?;

        self.verbose
            .log_fmt(format_args!("cache rebuild: {} tasks", tasks.len()));
        cache.rebuild(tasks, &data)?;
        self.verbose.log("cache rebuild complete");
        Ok(())
    }
}

/// Opened lazily; `cache` is `None` after [`Store::close_cache`], a failed
/// rebuild, or while [`Store::query`] has the handle checked out.
#[derive(Debug, Default)]
struct CacheSlot {
    cache: Option<Cache>,
    /// Bumped by [`Store::close_cache`].
    generation: u64,
}

/// Lock guard that reports its release.
struct HeldLock<'a> {
    lock: Option<FileLock>,
    verbose: &'a VerboseLogger,
}

impl Drop for HeldLock<'_> {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            let kind = lock.kind();
            drop(lock);
            self.verbose
                .log_fmt(format_args!("lock released ({})", kind));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Status;
    use crate::verbose::SharedBuffer;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn sample_tasks() -> Vec<Task> {
        let at = Utc.with_ymd_and_hms(2026, 1, 19, 10, 0, 0).unwrap();
        ["tick-aaa111", "tick-bbb222"]
            .iter()
            .map(|id| Task {
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
            })
            .collect()
    }

    fn setup(tasks: &[Task]) -> (TempDir, TickDir) {
        let dir = TempDir::new().unwrap();
        let tick = TickDir::init(dir.path()).unwrap();
        jsonl::write_tasks(tick.tasks_file(), tasks).unwrap();
        (dir, tick)
    }

    fn verbose_store(tick: &TickDir) -> (Store, SharedBuffer) {
        let buf = SharedBuffer::new();
        let store = Store::open(
            tick.root(),
            StoreOptions::new().verbose(VerboseLogger::new(buf.clone(), true)),
        )
        .unwrap();
        (store, buf)
    }

    #[test]
    fn open_requires_tasks_file() {
        let dir = TempDir::new().unwrap();
        assert!(Store::open(dir.path().join(".tick"), StoreOptions::new()).is_err());
    }

    #[test]
    fn cache_is_created_lazily() {
        let (_dir, tick) = setup(&sample_tasks());
        let store = Store::open(tick.root(), StoreOptions::new()).unwrap();
        assert!(!tick.cache_file().exists());

        store.query(|_| Ok(())).unwrap();
        assert!(tick.cache_file().exists());
    }

    #[test]
    fn mutate_logs_every_checkpoint() {
        let (_dir, tick) = setup(&sample_tasks());
        let (store, buf) = verbose_store(&tick);

        store.mutate(Ok).unwrap();

        let out = buf.contents();
        for phrase in [
            "verbose: lock acquired (exclusive)",
            "verbose: cache freshness check",
            "verbose: cache rebuild",
            "verbose: atomic write",
            "verbose: lock released (exclusive)",
        ] {
            assert!(out.contains(phrase), "missing {phrase:?} in:\n{out}");
        }
        assert!(out.lines().all(|line| line.starts_with("verbose: ")));
    }

    #[test]
    fn second_query_sees_fresh_cache() {
        let (_dir, tick) = setup(&sample_tasks());
        let (store, buf) = verbose_store(&tick);

        store.query(|_| Ok(())).unwrap();
        assert!(buf.contents().contains("cache rebuild"));

        buf.clear();
        store.query(|_| Ok(())).unwrap();
        let out = buf.contents();
        assert!(out.contains("verbose: lock acquired (shared)"));
        assert!(out.contains("cache freshness check: fresh"));
        assert!(!out.contains("cache rebuild"));
        assert!(out.contains("verbose: lock released (shared)"));
    }

    #[test]
    fn lock_released_after_callback_errors() {
        let (_dir, tick) = setup(&sample_tasks());
        let store = Store::open(
            tick.root(),
            StoreOptions::new().lock_timeout(Duration::from_millis(100)),
        )
        .unwrap();

        let err = store
            .mutate(|_| Err(Error::OperationFailed("mutation failed".to_string())))
            .unwrap_err();
        assert!(matches!(err, Error::OperationFailed(_)));

        let err = store
            .query(|_| -> Result<()> { Err(Error::OperationFailed("query failed".to_string())) })
            .unwrap_err();
        assert!(matches!(err, Error::OperationFailed(_)));

        assert!(FileLock::try_acquire(tick.lock_file(), LockKind::Exclusive)
            .unwrap()
            .is_some());
    }

    #[test]
    fn failed_mutation_writes_nothing() {
        let (_dir, tick) = setup(&sample_tasks());
        let before = fs::read(tick.tasks_file()).unwrap();
        let store = Store::open(tick.root(), StoreOptions::new()).unwrap();

        let _ = store.mutate(|mut tasks| {
            tasks.clear();
            Err(Error::InvalidArgument("no".to_string()))
        });

        assert_eq!(fs::read(tick.tasks_file()).unwrap(), before);
    }

    #[test]
    fn parse_error_aborts_and_releases_lock() {
        let (_dir, tick) = setup(&[]);
        fs::write(tick.tasks_file(), "{broken\n").unwrap();
        let store = Store::open(tick.root(), StoreOptions::new()).unwrap();

        let err = store.query(|_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 1, .. }));
        assert!(FileLock::try_acquire(tick.lock_file(), LockKind::Exclusive)
            .unwrap()
            .is_some());
    }

    #[test]
    fn closed_cache_downgrades_refresh_to_warning() {
        let (_dir, tick) = setup(&sample_tasks());
        let buf = SharedBuffer::new();
        let store = Store::open(
            tick.root(),
            StoreOptions::new().verbose(VerboseLogger::new(buf.clone(), false)),
        )
        .unwrap();

        store
            .mutate(|tasks| {
                store.close_cache();
                Ok(tasks.into_iter().take(1).collect())
            })
            .unwrap();

        assert!(buf
            .contents()
            .contains("warning: SQLite cache update failed after successful JSONL write"));
        assert_eq!(store.read_tasks().unwrap().len(), 1);
    }

    #[test]
    fn query_callback_can_reenter_store() {
        let (_dir, tick) = setup(&sample_tasks());
        let store = Store::open(
            tick.root(),
            StoreOptions::new().lock_timeout(Duration::from_millis(500)),
        )
        .unwrap();

        let (outer, inner, listed) = store
            .query(|conn| {
                let outer: i64 = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
                let inner = store.query(|conn| {
                    Ok(conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get::<_, i64>(0))?)
                })?;
                let listed = store.read_tasks()?.len();
                Ok((outer, inner, listed))
            })
            .unwrap();
        assert_eq!((outer, inner, listed), (2, 2, 2));

        assert!(store.cache_slot().cache.is_some());
    }

    #[test]
    fn close_cache_inside_query_is_honored() {
        let (_dir, tick) = setup(&sample_tasks());
        let store = Store::open(tick.root(), StoreOptions::new()).unwrap();

        store
            .query(|_| {
                store.close_cache();
                Ok(())
            })
            .unwrap();
        assert!(store.cache_slot().cache.is_none());

        let count = store
            .query(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get::<_, i64>(0))?))
            .unwrap();
        assert_eq!(count, 2);
        assert!(store.cache_slot().cache.is_some());
    }

    #[test]
    fn mutate_inside_query_reports_contention() {
        let (_dir, tick) = setup(&sample_tasks());
        let store = Store::open(
            tick.root(),
            StoreOptions::new().lock_timeout(Duration::from_millis(100)),
        )
        .unwrap();

        let err = store.query(|_| store.mutate(Ok)).unwrap_err();
        assert!(matches!(err, Error::LockTimeout));
    }

    #[test]
    fn forced_rebuild_returns_count() {
        let (_dir, tick) = setup(&sample_tasks());
        let store = Store::open(tick.root(), StoreOptions::new()).unwrap();
        assert_eq!(store.rebuild().unwrap(), 2);
        assert_eq!(store.rebuild().unwrap(), 2);
    }

    #[test]
    fn rebuild_failure_in_query_is_fatal() {
        let mut tasks = sample_tasks();
        tasks.push(tasks[0].clone());
        let (_dir, tick) = setup(&tasks);
        let store = Store::open(tick.root(), StoreOptions::new()).unwrap();

        let err = store.query(|_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::CacheRebuild(_)));
    }
}
