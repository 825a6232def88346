#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use tick::engine::{Store, StoreOptions};
use tick::jsonl;
use tick::storage::TickDir;
use tick::task::{Status, Task};
use tick::verbose::{SharedBuffer, VerboseLogger};

pub struct TestProject {
    dir: TempDir,
    tick: TickDir,
}

impl TestProject {
    /// A project with `.tick/` and an empty `tasks.jsonl`.
    pub fn init() -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let tick = TickDir::init(dir.path()).expect("failed to init .tick");
        Self { dir, tick }
    }

    pub fn with_tasks(tasks: &[Task]) -> Self {
        let project = Self::init();
        project.write_tasks(tasks);
        project
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn tick(&self) -> &TickDir {
        &self.tick
    }

    pub fn write_tasks(&self, tasks: &[Task]) {
        jsonl::write_tasks(self.tick.tasks_file(), tasks).expect("write tasks.jsonl");
    }

    pub fn read_tasks(&self) -> Vec<Task> {
        let data = fs::read(self.tick.tasks_file()).expect("read tasks.jsonl");
        jsonl::parse_tasks(&data).expect("parse tasks.jsonl")
    }

    pub fn cache_file(&self) -> PathBuf {
        self.tick.cache_file()
    }

    pub fn store(&self) -> Store {
        Store::open(self.tick.root(), StoreOptions::new()).expect("open store")
    }

    pub fn store_with_timeout(&self, timeout: Duration) -> Store {
        Store::open(self.tick.root(), StoreOptions::new().lock_timeout(timeout))
            .expect("open store")
    }

    /// Store whose verbose output and warnings are captured.
    pub fn verbose_store(&self) -> (Store, SharedBuffer) {
        let buf = SharedBuffer::new();
        let store = Store::open(
            self.tick.root(),
            StoreOptions::new().verbose(VerboseLogger::new(buf.clone(), true)),
        )
        .expect("open store");
        (store, buf)
    }
}

/// A fixed-time open task.
pub fn task(id: &str, title: &str) -> Task {
    let at = Utc
        .with_ymd_and_hms(2026, 1, 19, 10, 0, 0)
        .single()
        .expect("valid timestamp");
    Task {
        id: id.to_string(),
        title: title.to_string(),
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

pub fn count_rows(store: &Store) -> i64 {
    store
        .query(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?))
        .expect("count rows")
}
