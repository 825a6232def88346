//! Layout of the `.tick/` directory
//!
//! ```text
//! .tick/
//!   tasks.jsonl     # Source of truth, one task per line
//!   lock            # Zero-length advisory lock file
//!   cache.db        # SQLite query cache (derived, safe to delete)
//!   config.toml     # Optional engine configuration
//! ```

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Name of the project directory
pub const TICK_DIR: &str = ".tick";

pub const TASKS_FILE: &str = "tasks.jsonl";
pub const LOCK_FILE: &str = "lock";
pub const CACHE_FILE: &str = "cache.db";
pub const CONFIG_FILE: &str = "config.toml";

/// Paths within a `.tick/` directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickDir {
    root: PathBuf,
}

impl TickDir {
    /// Wrap an existing `.tick/` directory path
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Walk up from `start` looking for a `.tick/` directory
    pub fn discover(start: impl AsRef<Path>) -> Result<Self> {
        let start = start.as_ref();
        let start = if start.is_absolute() {
            start.to_path_buf()
        } else {
            std::env::current_dir()?.join(start)
        };

        for dir in start.ancestors() {
            let candidate = dir.join(TICK_DIR);
            if candidate.is_dir() {
                return Ok(Self::new(candidate));
            }
        }

        Err(Error::NotInitialized(start))
    }

    /// Create `.tick/` with an empty `tasks.jsonl` inside `project_dir`
    pub fn init(project_dir: impl AsRef<Path>) -> Result<Self> {
        let project_dir = project_dir.as_ref();
        let root = project_dir.join(TICK_DIR);
        if root.exists() {
            return Err(Error::AlreadyInitialized(project_dir.to_path_buf()));
        }

        fs::create_dir_all(&root)?;
        File::create(root.join(TASKS_FILE))?;

        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tasks_file(&self) -> PathBuf {
        self.root.join(TASKS_FILE)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn cache_file(&self) -> PathBuf {
        self.root.join(CACHE_FILE)
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Check that the directory exists and holds `tasks.jsonl`
    pub fn validate(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(Error::NotInitialized(self.root.clone()));
        }
        if !self.tasks_file().is_file() {
            return Err(Error::InvalidArgument(format!(
                "{} not found in {}",
                TASKS_FILE,
                self.root.display()
            )));
        }
        Ok(())
    }
}
