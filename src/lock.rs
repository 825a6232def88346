//! File locking and atomic writes for tick
//!
//! This module provides the filesystem coordination the storage engine
//! relies on:
//! - Advisory exclusive/shared locks on `.tick/lock` (fs2/flock)
//! - Lock timeout with a fixed polling interval
//! - Atomic write pattern (write temp in the same directory + rename)

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Default lock timeout
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry interval while waiting for a lock
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

fn is_lock_contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }

    // On Windows, fs2/libc can surface lock/sharing violations as "Other".
    // Treat them as contention so callers get Err(LockTimeout) after timeout.
    #[cfg(windows)]
    {
        matches!(err.raw_os_error(), Some(32) | Some(33))
    }
    #[cfg(not(windows))]
    {
        false
    }
}

/// Lock mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// Excludes every other holder
    Exclusive,
    /// Coexists with other shared holders
    Shared,
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKind::Exclusive => f.write_str("exclusive"),
            LockKind::Shared => f.write_str("shared"),
        }
    }
}

/// A file lock guard that releases the lock when dropped
pub struct FileLock {
    file: File,
    path: PathBuf,
    kind: LockKind,
}

impl FileLock {
    /// Acquire an exclusive lock, polling until `timeout` elapses
    pub fn acquire_exclusive(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        Self::acquire(path, LockKind::Exclusive, timeout)
    }

    /// Acquire a shared lock, polling until `timeout` elapses
    pub fn acquire_shared(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        Self::acquire(path, LockKind::Shared, timeout)
    }

    /// Acquire a lock of the given kind with timeout
    ///
    /// The lock file is created if it doesn't exist. Returns
    /// `Error::LockTimeout` if the lock cannot be acquired in time.
    pub fn acquire(path: impl AsRef<Path>, kind: LockKind, timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;

        let start = Instant::now();
        loop {
            match try_lock(&file, kind) {
                Ok(()) => {
                    return Ok(FileLock {
                        file,
                        path: path.to_path_buf(),
                        kind,
                    });
                }
                Err(e) if is_lock_contended(&e) => {
                    let elapsed = start.elapsed();
                    if elapsed >= timeout {
                        return Err(Error::LockTimeout);
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL.min(timeout - elapsed));
                }
                Err(e) => {
                    return Err(Error::Io(e));
                }
            }
        }
    }

    /// Acquire a lock without timeout (blocking)
    pub fn acquire_blocking(path: impl AsRef<Path>, kind: LockKind) -> Result<Self> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;

        match kind {
            LockKind::Exclusive => FileExt::lock_exclusive(&file)?,
            LockKind::Shared => FileExt::lock_shared(&file)?,
        }

        Ok(FileLock {
            file,
            path: path.to_path_buf(),
            kind,
        })
    }

    /// Try to acquire a lock without waiting
    ///
    /// Returns `Ok(Some(lock))` if acquired, `Ok(None)` if would block,
    /// or `Err` for other errors.
    pub fn try_acquire(path: impl AsRef<Path>, kind: LockKind) -> Result<Option<Self>> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;

        match try_lock(&file, kind) {
            Ok(()) => Ok(Some(FileLock {
                file,
                path: path.to_path_buf(),
                kind,
            })),
            Err(e) if is_lock_contended(&e) => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Lock mode held by this guard
    pub fn kind(&self) -> LockKind {
        self.kind
    }
}

impl fmt::Debug for FileLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileLock")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Unlock the file - ignore errors during drop
        let _ = FileExt::unlock(&self.file);
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

// Qualified calls: newer std has inherent `File` lock methods with other signatures.
fn try_lock(file: &File, kind: LockKind) -> io::Result<()> {
    match kind {
        LockKind::Exclusive => FileExt::try_lock_exclusive(file),
        LockKind::Shared => FileExt::try_lock_shared(file),
    }
}

/// Atomically write data to a file
///
/// This writes to a temporary file in the same directory, then renames
/// it over the target path. Readers observe either the old or the new
/// content, never a mix. The temp file is removed if any step fails.
///
/// Note: This does NOT acquire a lock.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?; // Ensure data is flushed to disk

    // Atomic rename
    temp.persist(path).map_err(|e| Error::Io(e.error))?;

    Ok(())
}
