//! Error types for tick
//!
//! Exit codes:
//! - 0: Success
//! - 1: Declined confirmation, or `tick doctor` found errors
//! - 2: User error (bad args, missing project, invalid transition)
//! - 4: Operation failed (lock contention, I/O, corrupt tasks.jsonl, cache failure)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the tick CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const USER_ERROR: i32 = 2;
    pub const OPERATION_FAILED: i32 = 4;
}

/// User-facing message for lock contention.
pub const LOCK_TIMEOUT_MSG: &str =
    "Could not acquire lock on .tick/lock - another process may be using tick";

/// Main error type for tick operations
#[derive(Error, Debug)]
pub enum Error {
    // Exit code 1
    #[error("Aborted.")]
    Aborted,

    #[error("doctor found {0} error(s)")]
    DoctorFailed(usize),

    // User errors (exit code 2)
    #[error("Not a tick project (no .tick directory found from {0})")]
    NotInitialized(PathBuf),

    #[error("tick already initialized in {0}")]
    AlreadyInitialized(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Cannot {action} task {id} - status is '{status}'")]
    InvalidTransition {
        action: String,
        id: String,
        status: String,
    },

    // Operation failures (exit code 4)
    #[error("{}", LOCK_TIMEOUT_MSG)]
    LockTimeout,

    #[error("Failed to parse task on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Cache rebuild failed: {0}")]
    CacheRebuild(String),

    #[error("Cache is not open")]
    CacheUnavailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Aborted | Error::DoctorFailed(_) => exit_codes::FAILURE,

            // User errors
            Error::NotInitialized(_)
            | Error::AlreadyInitialized(_)
            | Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::TaskNotFound(_)
            | Error::InvalidTransition { .. } => exit_codes::USER_ERROR,

            // Operation failures
            Error::LockTimeout
            | Error::Parse { .. }
            | Error::CacheRebuild(_)
            | Error::CacheUnavailable
            | Error::Io(_)
            | Error::Sqlite(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Short machine-readable kind, used in JSON error output
    pub fn kind(&self) -> &'static str {
        match self {
            Error::LockTimeout => "contention",
            Error::Aborted => "aborted",
            Error::DoctorFailed(_) => "check_failed",
            Error::Io(_) => "io",
            Error::Parse { .. } | Error::Json(_) => "parse",
            Error::CacheRebuild(_) | Error::CacheUnavailable | Error::Sqlite(_) => "cache",
            _ if self.exit_code() == exit_codes::USER_ERROR => "user_error",
            _ => "operation_failed",
        }
    }

    /// Whether the command already printed everything the user needs.
    pub fn already_reported(&self) -> bool {
        matches!(self, Error::DoctorFailed(_))
    }
}

/// Result type alias for tick operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    pub kind: &'static str,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            kind: err.kind(),
        }
    }
}
