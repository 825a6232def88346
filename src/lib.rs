//! tick - Task Tracker Library
//!
//! This library provides the storage engine behind the tick CLI: a JSONL
//! file as the source of truth, with a SQLite cache for queries.
//!
//! # Core Concepts
//!
//! - **Source of truth**: `.tick/tasks.jsonl`, one task per line, rewritten atomically
//! - **Cache**: `.tick/cache.db`, rebuilt whenever the JSONL hash changes
//! - **Locking**: `.tick/lock`, shared for reads and exclusive for writes
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `.tick/config.toml`
//! - `error`: Error types and result aliases
//! - `engine`: Query and mutate flows tying lock, file and cache together
//! - `cache`: SQLite cache schema, freshness and rebuild
//! - `doctor`: Read-only health checks over `.tick/`
//! - `query`: Listing and lookup SQL over the cache
//! - `jsonl`: Task file parsing and serialization
//! - `fingerprint`: Content hashing for cache freshness
//! - `lock`: File locking and atomic writes
//! - `storage`: `.tick/` directory layout and discovery
//! - `task`: Task model, IDs, validation and status transitions
//! - `verbose`: Checkpoint logger for `--verbose`

pub mod cache;
pub mod cli;
pub mod config;
pub mod doctor;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod jsonl;
pub mod lock;
pub mod output;
pub mod query;
pub mod storage;
pub mod task;
pub mod verbose;

pub use engine::{Store, StoreOptions};
pub use error::{Error, Result};
