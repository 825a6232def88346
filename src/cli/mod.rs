//! Command-line interface for tick
//!
//! This module defines the CLI structure using clap derive macros.
//! Command implementations live in submodules.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::engine::{Store, StoreOptions};
use crate::error::{Error, Result};
use crate::output::OutputOptions;
use crate::storage::TickDir;
use crate::task::Transition;
use crate::verbose::VerboseLogger;

mod dep;
mod doctor;
mod init;
mod task;

/// tick - a minimal task tracker
///
/// Tasks live in `.tick/tasks.jsonl`; reads go through a SQLite cache that
/// rebuilds itself whenever the JSONL file changes.
#[derive(Parser, Debug)]
#[command(name = "tick")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory to run in (defaults to current directory)
    #[arg(long, global = true, env = "TICK_DIR")]
    pub dir: Option<PathBuf>,

    /// How long to wait for .tick/lock, in milliseconds
    #[arg(long, global = true, env = "TICK_LOCK_TIMEOUT_MS")]
    pub lock_timeout_ms: Option<u64>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Echo lock, cache and write checkpoints to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize tick in the current directory
    Init,

    /// Create a task
    Create {
        /// Task title
        title: String,

        /// Priority from 0 (highest) to 4
        #[arg(short, long)]
        priority: Option<i64>,

        /// Free-form description
        #[arg(short, long)]
        description: Option<String>,

        /// Tasks this one is blocked by (comma separated)
        #[arg(long, value_delimiter = ',')]
        blocked_by: Vec<String>,

        /// Parent task
        #[arg(long)]
        parent: Option<String>,
    },

    /// List tasks
    List {
        /// Only tasks with this status: open, in_progress, done, cancelled
        #[arg(long)]
        status: Option<String>,

        /// Only tasks with this priority
        #[arg(long)]
        priority: Option<i64>,

        /// Only tasks that can be worked on now
        #[arg(long, conflicts_with = "blocked")]
        ready: bool,

        /// Only open tasks waiting on blockers or children
        #[arg(long)]
        blocked: bool,
    },

    /// Show a task
    Show {
        /// Task ID
        id: String,
    },

    /// Mark a task in progress
    Start { id: String },

    /// Mark a task done
    Done { id: String },

    /// Cancel a task
    Cancel { id: String },

    /// Reopen a done or cancelled task
    Reopen { id: String },

    /// Change a task's fields or relationships
    Update {
        /// Task ID
        id: String,

        /// New title
        #[arg(long)]
        title: Option<String>,

        /// New description ("" clears it)
        #[arg(short, long)]
        description: Option<String>,

        /// New priority from 0 (highest) to 4
        #[arg(short, long)]
        priority: Option<i64>,

        /// New parent task ("" clears it)
        #[arg(long)]
        parent: Option<String>,

        /// Replace the tasks this one is blocked by (comma separated, "" clears)
        #[arg(long, value_delimiter = ',')]
        blocked_by: Option<Vec<String>>,

        /// Tasks that become blocked by this one (comma separated)
        #[arg(long, value_delimiter = ',')]
        blocks: Vec<String>,
    },

    /// Manage dependencies between tasks
    #[command(subcommand)]
    Dep(DepCommands),

    /// Remove tasks and drop them from other tasks' blockers
    Remove {
        /// Task IDs to remove
        #[arg(required = true)]
        ids: Vec<String>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Check tasks.jsonl and the cache for problems (read-only)
    Doctor,

    /// Rebuild the SQLite cache from tasks.jsonl
    Rebuild,
}

/// Dependency subcommands
#[derive(Subcommand, Debug)]
pub enum DepCommands {
    /// Mark a task as blocked by another
    Add {
        /// Task that waits
        task: String,

        /// Task it waits on
        blocked_by: String,
    },

    /// Remove a blocker from a task
    Rm {
        /// Task that waits
        task: String,

        /// Blocker to remove
        blocked_by: String,
    },
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let Cli {
            dir,
            lock_timeout_ms,
            json,
            quiet,
            verbose,
            command,
        } = self;
        let output = OutputOptions { json, quiet };
        let start = match dir {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };

        if let Commands::Init = command {
            return init::run(&start, output);
        }

        let store = open_store(&start, lock_timeout_ms, verbose)?;
        match command {
            Commands::Init => init::run(&start, output),
            Commands::Create {
                title,
                priority,
                description,
                blocked_by,
                parent,
            } => task::run_create(
                &store,
                task::CreateOptions {
                    title,
                    priority,
                    description,
                    blocked_by,
                    parent,
                },
                output,
            ),
            Commands::List {
                status,
                priority,
                ready,
                blocked,
            } => task::run_list(
                &store,
                task::ListOptions {
                    status,
                    priority,
                    ready,
                    blocked,
                },
                output,
            ),
            Commands::Show { id } => task::run_show(&store, &id, output),
            Commands::Start { id } => task::run_transition(&store, &id, Transition::Start, output),
            Commands::Done { id } => task::run_transition(&store, &id, Transition::Done, output),
            Commands::Cancel { id } => task::run_transition(&store, &id, Transition::Cancel, output),
            Commands::Reopen { id } => task::run_transition(&store, &id, Transition::Reopen, output),
            Commands::Update {
                id,
                title,
                description,
                priority,
                parent,
                blocked_by,
                blocks,
            } => task::run_update(
                &store,
                task::UpdateOptions {
                    id,
                    title,
                    description,
                    priority,
                    parent,
                    blocked_by,
                    blocks,
                },
                output,
            ),
            Commands::Dep(cmd) => match cmd {
                DepCommands::Add { task, blocked_by } => {
                    dep::run_add(&store, &task, &blocked_by, output)
                }
                DepCommands::Rm { task, blocked_by } => {
                    dep::run_rm(&store, &task, &blocked_by, output)
                }
            },
            Commands::Remove { ids, force } => task::run_remove(&store, &ids, force, output),
            Commands::Doctor => doctor::run(&store, output),
            Commands::Rebuild => task::run_rebuild(&store, output),
        }
    }
}

/// Find `.tick/` above `start` and open it. Flags win over `config.toml`.
fn open_store(start: &Path, lock_timeout_ms: Option<u64>, verbose: bool) -> Result<Store> {
    let dir = TickDir::discover(start)?;
    let config = Config::load_from_dir(dir.root())?;

    let lock_timeout = match lock_timeout_ms {
        Some(0) => {
            return Err(Error::InvalidArgument(
                "--lock-timeout-ms must be greater than zero".to_string(),
            ))
        }
        Some(ms) => Duration::from_millis(ms),
        None => config.lock_timeout(),
    };
    let verbose = VerboseLogger::stderr(verbose || config.verbose);

    Store::open(
        dir.root(),
        StoreOptions::new().lock_timeout(lock_timeout).verbose(verbose),
    )
}
