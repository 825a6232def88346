//! tick - a minimal task tracker
//!
//! Tasks are stored in `.tick/tasks.jsonl` and queried through a SQLite
//! cache that is rebuilt whenever the file changes.

use clap::Parser;
use tick::cli::Cli;
use tick::output::{emit_error, infer_command_name_from_args};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    // Tracing is opt-in via RUST_LOG and always goes to stderr.
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|raw| {
            let raw = raw.trim();
            if raw.is_empty() || raw.len() > 4096 {
                return None;
            }
            EnvFilter::try_new(raw).ok()
        })
        .unwrap_or_else(|| EnvFilter::new("off"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let command = infer_command_name_from_args();
    let cli = Cli::parse();
    let json = cli.json;
    if let Err(err) = cli.run() {
        if !err.already_reported() {
            let _ = emit_error(&command, &err, json);
        }
        std::process::exit(err.exit_code());
    }
}
