//! tick init command implementation
//!
//! Creates `.tick/` with an empty `tasks.jsonl`.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::storage::TickDir;

#[derive(serde::Serialize)]
struct InitReport {
    dir: PathBuf,
    tasks_file: PathBuf,
}

pub fn run(project_dir: &Path, output: OutputOptions) -> Result<()> {
    let dir = TickDir::init(project_dir)?;
    tracing::info!(dir = %dir.root().display(), "initialized tick directory");

    let report = InitReport {
        dir: dir.root().to_path_buf(),
        tasks_file: dir.tasks_file(),
    };

    let mut human = HumanOutput::new("Initialized tick");
    human.push_summary("Directory", report.dir.display().to_string());
    human.push_summary("Tasks", report.tasks_file.display().to_string());

    emit_success(output, "init", &report, Some(&human))
}
