//! JSONL codec for `tasks.jsonl`.
//!
//! One task per line, compact JSON, `\n` terminated. Blank lines are skipped
//! on read; an unparseable line fails the whole read.

use std::path::Path;

use crate::error::{Error, Result};
use crate::lock;
use crate::task::Task;

/// Parse tasks from raw file bytes.
pub fn parse_tasks(data: &[u8]) -> Result<Vec<Task>> {
    let text = std::str::from_utf8(data).map_err(|e| Error::Parse {
        line: line_of_offset(data, e.valid_up_to()),
        message: format!("invalid UTF-8: {}", e),
    })?;

    let mut tasks = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let task: Task = serde_json::from_str(line).map_err(|e| Error::Parse {
            line: idx + 1,
            message: e.to_string(),
        })?;
        tasks.push(task);
    }

    Ok(tasks)
}

/// Serialize tasks to JSONL bytes.
pub fn serialize_tasks(tasks: &[Task]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for task in tasks {
        serde_json::to_writer(&mut out, task)?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Serialize and atomically replace the file at `path`.
pub fn write_tasks(path: impl AsRef<Path>, tasks: &[Task]) -> Result<()> {
    let data = serialize_tasks(tasks)?;
    lock::write_atomic(path, &data)
}

fn line_of_offset(data: &[u8], offset: usize) -> usize {
    data[..offset].iter().filter(|b| **b == b'\n').count() + 1
}
