//! tick dep command implementation
//!
//! `dep add` runs the same cycle and parent checks as `create`, against the
//! graph as it is at write time.

use serde::Serialize;

use crate::engine::Store;
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::task::{normalize_id, now, validate_dependency, Task};

#[derive(Serialize)]
struct DepOutput {
    task: String,
    blocked_by: String,
    action: &'static str,
}

pub fn run_add(store: &Store, task_id: &str, blocker_id: &str, output: OutputOptions) -> Result<()> {
    let task_key = normalize_id(task_id);
    let blocker_key = normalize_id(blocker_id);

    store.mutate(|mut tasks| {
        let idx = index_of(&tasks, &task_key)?;
        index_of(&tasks, &blocker_key)?;

        if tasks[idx]
            .blocked_by
            .iter()
            .any(|dep| normalize_id(dep) == blocker_key)
        {
            return Err(Error::InvalidArgument(format!(
                "dependency already exists: {} is already blocked by {}",
                task_key, blocker_key
            )));
        }
        validate_dependency(&tasks, &task_key, &blocker_key)?;

        let task = &mut tasks[idx];
        task.blocked_by.push(blocker_key.clone());
        task.updated = now();
        Ok(tasks)
    })?;

    tracing::info!(task = %task_key, blocked_by = %blocker_key, "dependency added");
    let human = HumanOutput::new(format!(
        "Dependency added: {} blocked by {}",
        task_key, blocker_key
    ));
    let data = DepOutput {
        task: task_key,
        blocked_by: blocker_key,
        action: "added",
    };
    emit_success(output, "dep", &data, Some(&human))
}

/// The blocker itself need not exist, so dangling references can be cleaned up.
pub fn run_rm(store: &Store, task_id: &str, blocker_id: &str, output: OutputOptions) -> Result<()> {
    let task_key = normalize_id(task_id);
    let blocker_key = normalize_id(blocker_id);

    store.mutate(|mut tasks| {
        let idx = index_of(&tasks, &task_key)?;
        let task = &mut tasks[idx];

        let before = task.blocked_by.len();
        task.blocked_by.retain(|dep| normalize_id(dep) != blocker_key);
        if task.blocked_by.len() == before {
            return Err(Error::InvalidArgument(format!(
                "{} is not a dependency of {}",
                blocker_key, task_key
            )));
        }
        task.updated = now();
        Ok(tasks)
    })?;

    tracing::info!(task = %task_key, blocked_by = %blocker_key, "dependency removed");
    let human = HumanOutput::new(format!(
        "Dependency removed: {} no longer blocked by {}",
        task_key, blocker_key
    ));
    let data = DepOutput {
        task: task_key,
        blocked_by: blocker_key,
        action: "removed",
    };
    emit_success(output, "dep", &data, Some(&human))
}

fn index_of(tasks: &[Task], key: &str) -> Result<usize> {
    tasks
        .iter()
        .position(|t| normalize_id(&t.id) == key)
        .ok_or_else(|| Error::TaskNotFound(key.to_string()))
}
