//! Task command implementations
//!
//! Writes go through [`Store::mutate`]; listings and detail views are SQL
//! over the cache via [`Store::query`].

use std::collections::HashSet;
use std::io::{self, BufRead, Write};

use serde::Serialize;

use crate::engine::Store;
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::query::{self, ListFilter, Readiness, TaskDetail, TaskRow};
use crate::task::{self, normalize_id, validate_dependency, Status, Task, TaskOptions, Transition};

pub struct CreateOptions {
    pub title: String,
    pub priority: Option<i64>,
    pub description: Option<String>,
    pub blocked_by: Vec<String>,
    pub parent: Option<String>,
}

pub struct UpdateOptions {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i64>,
    /// `Some("")` clears the parent.
    pub parent: Option<String>,
    /// Replaces the whole list when given.
    pub blocked_by: Option<Vec<String>>,
    pub blocks: Vec<String>,
}

pub struct ListOptions {
    pub status: Option<String>,
    pub priority: Option<i64>,
    pub ready: bool,
    pub blocked: bool,
}

#[derive(Serialize)]
struct TaskListOutput {
    total: usize,
    tasks: Vec<TaskRow>,
}

#[derive(Serialize)]
struct TransitionOutput {
    id: String,
    from: Status,
    to: Status,
}

#[derive(Serialize)]
struct RemovedTask {
    id: String,
    title: String,
}

#[derive(Serialize)]
struct RemoveOutput {
    removed: Vec<RemovedTask>,
    deps_updated: Vec<String>,
}

#[derive(Serialize)]
struct RebuildOutput {
    tasks: usize,
}

pub fn run_create(store: &Store, options: CreateOptions, output: OutputOptions) -> Result<()> {
    let blocked_by = task::dedupe_ids(&options.blocked_by);
    let parent = options
        .parent
        .as_deref()
        .map(normalize_id)
        .filter(|id| !id.is_empty());

    let mut created = None;
    store.mutate(|mut tasks| {
        let known = known_ids(&tasks);
        ensure_known(&known, blocked_by.iter().chain(parent.iter()))?;

        let task = Task::new(
            &options.title,
            TaskOptions {
                priority: options.priority,
                description: options.description,
                blocked_by: blocked_by.clone(),
                parent: parent.clone(),
            },
            |candidate| known.contains(candidate),
        )?;

        // Checked against the graph that includes the new task, so its parent is known.
        let id = task.id.clone();
        tasks.push(task);
        for blocker in &blocked_by {
            validate_dependency(&tasks, &id, blocker)?;
        }

        created = tasks.last().cloned();
        Ok(tasks)
    })?;

    let task = created.ok_or_else(|| Error::OperationFailed("task was not created".to_string()))?;
    tracing::info!(id = %task.id, "task created");

    let mut human = HumanOutput::new("Task created");
    human.push_summary("ID", task.id.clone());
    human.push_summary("Title", task.title.clone());
    human.push_summary("Priority", task.priority.to_string());
    if !task.blocked_by.is_empty() {
        human.push_summary("Blocked by", task.blocked_by.join(", "));
    }
    if let Some(parent) = task.parent.as_deref() {
        human.push_summary("Parent", parent);
    }

    emit_success(output, "create", &task, Some(&human))
}

pub fn run_list(store: &Store, options: ListOptions, output: OutputOptions) -> Result<()> {
    let filter = ListFilter {
        status: options.status.as_deref().map(str::parse::<Status>).transpose()?,
        priority: options.priority,
        readiness: match (options.ready, options.blocked) {
            (true, _) => Readiness::Ready,
            (false, true) => Readiness::Blocked,
            (false, false) => Readiness::Any,
        },
    };
    if let Some(priority) = filter.priority {
        task::validate_priority(priority)?;
    }

    let tasks = store.query(|conn| query::list_tasks(conn, &filter))?;

    let header = match filter.readiness {
        Readiness::Any => "Tasks",
        Readiness::Ready => "Ready tasks",
        Readiness::Blocked => "Blocked tasks",
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("Total", tasks.len().to_string());
    for row in &tasks {
        human.push_detail(format!(
            "[{}][{}] {} {}",
            row.status, row.priority, row.id, row.title
        ));
    }

    let data = TaskListOutput {
        total: tasks.len(),
        tasks,
    };
    emit_success(output, "list", &data, Some(&human))
}

pub fn run_show(store: &Store, id: &str, output: OutputOptions) -> Result<()> {
    let detail = store.query(|conn| query::find_task(conn, id))?;

    let mut human = HumanOutput::new(format!("{}: {}", detail.id, detail.title));
    push_detail_summary(&mut human, &detail);

    emit_success(output, "show", &detail, Some(&human))
}

pub fn run_transition(
    store: &Store,
    id: &str,
    action: Transition,
    output: OutputOptions,
) -> Result<()> {
    let wanted = normalize_id(id);
    let mut result = None;

    store.mutate(|mut tasks| {
        let task = tasks
            .iter_mut()
            .find(|t| normalize_id(&t.id) == wanted)
            .ok_or_else(|| Error::TaskNotFound(wanted.clone()))?;
        let (from, to) = task::transition(task, action)?;
        result = Some(TransitionOutput {
            id: task.id.clone(),
            from,
            to,
        });
        Ok(tasks)
    })?;

    let result =
        result.ok_or_else(|| Error::OperationFailed("transition was not applied".to_string()))?;
    tracing::info!(id = %result.id, from = %result.from, to = %result.to, "task transitioned");

    let mut human = HumanOutput::new(format!("{} {} -> {}", result.id, result.from, result.to));
    human.push_summary("Action", action.as_str());

    emit_success(output, action.as_str(), &result, Some(&human))
}

pub fn run_update(store: &Store, options: UpdateOptions, output: OutputOptions) -> Result<()> {
    if options.title.is_none()
        && options.description.is_none()
        && options.priority.is_none()
        && options.parent.is_none()
        && options.blocked_by.is_none()
        && options.blocks.is_empty()
    {
        return Err(Error::InvalidArgument(
            "at least one flag is required: --title, --description, --priority, --parent, --blocked-by, --blocks"
                .to_string(),
        ));
    }

    let id = normalize_id(&options.id);
    let title = options.title.as_deref().map(task::validate_title).transpose()?;
    if let Some(priority) = options.priority {
        task::validate_priority(priority)?;
    }
    let parent = options.parent.as_deref().map(normalize_id);
    if let Some(parent) = parent.as_deref() {
        task::validate_parent(&id, parent)?;
    }
    let blocked_by = options.blocked_by.as_deref().map(task::dedupe_ids);
    let blocks = task::dedupe_ids(&options.blocks);

    let mut updated = None;
    store.mutate(|mut tasks| {
        let idx = index_of(&tasks, &id)?;
        let known = known_ids(&tasks);
        ensure_known(
            &known,
            parent
                .iter()
                .filter(|p| !p.is_empty())
                .chain(blocked_by.iter().flatten())
                .chain(blocks.iter()),
        )?;

        let now = task::now();
        {
            let task = &mut tasks[idx];
            if let Some(title) = &title {
                task.title = title.clone();
            }
            if let Some(description) = &options.description {
                task.description = Some(description.clone()).filter(|d| !d.trim().is_empty());
            }
            if let Some(priority) = options.priority {
                task.priority = priority;
            }
            if let Some(parent) = &parent {
                task.parent = Some(parent.clone()).filter(|p| !p.is_empty());
            }
        }

        match &blocked_by {
            Some(list) => {
                tasks[idx].blocked_by.clear();
                for blocker in list {
                    validate_dependency(&tasks, &id, blocker)?;
                    tasks[idx].blocked_by.push(blocker.clone());
                }
            }
            None => {
                if let Some(parent) = parent.as_deref().filter(|p| !p.is_empty()) {
                    if tasks[idx].blocked_by.iter().any(|dep| normalize_id(dep) == parent) {
                        return Err(Error::InvalidArgument(format!(
                            "task {} cannot be blocked by its parent {}",
                            id, parent
                        )));
                    }
                }
            }
        }

        for target in &blocks {
            let target_idx = index_of(&tasks, target)?;
            if tasks[target_idx]
                .blocked_by
                .iter()
                .any(|dep| normalize_id(dep) == id)
            {
                continue;
            }
            validate_dependency(&tasks, target, &id)?;
            let blocked = &mut tasks[target_idx];
            blocked.blocked_by.push(id.clone());
            blocked.updated = now;
        }

        tasks[idx].updated = now;
        updated = Some(tasks[idx].clone());
        Ok(tasks)
    })?;

    let task = updated.ok_or_else(|| Error::OperationFailed("task was not updated".to_string()))?;
    tracing::info!(id = %task.id, "task updated");

    let mut human = HumanOutput::new("Task updated");
    human.push_summary("ID", task.id.clone());
    human.push_summary("Title", task.title.clone());
    human.push_summary("Status", task.status.to_string());
    human.push_summary("Priority", task.priority.to_string());
    if !task.blocked_by.is_empty() {
        human.push_summary("Blocked by", task.blocked_by.join(", "));
    }
    if let Some(parent) = task.parent.as_deref() {
        human.push_summary("Parent", parent);
    }
    for target in &blocks {
        human.push_detail(format!("{} is now blocked by {}", target, task.id));
    }

    emit_success(output, "update", &task, Some(&human))
}

/// Remove tasks, then strip them from the survivors' blockers and parents.
///
/// Without `force` every task is confirmed on stdin first; a single "no"
/// aborts before anything is written.
pub fn run_remove(store: &Store, ids: &[String], force: bool, output: OutputOptions) -> Result<()> {
    let ids = task::dedupe_ids(ids);
    if ids.is_empty() {
        return Err(Error::InvalidArgument("at least one task ID is required".to_string()));
    }

    if !force {
        let tasks = store.read_tasks()?;
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut prompt = io::stderr();
        for id in &ids {
            let task = &tasks[index_of(&tasks, id)?];
            if !confirm_removal(&mut input, &mut prompt, &task.id, &task.title)? {
                return Err(Error::Aborted);
            }
        }
    }

    let mut result = None;
    store.mutate(|tasks| {
        let known = known_ids(&tasks);
        ensure_known(&known, ids.iter())?;

        let (removed, mut kept): (Vec<Task>, Vec<Task>) = tasks
            .into_iter()
            .partition(|t| ids.contains(&normalize_id(&t.id)));

        let mut deps_updated = Vec::new();
        for task in &mut kept {
            let before = task.blocked_by.len();
            task.blocked_by.retain(|dep| !ids.contains(&normalize_id(dep)));
            let orphaned = task
                .parent
                .as_deref()
                .map_or(false, |parent| ids.contains(&normalize_id(parent)));
            if orphaned {
                task.parent = None;
            }
            if orphaned || task.blocked_by.len() != before {
                deps_updated.push(task.id.clone());
            }
        }

        result = Some(RemoveOutput {
            removed: removed
                .into_iter()
                .map(|t| RemovedTask {
                    id: t.id,
                    title: t.title,
                })
                .collect(),
            deps_updated,
        });
        Ok(kept)
    })?;

    let result = result.ok_or_else(|| Error::OperationFailed("nothing was removed".to_string()))?;
    tracing::info!(removed = result.removed.len(), "tasks removed");

    let mut human = HumanOutput::new(format!("Removed {} task(s)", result.removed.len()));
    for task in &result.removed {
        human.push_detail(format!("  {} {}", task.id, task.title));
    }
    if !result.deps_updated.is_empty() {
        human.push_summary("Updated", result.deps_updated.join(", "));
    }

    emit_success(output, "remove", &result, Some(&human))
}

/// Ask whether to remove one task. Only "y" or "yes" confirm.
fn confirm_removal<R: BufRead, W: Write>(
    input: &mut R,
    prompt: &mut W,
    id: &str,
    title: &str,
) -> Result<bool> {
    write!(prompt, "Remove task {} {:?}? [y/N] ", id, title)?;
    prompt.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

pub fn run_rebuild(store: &Store, output: OutputOptions) -> Result<()> {
    let count = store.rebuild()?;

    let mut human = HumanOutput::new("Cache rebuilt");
    human.push_summary("Tasks", count.to_string());

    emit_success(output, "rebuild", &RebuildOutput { tasks: count }, Some(&human))
}

fn known_ids(tasks: &[Task]) -> HashSet<String> {
    tasks.iter().map(|t| normalize_id(&t.id)).collect()
}

fn ensure_known<'a>(known: &HashSet<String>, ids: impl IntoIterator<Item = &'a String>) -> Result<()> {
    for id in ids {
        if !known.contains(id) {
            return Err(Error::TaskNotFound(id.clone()));
        }
    }
    Ok(())
}

fn index_of(tasks: &[Task], id: &str) -> Result<usize> {
    tasks
        .iter()
        .position(|t| normalize_id(&t.id) == id)
        .ok_or_else(|| Error::TaskNotFound(id.to_string()))
}

fn push_detail_summary(human: &mut HumanOutput, detail: &TaskDetail) {
    human.push_summary("Status", detail.status.clone());
    human.push_summary("Priority", detail.priority.to_string());
    if let Some(parent) = detail.parent.as_deref() {
        human.push_summary("Parent", parent);
    }
    human.push_summary("Created", detail.created.clone());
    human.push_summary("Updated", detail.updated.clone());
    if let Some(closed) = detail.closed.as_deref() {
        human.push_summary("Closed", closed);
    }
    if let Some(description) = detail.description.as_deref() {
        human.push_detail(description);
    }
    if !detail.blocked_by.is_empty() {
        human.push_detail("Blocked by:");
        for row in &detail.blocked_by {
            human.push_detail(format!("  {} [{}] {}", row.id, row.status, row.title));
        }
    }
    if !detail.children.is_empty() {
        human.push_detail("Children:");
        for row in &detail.children {
            human.push_detail(format!("  {} [{}] {}", row.id, row.status, row.title));
        }
    }
}
