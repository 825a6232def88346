//! Task model for tick.
//!
//! Tasks are stored one per line in `.tick/tasks.jsonl`. The storage engine
//! persists them without interpreting most fields; this module owns field
//! validation, ID generation, status transitions and dependency checks.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};

const ID_PREFIX: &str = "tick-";
const ID_HEX_LEN: usize = 6;
const MAX_ID_RETRIES: usize = 5;
const MAX_TITLE_LEN: usize = 500;
pub const MIN_PRIORITY: i64 = 0;
pub const MAX_PRIORITY: i64 = 4;
pub const DEFAULT_PRIORITY: i64 = 2;

/// Canonical textual timestamp format, UTC with second precision.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Open,
    InProgress,
    Done,
    Cancelled,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Open,
        Status::InProgress,
        Status::Done,
        Status::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::InProgress => "in_progress",
            Status::Done => "done",
            Status::Cancelled => "cancelled",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Status::Done | Status::Cancelled)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        Status::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == value.trim())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "invalid status '{}': must be one of open, in_progress, done, cancelled",
                    value
                ))
            })
    }
}

/// A single work item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: Status,
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_text")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_text")]
    pub parent: Option<String>,
    #[serde(with = "timestamp")]
    pub created: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_timestamp")]
    pub closed: Option<DateTime<Utc>>,
}

/// Optional fields accepted by [`Task::new`].
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub priority: Option<i64>,
    pub description: Option<String>,
    pub blocked_by: Vec<String>,
    pub parent: Option<String>,
}

impl Task {
    /// Build a new open task with a freshly generated ID.
    ///
    /// `exists` reports whether a candidate ID is already taken.
    pub fn new<F>(title: &str, options: TaskOptions, exists: F) -> Result<Self>
    where
        F: Fn(&str) -> bool,
    {
        let title = validate_title(title)?;
        let id = generate_id(exists)?;

        let priority = options.priority.unwrap_or(DEFAULT_PRIORITY);
        validate_priority(priority)?;
        let blocked_by = dedupe_ids(&options.blocked_by);
        validate_blocked_by(&id, &blocked_by)?;
        if let Some(parent) = options.parent.as_deref() {
            validate_parent(&id, parent)?;
        }

        let now = now();
        Ok(Self {
            id,
            title,
            status: Status::Open,
            priority,
            description: options.description.filter(|d| !d.trim().is_empty()),
            blocked_by,
            parent: options.parent.filter(|p| !p.is_empty()),
            created: now,
            updated: now,
            closed: None,
        })
    }
}

/// Current time truncated to whole seconds, matching the on-disk precision.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Render a timestamp in the canonical format.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a canonical (or any RFC 3339) timestamp into UTC.
pub fn parse_timestamp(value: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc).trunc_subsecs(0))
}

mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_timestamp(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

mod opt_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => s.serialize_str(&super::format_timestamp(value)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(raw) if !raw.is_empty() => super::parse_timestamp(&raw)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}

/// Empty strings on disk read back as absent.
mod opt_text {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => s.serialize_str(value),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(Option::<String>::deserialize(d)?.filter(|value| !value.is_empty()))
    }
}

/// Generate an ID of the form `tick-{6 hex chars}`.
///
/// Retries on collision and gives up after a handful of attempts.
pub fn generate_id<F>(exists: F) -> Result<String>
where
    F: Fn(&str) -> bool,
{
    for _ in 0..MAX_ID_RETRIES {
        let random = Ulid::new().random();
        let hex = format!("{:032x}", random);
        let id = format!("{}{}", ID_PREFIX, &hex[hex.len() - ID_HEX_LEN..]);
        if !exists(&id) {
            return Ok(id);
        }
    }

    Err(Error::OperationFailed(format!(
        "Failed to generate unique ID after {} attempts - task list may be too large",
        MAX_ID_RETRIES
    )))
}

/// Whether `id` has the canonical `tick-{6 lowercase hex}` shape.
pub fn is_valid_id(id: &str) -> bool {
    id.strip_prefix(ID_PREFIX).map_or(false, |hex| {
        hex.len() == ID_HEX_LEN && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    })
}

/// IDs match case-insensitively.
pub fn normalize_id(id: &str) -> String {
    id.trim().to_lowercase()
}

/// Normalize a list of IDs, dropping blanks and repeats. First occurrence wins.
pub fn dedupe_ids<S: AsRef<str>>(ids: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(|id| normalize_id(id.as_ref()))
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

pub fn validate_title(title: &str) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidArgument(
            "title is required and cannot be empty".to_string(),
        ));
    }
    if trimmed.contains(['\n', '\r']) {
        return Err(Error::InvalidArgument(
            "title cannot contain newlines".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_TITLE_LEN {
        return Err(Error::InvalidArgument(format!(
            "title exceeds maximum length of {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(trimmed.to_string())
}

pub fn validate_priority(priority: i64) -> Result<()> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(Error::InvalidArgument(format!(
            "priority must be between {} and {}, got {}",
            MIN_PRIORITY, MAX_PRIORITY, priority
        )));
    }
    Ok(())
}

pub fn validate_blocked_by(task_id: &str, blocked_by: &[String]) -> Result<()> {
    let own = normalize_id(task_id);
    if blocked_by.iter().any(|dep| normalize_id(dep) == own) {
        return Err(Error::InvalidArgument(format!(
            "task {} cannot block itself",
            task_id
        )));
    }
    Ok(())
}

pub fn validate_parent(task_id: &str, parent: &str) -> Result<()> {
    if !parent.is_empty() && normalize_id(parent) == normalize_id(task_id) {
        return Err(Error::InvalidArgument(format!(
            "task {} cannot be its own parent",
            task_id
        )));
    }
    Ok(())
}

/// Status-changing actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Done,
    Cancel,
    Reopen,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Done => "done",
            Transition::Cancel => "cancel",
            Transition::Reopen => "reopen",
        }
    }

    fn allowed_from(&self) -> &'static [Status] {
        match self {
            Transition::Start => &[Status::Open],
            Transition::Done | Transition::Cancel => &[Status::Open, Status::InProgress],
            Transition::Reopen => &[Status::Done, Status::Cancelled],
        }
    }

    fn target(&self) -> Status {
        match self {
            Transition::Start => Status::InProgress,
            Transition::Done => Status::Done,
            Transition::Cancel => Status::Cancelled,
            Transition::Reopen => Status::Open,
        }
    }
}

/// Apply a status transition in place, returning `(old, new)`.
///
/// The task is left untouched when the transition is not allowed.
pub fn transition(task: &mut Task, action: Transition) -> Result<(Status, Status)> {
    let old = task.status;
    if !action.allowed_from().contains(&old) {
        return Err(Error::InvalidTransition {
            action: action.as_str().to_string(),
            id: task.id.clone(),
            status: old.to_string(),
        });
    }

    let now = now();
    let new = action.target();
    task.status = new;
    task.updated = now;
    match new {
        Status::Done | Status::Cancelled => task.closed = Some(now),
        Status::Open => task.closed = None,
        Status::InProgress => {}
    }

    Ok((old, new))
}

/// Check that making `task_id` blocked by `blocker_id` keeps the graph sane.
pub fn validate_dependency(tasks: &[Task], task_id: &str, blocker_id: &str) -> Result<()> {
    let target = normalize_id(task_id);
    let start = normalize_id(blocker_id);

    if target == start {
        return Err(Error::InvalidArgument(format!(
            "Cannot add dependency - creates cycle: {} -> {}",
            task_id, task_id
        )));
    }

    let by_id: HashMap<String, &Task> = tasks.iter().map(|t| (normalize_id(&t.id), t)).collect();

    if let Some(task) = by_id.get(&target) {
        if task.parent.as_deref().map(normalize_id).as_deref() == Some(start.as_str()) {
            return Err(Error::InvalidArgument(format!(
                "Cannot add dependency - {} cannot be blocked by its parent {}",
                task_id, blocker_id
            )));
        }
    }

    if let Some(path) = find_path(&by_id, &start, &target) {
        let mut parts = vec![task_id.to_string()];
        parts.extend(
            path.iter()
                .map(|id| by_id.get(id).map(|t| t.id.clone()).unwrap_or_else(|| id.clone())),
        );
        parts.push(task_id.to_string());
        return Err(Error::InvalidArgument(format!(
            "Cannot add dependency - creates cycle: {}",
            parts.join(" -> ")
        )));
    }

    Ok(())
}

/// Depth-first walk along `blocked_by` edges from `start`; returns the path
/// (excluding `target`) when `target` is reachable.
fn find_path(by_id: &HashMap<String, &Task>, start: &str, target: &str) -> Option<Vec<String>> {
    let mut visited = HashSet::new();
    let mut stack = vec![(start.to_string(), vec![start.to_string()])];

    while let Some((id, path)) = stack.pop() {
        if !visited.insert(id.clone()) {
            continue;
        }
        let Some(task) = by_id.get(&id) else {
            continue;
        };
        for dep in &task.blocked_by {
            let dep = normalize_id(dep);
            if dep == target {
                return Some(path);
            }
            if !visited.contains(&dep) {
                let mut next = path.clone();
                next.push(dep.clone());
                stack.push((dep, next));
            }
        }
    }

    None
}
