//! Read-side SQL over the task cache.
//!
//! A task is *ready* when it is open, every blocker is closed (done or
//! cancelled) and it has no open or in-progress children. *Blocked* is open
//! and not ready. Listings are ordered by priority, then creation time.

use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::task::{normalize_id, Status};

const UNCLOSED_BLOCKERS: &str = "EXISTS (
    SELECT 1 FROM dependencies d
    JOIN tasks blocker ON blocker.id = d.blocked_by
    WHERE d.task_id = t.id
      AND blocker.status NOT IN ('done', 'cancelled')
)";

const OPEN_CHILDREN: &str = "EXISTS (
    SELECT 1 FROM tasks child
    WHERE child.parent = t.id
      AND child.status IN ('open', 'in_progress')
)";

/// Which subset of tasks to list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Readiness {
    #[default]
    Any,
    Ready,
    Blocked,
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<Status>,
    pub priority: Option<i64>,
    pub readiness: Readiness,
}

/// One row of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRow {
    pub id: String,
    pub status: String,
    pub priority: i64,
    pub title: String,
}

/// Full detail for a single task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDetail {
    pub id: String,
    pub title: String,
    pub status: String,
    pub priority: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub created: String,
    pub updated: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<TaskRow>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TaskRow>,
}

fn ready_conditions() -> Vec<String> {
    vec![
        "t.status = 'open'".to_string(),
        format!("NOT {}", UNCLOSED_BLOCKERS),
        format!("NOT {}", OPEN_CHILDREN),
    ]
}

fn blocked_conditions() -> Vec<String> {
    vec![
        "t.status = 'open'".to_string(),
        format!("({} OR {})", UNCLOSED_BLOCKERS, OPEN_CHILDREN),
    ]
}

fn task_row(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        status: row.get(1)?,
        priority: row.get(2)?,
        title: row.get(3)?,
    })
}

pub fn list_tasks(conn: &Connection, filter: &ListFilter) -> Result<Vec<TaskRow>> {
    let mut conditions = match filter.readiness {
        Readiness::Any => Vec::new(),
        Readiness::Ready => ready_conditions(),
        Readiness::Blocked => blocked_conditions(),
    };
    let mut args: Vec<rusqlite::types::Value> = Vec::new();

    if let Some(status) = filter.status {
        conditions.push(format!("t.status = ?{}", args.len() + 1));
        args.push(status.as_str().to_string().into());
    }
    if let Some(priority) = filter.priority {
        conditions.push(format!("t.priority = ?{}", args.len() + 1));
        args.push(priority.into());
    }

    let mut sql = "SELECT t.id, t.status, t.priority, t.title FROM tasks t".to_string();
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY t.priority ASC, t.created ASC, t.id ASC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(args), task_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn count_tasks(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?)
}

/// Look up a task by (case-insensitive) ID, including blockers and children.
pub fn find_task(conn: &Connection, id: &str) -> Result<TaskDetail> {
    let id = normalize_id(id);
    let detail = conn
        .query_row(
            "SELECT id, title, status, priority, description, parent, created, updated, closed
             FROM tasks WHERE lower(id) = ?1",
            [&id],
            |row| {
                Ok(TaskDetail {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    status: row.get(2)?,
                    priority: row.get(3)?,
                    description: row.get(4)?,
                    parent: row.get(5)?,
                    created: row.get(6)?,
                    updated: row.get(7)?,
                    closed: row.get(8)?,
                    blocked_by: Vec::new(),
                    children: Vec::new(),
                })
            },
        )
        .optional()?;
    let mut detail = detail.ok_or_else(|| Error::TaskNotFound(id.clone()))?;

    // Blockers missing from the cache still show up, with an empty title.
    let mut stmt = conn.prepare(
        "SELECT d.blocked_by, COALESCE(b.status, ''), COALESCE(b.priority, 0), COALESCE(b.title, '')
         FROM dependencies d LEFT JOIN tasks b ON b.id = d.blocked_by
         WHERE d.task_id = ?1 ORDER BY d.position",
    )?;
    detail.blocked_by = stmt
        .query_map([&detail.id], task_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT id, status, priority, title FROM tasks
         WHERE parent = ?1 ORDER BY priority ASC, created ASC",
    )?;
    detail.children = stmt
        .query_map([&detail.id], task_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(detail)
}
