//! Read-only health checks over `.tick/`.
//!
//! Every check runs even when an earlier one fails, and each finding is
//! reported on its own line. `tasks.jsonl` is read tolerantly (line by line,
//! as loose JSON) so a single bad line does not hide problems elsewhere.
//! Nothing is repaired and the cache is opened read-only.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::cache::Cache;
use crate::error::Result;
use crate::fingerprint::fingerprint;
use crate::lock::FileLock;
use crate::storage::TickDir;
use crate::task::{is_valid_id, normalize_id, Status};

const MANUAL_FIX: &str = "Manual fix required";
const REBUILD_FIX: &str = "Run `tick rebuild` to refresh cache";
const PREVIEW_LEN: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// Outcome of one check, or one finding of a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<&'static str>,
}

impl CheckResult {
    fn pass(name: &'static str) -> Self {
        Self {
            name,
            passed: true,
            severity: None,
            details: None,
            suggestion: None,
        }
    }

    fn error(name: &'static str, details: String, suggestion: &'static str) -> Self {
        Self {
            name,
            passed: false,
            severity: Some(Severity::Error),
            details: Some(details),
            suggestion: Some(suggestion),
        }
    }

    fn warning(name: &'static str, details: String, suggestion: &'static str) -> Self {
        Self {
            severity: Some(Severity::Warning),
            ..Self::error(name, details, suggestion)
        }
    }
}

/// All findings, in check order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub results: Vec<CheckResult>,
}

impl Report {
    pub fn issue_count(&self) -> usize {
        self.results.iter().filter(|r| !r.passed).count()
    }

    pub fn error_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| !r.passed && r.severity == Some(Severity::Error))
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| !r.passed && r.severity == Some(Severity::Warning))
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Append a check's findings, or a single pass line when it found nothing.
    fn record(&mut self, name: &'static str, findings: Vec<CheckResult>) {
        if findings.is_empty() {
            self.results.push(CheckResult::pass(name));
        } else {
            self.results.extend(findings);
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            if result.passed {
                writeln!(f, "✓ {}: OK", result.name)?;
            } else {
                writeln!(
                    f,
                    "✗ {}: {}",
                    result.name,
                    result.details.as_deref().unwrap_or_default()
                )?;
                if let Some(suggestion) = result.suggestion {
                    writeln!(f, "  → {}", suggestion)?;
                }
            }
        }
        if !self.results.is_empty() {
            writeln!(f)?;
        }

        match self.issue_count() {
            0 => write!(f, "No issues found."),
            1 => write!(f, "1 issue found."),
            n => write!(f, "{} issues found.", n),
        }
    }
}

/// Run every check against `dir` under a shared lock.
pub fn diagnose(dir: &TickDir, lock_timeout: Duration) -> Result<Report> {
    let _lock = FileLock::acquire_shared(dir.lock_file(), lock_timeout)?;
    let data = fs::read(dir.tasks_file())?;
    Ok(run_checks(&dir.cache_file(), &data))
}

/// Run every check against the given `tasks.jsonl` bytes.
pub fn run_checks(cache_path: &Path, data: &[u8]) -> Report {
    let lines = scan_lines(data);
    let records = records(&lines);

    let mut report = Report::default();
    report.record("Cache", check_cache(cache_path, data));
    report.record("JSONL syntax", check_syntax(&lines));
    report.record("ID format", check_id_format(&lines));
    report.record("ID uniqueness", check_id_uniqueness(&lines));
    report.record("Orphaned parents", check_orphaned_parents(&records));
    report.record("Orphaned dependencies", check_orphaned_dependencies(&records));
    report.record("Self-referential dependencies", check_self_references(&records));
    report.record("Dependency cycles", check_cycles(&records));
    report.record("Child blocked by parent", check_child_blocked_by_parent(&records));
    report.record("Parent done with open children", check_done_parents(&records));
    report
}

/// A non-blank line of `tasks.jsonl`.
struct Line<'a> {
    number: usize,
    text: &'a str,
    value: Option<Value>,
}

fn scan_lines(data: &[u8]) -> Vec<Line<'_>> {
    // Split on raw bytes so one invalid UTF-8 line only fails itself.
    data.split(|b| *b == b'\n')
        .enumerate()
        .filter(|(_, raw)| !raw.iter().all(u8::is_ascii_whitespace))
        .map(|(idx, raw)| {
            let (text, value) = match std::str::from_utf8(raw) {
                Ok(text) => (text, serde_json::from_str::<Value>(text.trim()).ok()),
                Err(_) => ("<invalid UTF-8>", None),
            };
            Line {
                number: idx + 1,
                text,
                value,
            }
        })
        .collect()
}

/// The relationship fields of a line that parsed and carries a string ID.
struct Record {
    id: String,
    key: String,
    parent: Option<String>,
    blocked_by: Vec<String>,
    status: Option<Status>,
}

fn records(lines: &[Line<'_>]) -> Vec<Record> {
    lines
        .iter()
        .filter_map(|line| {
            let value = line.value.as_ref()?;
            let id = value.get("id")?.as_str()?.to_string();
            let parent = value
                .get("parent")
                .and_then(Value::as_str)
                .filter(|p| !p.is_empty())
                .map(str::to_string);
            let blocked_by = value
                .get("blocked_by")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            let status = value
                .get("status")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<Status>().ok());
            Some(Record {
                key: normalize_id(&id),
                id,
                parent,
                blocked_by,
                status,
            })
        })
        .collect()
}

fn known_ids(records: &[Record]) -> HashSet<&str> {
    records.iter().map(|r| r.key.as_str()).collect()
}

fn check_cache(cache_path: &Path, data: &[u8]) -> Vec<CheckResult> {
    if !cache_path.exists() {
        return vec![CheckResult::error(
            "Cache",
            "cache.db not found - cache has not been built".to_string(),
            REBUILD_FIX,
        )];
    }

    let stored = Cache::open_read_only(cache_path)
        .and_then(|cache| cache.stored_fingerprint())
        .ok()
        .flatten();
    if stored.as_deref() != Some(fingerprint(data).as_str()) {
        return vec![CheckResult::error(
            "Cache",
            "cache.db is stale - hash mismatch between tasks.jsonl and cache".to_string(),
            REBUILD_FIX,
        )];
    }

    Vec::new()
}

fn check_syntax(lines: &[Line<'_>]) -> Vec<CheckResult> {
    lines
        .iter()
        .filter(|line| line.value.is_none())
        .map(|line| {
            let mut preview: String = line.text.chars().take(PREVIEW_LEN).collect();
            if line.text.chars().count() > PREVIEW_LEN {
                preview.push_str("...");
            }
            CheckResult::error(
                "JSONL syntax",
                format!("Line {}: invalid JSON - {}", line.number, preview),
                MANUAL_FIX,
            )
        })
        .collect()
}

fn check_id_format(lines: &[Line<'_>]) -> Vec<CheckResult> {
    let mut findings = Vec::new();
    for line in lines {
        let Some(value) = line.value.as_ref() else {
            continue;
        };
        let shown = match value.get("id") {
            None => {
                findings.push(CheckResult::error(
                    "ID format",
                    format!("Line {}: missing id field", line.number),
                    MANUAL_FIX,
                ));
                continue;
            }
            Some(Value::String(id)) if is_valid_id(id) => continue,
            Some(Value::String(id)) => id.clone(),
            Some(Value::Null) => "<null>".to_string(),
            Some(other) => other.to_string(),
        };
        findings.push(CheckResult::error(
            "ID format",
            format!(
                "Line {}: invalid ID '{}' - expected format tick-{{6 hex}}",
                line.number, shown
            ),
            MANUAL_FIX,
        ));
    }
    findings
}

fn check_id_uniqueness(lines: &[Line<'_>]) -> Vec<CheckResult> {
    let mut order = Vec::new();
    let mut groups: HashMap<String, Vec<(String, usize)>> = HashMap::new();

    for line in lines {
        let Some(id) = line
            .value
            .as_ref()
            .and_then(|v| v.get("id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        else {
            continue;
        };
        let key = normalize_id(id);
        let group = groups.entry(key.clone()).or_default();
        if group.is_empty() {
            order.push(key);
        }
        group.push((id.to_string(), line.number));
    }

    order
        .into_iter()
        .filter_map(|key| {
            let group = &groups[&key];
            if group.len() < 2 {
                return None;
            }
            let seen: Vec<String> = group
                .iter()
                .map(|(id, number)| format!("{} (line {})", id, number))
                .collect();
            Some(CheckResult::error(
                "ID uniqueness",
                format!("Duplicate ID {}: {}", key, seen.join(", ")),
                MANUAL_FIX,
            ))
        })
        .collect()
}

fn check_orphaned_parents(records: &[Record]) -> Vec<CheckResult> {
    let known = known_ids(records);
    records
        .iter()
        .filter_map(|r| {
            let parent = r.parent.as_deref()?;
            if known.contains(normalize_id(parent).as_str()) {
                return None;
            }
            Some(CheckResult::error(
                "Orphaned parents",
                format!("{} references non-existent parent {}", r.id, parent),
                MANUAL_FIX,
            ))
        })
        .collect()
}

fn check_orphaned_dependencies(records: &[Record]) -> Vec<CheckResult> {
    let known = known_ids(records);
    records
        .iter()
        .flat_map(|r| {
            r.blocked_by
                .iter()
                .filter(|dep| !known.contains(normalize_id(dep).as_str()))
                .map(move |dep| {
                    CheckResult::error(
                        "Orphaned dependencies",
                        format!("{} depends on non-existent task {}", r.id, dep),
                        MANUAL_FIX,
                    )
                })
        })
        .collect()
}

fn check_self_references(records: &[Record]) -> Vec<CheckResult> {
    records
        .iter()
        .filter(|r| r.blocked_by.iter().any(|dep| normalize_id(dep) == r.key))
        .map(|r| {
            CheckResult::error(
                "Self-referential dependencies",
                format!("{} depends on itself", r.id),
                MANUAL_FIX,
            )
        })
        .collect()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

struct CycleSearch<'a> {
    edges: BTreeMap<&'a str, Vec<String>>,
    marks: HashMap<&'a str, Mark>,
    path: Vec<String>,
    found: Vec<Vec<String>>,
}

impl CycleSearch<'_> {
    fn visit(&mut self, node: &str) {
        let Some((&node, _)) = self.edges.get_key_value(node) else {
            return;
        };
        self.marks.insert(node, Mark::InProgress);
        self.path.push(node.to_string());

        let next = self.edges[node].clone();
        for dep in next {
            match self.marks.get(dep.as_str()).copied() {
                Some(Mark::InProgress) => {
                    if let Some(start) = self.path.iter().position(|id| *id == dep) {
                        let cycle = rotate_to_smallest(&self.path[start..]);
                        if !self.found.contains(&cycle) {
                            self.found.push(cycle);
                        }
                    }
                }
                Some(Mark::Unvisited) => self.visit(&dep),
                Some(Mark::Done) | None => {}
            }
        }

        self.path.pop();
        self.marks.insert(node, Mark::Done);
    }
}

fn rotate_to_smallest(cycle: &[String]) -> Vec<String> {
    let start = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map_or(0, |(idx, _)| idx);
    cycle[start..].iter().chain(&cycle[..start]).cloned().collect()
}

fn check_cycles(records: &[Record]) -> Vec<CheckResult> {
    let known = known_ids(records);

    // Self-references and unknown IDs are reported by their own checks.
    let mut edges: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for r in records {
        let deps = edges.entry(r.key.as_str()).or_default();
        for dep in &r.blocked_by {
            let dep = normalize_id(dep);
            if dep != r.key && known.contains(dep.as_str()) {
                deps.push(dep);
            }
        }
    }

    let marks = edges.keys().map(|id| (*id, Mark::Unvisited)).collect();
    let roots: Vec<String> = edges.keys().map(|id| id.to_string()).collect();
    let mut search = CycleSearch {
        edges,
        marks,
        path: Vec::new(),
        found: Vec::new(),
    };
    for root in &roots {
        if search.marks.get(root.as_str()) == Some(&Mark::Unvisited) {
            search.visit(root);
        }
    }

    let mut cycles = search.found;
    cycles.sort_by(|a, b| a.join(",").cmp(&b.join(",")));
    cycles
        .into_iter()
        .map(|cycle| {
            let mut parts = cycle.clone();
            parts.push(cycle[0].clone());
            CheckResult::error(
                "Dependency cycles",
                format!("Dependency cycle: {}", parts.join(" → ")),
                MANUAL_FIX,
            )
        })
        .collect()
}

fn check_child_blocked_by_parent(records: &[Record]) -> Vec<CheckResult> {
    records
        .iter()
        .filter_map(|r| {
            let parent = r.parent.as_deref()?;
            let parent_key = normalize_id(parent);
            if !r.blocked_by.iter().any(|dep| normalize_id(dep) == parent_key) {
                return None;
            }
            Some(CheckResult::error(
                "Child blocked by parent",
                format!("{} is blocked by its parent {}", r.id, parent),
                "Manual fix required - a child blocked by its parent can never become ready",
            ))
        })
        .collect()
}

fn check_done_parents(records: &[Record]) -> Vec<CheckResult> {
    let by_key: HashMap<&str, &Record> = records.iter().map(|r| (r.key.as_str(), r)).collect();

    let mut children: BTreeMap<String, Vec<&Record>> = BTreeMap::new();
    for r in records {
        if let Some(parent) = r.parent.as_deref() {
            children.entry(normalize_id(parent)).or_default().push(r);
        }
    }

    let mut findings = Vec::new();
    for (parent_key, mut kids) in children {
        let Some(parent) = by_key.get(parent_key.as_str()) else {
            continue;
        };
        if parent.status != Some(Status::Done) {
            continue;
        }
        kids.sort_by(|a, b| a.id.cmp(&b.id));
        for child in kids {
            if matches!(child.status, Some(Status::Open | Status::InProgress)) {
                findings.push(CheckResult::warning(
                    "Parent done with open children",
                    format!("{} is done but has open child {}", parent.id, child.id),
                    "Review whether parent was completed prematurely",
                ));
            }
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn line(id: &str, status: &str, parent: Option<&str>, blocked_by: &[&str]) -> String {
        let mut value = serde_json::json!({
            "id": id,
            "title": format!("Task {id}"),
            "status": status,
            "priority": 2,
            "created": "2026-01-19T10:00:00Z",
            "updated": "2026-01-19T10:00:00Z",
        });
        if let Some(parent) = parent {
            value["parent"] = parent.into();
        }
        if !blocked_by.is_empty() {
            value["blocked_by"] = blocked_by.to_vec().into();
        }
        format!("{}\n", value)
    }

    fn failures<'a>(report: &'a Report, name: &str) -> Vec<&'a str> {
        report
            .results
            .iter()
            .filter(|r| r.name == name && !r.passed)
            .filter_map(|r| r.details.as_deref())
            .collect()
    }

    #[test]
    fn clean_file_passes_every_check() {
        let dir = TempDir::new().unwrap();
        let data = [
            line("tick-aaaaaa", "open", None, &[]),
            line("tick-bbbbbb", "open", Some("tick-aaaaaa"), &["tick-cccccc"]),
            line("tick-cccccc", "done", None, &[]),
        ]
        .concat();
        let cache_path = dir.path().join("cache.db");
        let tasks = crate::jsonl::parse_tasks(data.as_bytes()).unwrap();
        Cache::open_or_create(&cache_path)
            .unwrap()
            .rebuild(&tasks, data.as_bytes())
            .unwrap();

        let report = run_checks(&cache_path, data.as_bytes());
        assert_eq!(report.results.len(), 10);
        assert!(report.results.iter().all(|r| r.passed));
        assert!(!report.has_errors());
        assert!(report.to_string().ends_with("\n\nNo issues found."));
        assert!(report.to_string().starts_with("✓ Cache: OK\n✓ JSONL syntax: OK\n"));
    }

    #[test]
    fn missing_and_stale_cache_are_errors() {
        let dir = TempDir::new().unwrap();
        let cache_path = dir.path().join("cache.db");
        let data = line("tick-aaaaaa", "open", None, &[]);

        let report = run_checks(&cache_path, data.as_bytes());
        assert_eq!(
            failures(&report, "Cache"),
            vec!["cache.db not found - cache has not been built"]
        );
        assert!(!cache_path.exists());

        Cache::open_or_create(&cache_path)
            .unwrap()
            .rebuild(&[], b"")
            .unwrap();
        let report = run_checks(&cache_path, data.as_bytes());
        assert_eq!(
            failures(&report, "Cache"),
            vec!["cache.db is stale - hash mismatch between tasks.jsonl and cache"]
        );
        assert_eq!(report.error_count(), 1);
    }

    #[test]
    fn bad_lines_are_reported_without_hiding_others() {
        let dir = TempDir::new().unwrap();
        let data = [
            line("tick-aaaaaa", "open", None, &[]),
            "{not json\n".to_string(),
            "\n".to_string(),
            "{\"title\":\"no id\"}\n".to_string(),
            line("TICK-AAAAAA", "open", None, &[]),
            "{\"id\":42}\n".to_string(),
        ]
        .concat();

        let report = run_checks(&dir.path().join("cache.db"), data.as_bytes());
        assert_eq!(
            failures(&report, "JSONL syntax"),
            vec!["Line 2: invalid JSON - {not json"]
        );
        assert_eq!(
            failures(&report, "ID format"),
            vec![
                "Line 4: missing id field",
                "Line 5: invalid ID 'TICK-AAAAAA' - expected format tick-{6 hex}",
                "Line 6: invalid ID '42' - expected format tick-{6 hex}",
            ]
        );
        assert_eq!(
            failures(&report, "ID uniqueness"),
            vec!["Duplicate ID tick-aaaaaa: tick-aaaaaa (line 1), TICK-AAAAAA (line 5)"]
        );
    }

    #[test]
    fn relationship_problems_are_each_reported() {
        let data = [
            line("tick-aaaaaa", "done", None, &["tick-bbbbbb"]),
            line("tick-bbbbbb", "open", Some("tick-aaaaaa"), &["tick-aaaaaa", "tick-000000"]),
            line("tick-cccccc", "open", Some("tick-999999"), &["tick-cccccc"]),
        ]
        .concat();

        let dir = TempDir::new().unwrap();
        let report = run_checks(&dir.path().join("cache.db"), data.as_bytes());
        assert_eq!(
            failures(&report, "Orphaned parents"),
            vec!["tick-cccccc references non-existent parent tick-999999"]
        );
        assert_eq!(
            failures(&report, "Orphaned dependencies"),
            vec!["tick-bbbbbb depends on non-existent task tick-000000"]
        );
        assert_eq!(
            failures(&report, "Self-referential dependencies"),
            vec!["tick-cccccc depends on itself"]
        );
        assert_eq!(
            failures(&report, "Dependency cycles"),
            vec!["Dependency cycle: tick-aaaaaa → tick-bbbbbb → tick-aaaaaa"]
        );
        assert_eq!(
            failures(&report, "Child blocked by parent"),
            vec!["tick-bbbbbb is blocked by its parent tick-aaaaaa"]
        );
        assert_eq!(
            failures(&report, "Parent done with open children"),
            vec!["tick-aaaaaa is done but has open child tick-bbbbbb"]
        );
        assert_eq!(report.warning_count(), 1);
    }

    #[test]
    fn longer_cycle_is_reported_once_from_smallest_id() {
        let data = [
            line("tick-cccccc", "open", None, &["tick-aaaaaa"]),
            line("tick-bbbbbb", "open", None, &["tick-cccccc"]),
            line("tick-aaaaaa", "open", None, &["tick-bbbbbb"]),
        ]
        .concat();

        let dir = TempDir::new().unwrap();
        let report = run_checks(&dir.path().join("cache.db"), data.as_bytes());
        assert_eq!(
            failures(&report, "Dependency cycles"),
            vec!["Dependency cycle: tick-aaaaaa → tick-bbbbbb → tick-cccccc → tick-aaaaaa"]
        );
    }

    #[test]
    fn warnings_alone_are_not_errors() {
        let report = Report {
            results: vec![
                CheckResult::pass("Cache"),
                CheckResult::warning("Parent done with open children", "x".to_string(), "y"),
            ],
        };
        assert!(!report.has_errors());
        assert_eq!(report.issue_count(), 1);
        assert_eq!(
            report.to_string(),
            "✓ Cache: OK\n✗ Parent done with open children: x\n  → y\n\n1 issue found."
        );
    }

    #[test]
    fn diagnose_waits_for_the_lock() {
        let dir = TempDir::new().unwrap();
        let tick = TickDir::init(dir.path()).unwrap();
        let _held = FileLock::acquire_exclusive(tick.lock_file(), Duration::from_secs(1)).unwrap();

        let err = diagnose(&tick, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, crate::error::Error::LockTimeout));
    }
}
