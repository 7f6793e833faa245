//! Task queue data model: tasks, run records, instance metadata.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix for generated task ids (`OB-001`, `OB-002`, ...).
pub const TASK_ID_PREFIX: &str = "OB-";

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
    Failed,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single agent-completable unit of work, persisted as one JSONL line.
///
/// The schema is closed: fields not listed here are dropped on rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub spec: String,
    /// Ordered verify commands; the first failing command blocks the task run.
    pub verify: Vec<String>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model_hint: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub priority: String,
    /// Task-level failed executions. Transient provider retries never count.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_error: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-instance metadata written once by `init` (`instance.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceMeta {
    pub name: String,
    /// Project-root-relative (or absolute) directory agents and verifies run in.
    pub workdir: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only journal entry describing one agent execution (`runs.jsonl`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub task_id: String,
    pub status: TaskStatus,
    /// Provider actually used (the fallback's when a fallback ran).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub primary_provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub primary_model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fallback_provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fallback_model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fallback_reason: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// Last 1000 chars of merged stdout+stderr.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output_tail: String,
    /// First failing verify command, if verification stopped the run.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub verify_failed: String,
}

/// Render a task number as a zero-padded id (`7` -> `OB-007`).
pub fn format_task_id(number: u32) -> String {
    format!("{TASK_ID_PREFIX}{number:03}")
}

/// Next task number: `max(existing numeric suffix) + 1`, starting at 1.
///
/// Ids that do not parse as `OB-<number>` are ignored, so a hand-edited queue
/// cannot stall id assignment.
pub fn next_task_number(tasks: &[Task]) -> u32 {
    tasks
        .iter()
        .filter_map(|t| t.id.strip_prefix(TASK_ID_PREFIX))
        .filter_map(|suffix| suffix.parse::<u32>().ok())
        .max()
        .unwrap_or(0)
        + 1
}

/// Position of a task by id, if present.
pub fn find_task_index(tasks: &[Task], task_id: &str) -> Option<usize> {
    tasks.iter().position(|t| t.id == task_id)
}

/// Keep the trailing `n` chars of `s` (agent output tails can be huge).
pub fn tail(s: &str, n: usize) -> String {
    let count = s.chars().count();
    if count <= n {
        return s.to_string();
    }
    s.chars().skip(count - n).collect()
}
