//! Administrative operations: status, show, reset, skip, runs.
//!
//! Mutating operations (`reset`, `skip`) hold the instance lock for their
//! full duration. Read-only operations go lock-free: the atomic task rewrite
//! guarantees they observe a consistent queue.

use anyhow::{Result, anyhow};
use chrono::Utc;
use serde::Serialize;

use crate::core::task::{RunRecord, Task, TaskStatus, find_task_index};
use crate::io::lock::InstanceLock;
use crate::io::paths::{InstancePaths, ObliviatePaths};
use crate::io::store::{load_runs, load_tasks, save_tasks};

/// Counts by status for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub instance: String,
    pub total: usize,
    pub todo: usize,
    pub in_progress: usize,
    pub done: usize,
    pub failed: usize,
    pub blocked: usize,
}

pub fn summarize_status(instance: &str, tasks: &[Task]) -> StatusSummary {
    let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
    StatusSummary {
        instance: instance.to_string(),
        total: tasks.len(),
        todo: count(TaskStatus::Todo),
        in_progress: count(TaskStatus::InProgress),
        done: count(TaskStatus::Done),
        failed: count(TaskStatus::Failed),
        blocked: count(TaskStatus::Blocked),
    }
}

/// Status for one instance.
pub fn status_instance(instance: &InstancePaths) -> Result<StatusSummary> {
    let tasks = load_tasks(&instance.tasks_path)?;
    Ok(summarize_status(&instance.name, &tasks))
}

/// Status for every initialized instance, sorted by name.
pub fn status_all(paths: &ObliviatePaths) -> Result<Vec<StatusSummary>> {
    let entries = match std::fs::read_dir(&paths.state_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut names: Vec<String> = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        // `state/global/` holds shared learnings, not an instance.
        if paths.instance(&name).meta_path.is_file() {
            names.push(name);
        }
    }
    names.sort();

    names
        .into_iter()
        .map(|name| status_instance(&paths.instance(&name)))
        .collect()
}

/// Look up one task by id.
pub fn show_task(instance: &InstancePaths, task_id: &str) -> Result<Task> {
    let tasks = load_tasks(&instance.tasks_path)?;
    let idx = find_task_index(&tasks, task_id)
        .ok_or_else(|| task_not_found(task_id, &instance.name))?;
    Ok(tasks[idx].clone())
}

/// Put a task back to `todo` with a clean slate.
///
/// Applying reset twice yields the same state as once.
pub fn reset_task(instance: &InstancePaths, task_id: &str) -> Result<Task> {
    mutate_task(instance, task_id, |task| {
        task.status = TaskStatus::Todo;
        task.attempts = 0;
        task.last_error.clear();
    })
}

/// Mark a task `blocked` so the loop never picks it up.
pub fn skip_task(instance: &InstancePaths, task_id: &str, reason: Option<&str>) -> Result<Task> {
    let reason = match reason.map(str::trim) {
        Some(r) if !r.is_empty() => r.to_string(),
        _ => "manually skipped".to_string(),
    };
    mutate_task(instance, task_id, |task| {
        task.status = TaskStatus::Blocked;
        task.last_error = format!("skipped: {reason}");
    })
}

/// Tail of the run journal, optionally filtered by task id.
///
/// `limit` keeps the most recent records; 0 means all.
pub fn list_runs(
    instance: &InstancePaths,
    limit: usize,
    task_id: Option<&str>,
) -> Result<Vec<RunRecord>> {
    let mut runs = load_runs(&instance.runs_path)?;
    if let Some(filter) = task_id.map(str::trim).filter(|f| !f.is_empty()) {
        runs.retain(|r| r.task_id == filter);
    }
    if limit > 0 && runs.len() > limit {
        runs.drain(..runs.len() - limit);
    }
    Ok(runs)
}

fn mutate_task(
    instance: &InstancePaths,
    task_id: &str,
    apply: impl FnOnce(&mut Task),
) -> Result<Task> {
    let task_id = task_id.trim();
    if task_id.is_empty() {
        return Err(anyhow!("task-id is required"));
    }
    let mut lock = InstanceLock::acquire(&instance.lock_path)?;

    let mut tasks = load_tasks(&instance.tasks_path)?;
    let idx = find_task_index(&tasks, task_id)
        .ok_or_else(|| task_not_found(task_id, &instance.name))?;
    apply(&mut tasks[idx]);
    tasks[idx].updated_at = Utc::now();
    save_tasks(&instance.tasks_path, &tasks)?;

    let task = tasks[idx].clone();
    lock.release()?;
    Ok(task)
}

fn task_not_found(task_id: &str, instance: &str) -> anyhow::Error {
    anyhow!("task \"{task_id}\" not found in instance \"{instance}\"")
}
