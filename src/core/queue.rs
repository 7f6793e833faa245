//! Next-runnable selection and retry bookkeeping over the task list.

use crate::core::task::{Task, TaskStatus};

/// Pick the next runnable task, by list order.
///
/// `todo` tasks always run before retries; among retries, only `failed` tasks
/// with attempts left are eligible. `priority` is informational and never
/// reorders. Returns `None` when nothing is runnable.
pub fn next_runnable(tasks: &[Task], max_attempts: u32) -> Option<usize> {
    if let Some(idx) = tasks.iter().position(|t| t.status == TaskStatus::Todo) {
        return Some(idx);
    }
    tasks
        .iter()
        .position(|t| t.status == TaskStatus::Failed && t.attempts < max_attempts)
}

/// Status for a task whose execution just failed, given its incremented
/// attempt count: `blocked` once the cap is reached, `failed` otherwise.
pub fn status_after_failure(attempts: u32, max_attempts: u32) -> TaskStatus {
    if attempts >= max_attempts {
        TaskStatus::Blocked
    } else {
        TaskStatus::Failed
    }
}
