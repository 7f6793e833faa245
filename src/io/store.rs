//! JSONL state storage for tasks and run records.
//!
//! Tasks are rewritten atomically (temp file + rename) so readers observe
//! either the prior or the new complete queue, never a torn line. Run records
//! and log lines are append-only and never rewritten.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::core::task::{RunRecord, Task};

/// Load the task queue. A missing file is an empty queue.
pub fn load_tasks(path: &Path) -> Result<Vec<Task>> {
    load_jsonl(path, "tasks")
}

/// Atomically rewrite the whole task queue (temp file + rename).
pub fn save_tasks(path: &Path, tasks: &[Task]) -> Result<()> {
    debug!(path = %path.display(), count = tasks.len(), "saving tasks");
    let mut buf = String::new();
    for task in tasks {
        buf.push_str(&serde_json::to_string(task).context("serialize task")?);
        buf.push('\n');
    }
    write_atomic(path, &buf)
}

/// Load the run journal. A missing file is an empty journal.
pub fn load_runs(path: &Path) -> Result<Vec<RunRecord>> {
    load_jsonl(path, "runs")
}

/// Append one run record as a single JSONL line.
pub fn append_run(path: &Path, record: &RunRecord) -> Result<()> {
    let line = serde_json::to_string(record).context("serialize run record")?;
    append_line(path, &line)
}

/// Append one line of text, creating the file if needed.
///
/// A trailing newline is added when `line` lacks one.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {} for append", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append to {}", path.display()))?;
    if !line.ends_with('\n') {
        file.write_all(b"\n")
            .with_context(|| format!("append to {}", path.display()))?;
    }
    Ok(())
}

fn load_jsonl<T: DeserializeOwned>(path: &Path, what: &str) -> Result<Vec<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("read {}", path.display()));
        }
    };

    let mut out = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: T = serde_json::from_str(line)
            .with_context(|| format!("{what} parse line {}", line_no + 1))?;
        out.push(value);
    }
    Ok(out)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("jsonl.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::TaskStatus;
    use crate::test_support::task;
    use chrono::{TimeZone, Utc};

    /// Verifies load -> save -> load preserves the queue exactly.
    #[test]
    fn tasks_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.jsonl");

        let mut second = task("OB-002");
        second.status = TaskStatus::Failed;
        second.attempts = 1;
        second.last_error = "verify failed: exit 1".to_string();
        let tasks = vec![task("OB-001"), second];

        save_tasks(&path, &tasks).expect("save");
        let loaded = load_tasks(&path).expect("load");
        assert_eq!(loaded, tasks);

        save_tasks(&path, &loaded).expect("save again");
        assert_eq!(load_tasks(&path).expect("load again"), tasks);
    }

    #[test]
    fn missing_files_load_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(load_tasks(&temp.path().join("none.jsonl")).expect("load").is_empty());
        assert!(load_runs(&temp.path().join("none.jsonl")).expect("load").is_empty());
    }

    #[test]
    fn blank_lines_are_ignored() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.jsonl");
        let line = serde_json::to_string(&task("OB-001")).expect("serialize");
        fs::write(&path, format!("\n{line}\n\n")).expect("write");

        let loaded = load_tasks(&path).expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "OB-001");
    }

    /// Parse failures identify the offending 1-based line number.
    #[test]
    fn parse_errors_carry_line_numbers() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.jsonl");
        let line = serde_json::to_string(&task("OB-001")).expect("serialize");
        fs::write(&path, format!("{line}\nnot json\n")).expect("write");

        let err = load_tasks(&path).unwrap_err();
        assert!(format!("{err:#}").contains("tasks parse line 2"));
    }

    /// The rewrite goes through a temp file so a crash cannot tear the queue.
    #[test]
    fn save_leaves_no_temp_file_behind() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.jsonl");
        save_tasks(&path, &[task("OB-001")]).expect("save");

        assert!(path.is_file());
        assert!(!path.with_extension("jsonl.tmp").exists());
    }

    #[test]
    fn append_run_accumulates_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("runs.jsonl");
        let ts = Utc.with_ymd_and_hms(2026, 2, 17, 0, 0, 0).unwrap();
        let record = RunRecord {
            task_id: "OB-001".to_string(),
            status: TaskStatus::Done,
            provider: "codex".to_string(),
            model: String::new(),
            primary_provider: "codex".to_string(),
            primary_model: String::new(),
            fallback_provider: String::new(),
            fallback_model: String::new(),
            fallback_reason: String::new(),
            started_at: ts,
            finished_at: ts,
            error: String::new(),
            output_tail: "done".to_string(),
            verify_failed: String::new(),
        };

        append_run(&path, &record).expect("append");
        append_run(&path, &record).expect("append");

        let runs = load_runs(&path).expect("load");
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0], record);
    }

    #[test]
    fn append_line_adds_missing_newline() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("cycle.log");
        append_line(&path, "first").expect("append");
        append_line(&path, "second\n").expect("append");

        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents, "first\nsecond\n");
    }
}
