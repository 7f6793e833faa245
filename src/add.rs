//! Task intake for `obliviate add` and `obliviate add-batch`.

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::Deserialize;

use crate::core::task::{Task, TaskStatus, format_task_id, next_task_number};
use crate::io::lock::InstanceLock;
use crate::io::paths::InstancePaths;
use crate::io::store::{load_tasks, save_tasks};

/// A validated task waiting for an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub spec: String,
    pub verify: Vec<String>,
    pub model_hint: String,
    pub priority: String,
    pub source: String,
}

impl TaskDraft {
    /// Validate raw input fields into a draft.
    ///
    /// The error phrases here are load-bearing: the CLI exit-code classifier
    /// keys on "required" / "cannot be empty".
    pub fn new(
        title: &str,
        spec: &str,
        verify: Vec<String>,
        model_hint: &str,
        priority: &str,
        source: &str,
    ) -> Result<Self> {
        let verify: Vec<String> = verify
            .into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        if title.trim().is_empty() || spec.trim().is_empty() || verify.is_empty() {
            return Err(anyhow!(
                "title, spec, and at least one verify command are required"
            ));
        }
        if model_hint.trim().is_empty() {
            return Err(anyhow!("model_hint is required (use --model to specify)"));
        }
        let priority = priority.trim();
        let source = source.trim();
        Ok(Self {
            title: title.trim().to_string(),
            spec: spec.trim().to_string(),
            verify,
            model_hint: model_hint.trim().to_string(),
            priority: if priority.is_empty() { "med" } else { priority }.to_string(),
            source: if source.is_empty() { "agent" } else { source }.to_string(),
        })
    }
}

/// Raw batch entry: `verify` may be a single string or an array.
#[derive(Debug, Deserialize)]
struct RawTaskInput {
    #[serde(default)]
    title: String,
    #[serde(default)]
    spec: String,
    #[serde(default)]
    verify: Option<VerifyField>,
    #[serde(default)]
    model_hint: String,
    #[serde(default)]
    priority: String,
    #[serde(default)]
    source: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VerifyField {
    One(String),
    Many(Vec<String>),
}

impl RawTaskInput {
    fn into_draft(self) -> Result<TaskDraft> {
        let verify = match self.verify {
            None => return Err(anyhow!("verify is required")),
            Some(VerifyField::One(cmd)) => vec![cmd],
            Some(VerifyField::Many(cmds)) => cmds,
        };
        TaskDraft::new(
            &self.title,
            &self.spec,
            verify,
            &self.model_hint,
            &self.priority,
            &self.source,
        )
    }
}

/// Parse a batch payload: a top-level JSON array (detected by a `[` prefix)
/// or JSONL, one object per line. Errors identify the offending item/line.
pub fn parse_batch(payload: &str) -> Result<Vec<TaskDraft>> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        let raws: Vec<RawTaskInput> =
            serde_json::from_str(trimmed).context("parse batch json array")?;
        return raws
            .into_iter()
            .enumerate()
            .map(|(i, raw)| raw.into_draft().with_context(|| format!("item {}", i + 1)))
            .collect();
    }

    let mut drafts = Vec::new();
    for (line_no, line) in trimmed.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let raw: RawTaskInput = serde_json::from_str(line)
            .with_context(|| format!("line {}", line_no + 1))?;
        drafts.push(
            raw.into_draft()
                .with_context(|| format!("line {}", line_no + 1))?,
        );
    }
    Ok(drafts)
}

/// Assign ids and append drafts to the instance queue, under the lock.
pub fn add_tasks(instance: &InstancePaths, drafts: Vec<TaskDraft>) -> Result<Vec<Task>> {
    if drafts.is_empty() {
        return Err(anyhow!("no valid tasks in input"));
    }
    let mut lock = InstanceLock::acquire(&instance.lock_path)?;

    let mut tasks = load_tasks(&instance.tasks_path)?;
    let mut next = next_task_number(&tasks);
    let now = Utc::now();
    let mut added = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let task = Task {
            id: format_task_id(next),
            title: draft.title,
            spec: draft.spec,
            verify: draft.verify,
            status: TaskStatus::Todo,
            model_hint: draft.model_hint,
            priority: draft.priority,
            attempts: 0,
            last_error: String::new(),
            source: draft.source,
            created_at: now,
            updated_at: now,
        };
        next += 1;
        tasks.push(task.clone());
        added.push(task);
    }
    save_tasks(&instance.tasks_path, &tasks)?;
    lock.release()?;
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::init_instance;
    use crate::io::paths::ObliviatePaths;

    fn draft(title: &str) -> TaskDraft {
        TaskDraft::new(title, "spec", vec!["echo ok".to_string()], "codex", "", "")
            .expect("draft")
    }

    #[test]
    fn draft_validation_requires_core_fields() {
        let err = TaskDraft::new("", "s", vec!["v".to_string()], "codex", "", "").unwrap_err();
        assert!(err.to_string().contains("required"));

        let err = TaskDraft::new("t", "s", vec!["  ".to_string()], "codex", "", "").unwrap_err();
        assert!(err.to_string().contains("verify"));

        let err = TaskDraft::new("t", "s", vec!["v".to_string()], "  ", "", "").unwrap_err();
        assert!(err.to_string().contains("model_hint is required"));
    }

    #[test]
    fn draft_defaults_priority_and_source() {
        let d = draft("t");
        assert_eq!(d.priority, "med");
        assert_eq!(d.source, "agent");
    }

    /// A JSON array and the same tasks as JSONL parse identically.
    #[test]
    fn batch_array_and_jsonl_are_equivalent() {
        let array = r#"[
            {"title":"t1","spec":"s1","verify":"echo one","model_hint":"codex"},
            {"title":"t2","spec":"s2","verify":["echo a","echo b"],"model_hint":"claude-sonnet"}
        ]"#;
        let jsonl = concat!(
            "{\"title\":\"t1\",\"spec\":\"s1\",\"verify\":\"echo one\",\"model_hint\":\"codex\"}\n",
            "{\"title\":\"t2\",\"spec\":\"s2\",\"verify\":[\"echo a\",\"echo b\"],\"model_hint\":\"claude-sonnet\"}\n",
        );

        let from_array = parse_batch(array).expect("array");
        let from_jsonl = parse_batch(jsonl).expect("jsonl");
        assert_eq!(from_array, from_jsonl);
        assert_eq!(from_array.len(), 2);
        assert_eq!(from_array[0].verify, vec!["echo one"]);
        assert_eq!(from_array[1].verify, vec!["echo a", "echo b"]);
    }

    #[test]
    fn batch_errors_identify_the_line() {
        let err = parse_batch("{\"title\":\"a\"}\nnot json\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 1"));

        let err = parse_batch(
            "{\"title\":\"a\",\"spec\":\"b\",\"verify\":\"v\",\"model_hint\":\"codex\"}\nnot json\n",
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn batch_missing_verify_is_rejected() {
        let err = parse_batch(r#"[{"title":"t","spec":"s","model_hint":"codex"}]"#).unwrap_err();
        assert!(format!("{err:#}").contains("verify is required"));
    }

    #[test]
    fn empty_batch_parses_to_nothing() {
        assert!(parse_batch("").expect("parse").is_empty());
        assert!(parse_batch("  \n \n").expect("parse").is_empty());
    }

    /// Ids are assigned monotonically across separate add calls.
    #[test]
    fn add_tasks_assigns_monotonic_ids() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ObliviatePaths::new(temp.path());
        let instance = init_instance(&paths, "alpha", ".").expect("init");

        let first = add_tasks(&instance, vec![draft("one"), draft("two")]).expect("add");
        assert_eq!(first[0].id, "OB-001");
        assert_eq!(first[1].id, "OB-002");

        let second = add_tasks(&instance, vec![draft("three")]).expect("add");
        assert_eq!(second[0].id, "OB-003");

        let tasks = load_tasks(&instance.tasks_path).expect("load");
        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Todo));
    }

    #[test]
    fn add_tasks_rejects_an_empty_batch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ObliviatePaths::new(temp.path());
        let instance = init_instance(&paths, "alpha", ".").expect("init");

        let err = add_tasks(&instance, Vec::new()).unwrap_err();
        assert!(err.to_string().contains("no valid tasks"));
    }
}
