//! Execution prompt builder: standing context files plus the task JSON.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::task::Task;
use crate::io::paths::{InstancePaths, ObliviatePaths};

const EXECUTION_TEMPLATE: &str = include_str!("prompts/execution.md");

/// Standing context for the execution prompt, read best-effort from disk.
///
/// Every section heading is always rendered; a missing file just leaves its
/// body empty so the agent sees a stable prompt shape.
#[derive(Debug, Clone, Default)]
pub struct PromptInputs {
    pub skill: String,
    pub global_prompt: String,
    pub instance_prompt: String,
    pub feature_spec: String,
    pub global_learnings: String,
    pub instance_learnings: String,
}

impl PromptInputs {
    /// Load prompt inputs for an instance. Missing files read as empty.
    pub fn from_disk(paths: &ObliviatePaths, instance: &InstancePaths) -> Self {
        Self {
            skill: read_optional(&paths.skill_path),
            global_prompt: read_optional(&paths.global_prompt_path),
            instance_prompt: read_optional(&instance.prompt_path),
            feature_spec: read_optional(&instance.spec_path),
            global_learnings: read_optional(&paths.global_state_learnings_path),
            instance_learnings: read_optional(&instance.learnings_path),
        }
    }
}

/// Render the execution prompt for one task.
pub fn build_execution_prompt(inputs: &PromptInputs, task: &Task) -> Result<String> {
    let task_json = serde_json::to_string_pretty(task).context("serialize task for prompt")?;

    let mut env = Environment::new();
    env.add_template("execution", EXECUTION_TEMPLATE)
        .expect("execution template should be valid");
    let template = env.get_template("execution").expect("template registered");
    let rendered = template
        .render(context! {
            skill => inputs.skill.trim(),
            global_prompt => inputs.global_prompt.trim(),
            instance_prompt => inputs.instance_prompt.trim(),
            feature_spec => inputs.feature_spec.trim(),
            global_learnings => inputs.global_learnings.trim(),
            instance_learnings => inputs.instance_learnings.trim(),
            task_json => task_json,
        })
        .context("render execution prompt")?;
    Ok(rendered)
}

/// Read file contents if it exists, returning empty for missing files.
fn read_optional(path: impl Into<PathBuf>) -> String {
    let path: PathBuf = path.into();
    fs::read_to_string(&path).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::task;
    use std::fs;

    fn positions(content: &str, headings: &[&str]) -> Vec<usize> {
        headings
            .iter()
            .map(|h| content.find(h).unwrap_or_else(|| panic!("missing section {h}")))
            .collect()
    }

    /// Verifies prompt sections appear in deterministic order.
    #[test]
    fn prompt_ordering_is_stable() {
        let inputs = PromptInputs {
            skill: "skill body".to_string(),
            global_prompt: "global prompt body".to_string(),
            instance_prompt: "instance prompt body".to_string(),
            feature_spec: "spec body".to_string(),
            global_learnings: "global learnings body".to_string(),
            instance_learnings: "instance learnings body".to_string(),
        };
        let prompt = build_execution_prompt(&inputs, &task("OB-001")).expect("build");

        assert!(prompt.starts_with(
            "You are running inside Obliviate's fresh-context task loop. Complete exactly one task."
        ));
        let found = positions(
            &prompt,
            &[
                "## SKILL.md",
                "## Global Prompt",
                "## Instance Prompt",
                "## Feature Spec",
                "## Global Learnings",
                "## Instance Learnings",
                "## Current Task (JSON)",
                "## Output Requirements",
            ],
        );
        let mut sorted = found.clone();
        sorted.sort_unstable();
        assert_eq!(found, sorted, "sections out of order");
    }

    /// Missing context files keep their headings with empty bodies.
    #[test]
    fn missing_files_render_empty_sections() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ObliviatePaths::new(temp.path());
        let instance = paths.instance("alpha");

        let inputs = PromptInputs::from_disk(&paths, &instance);
        let prompt = build_execution_prompt(&inputs, &task("OB-001")).expect("build");

        assert!(prompt.contains("## SKILL.md"));
        assert!(prompt.contains("## Global Prompt"));
        assert!(prompt.contains("## Feature Spec"));
    }

    #[test]
    fn task_json_is_pretty_printed_into_the_prompt() {
        let inputs = PromptInputs::default();
        let mut t = task("OB-007");
        t.title = "Wire the frobnicator".to_string();
        let prompt = build_execution_prompt(&inputs, &t).expect("build");

        assert!(prompt.contains("\"id\": \"OB-007\""));
        assert!(prompt.contains("\"title\": \"Wire the frobnicator\""));
    }

    #[test]
    fn from_disk_reads_present_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ObliviatePaths::new(temp.path());
        let instance = paths.instance("alpha");
        fs::create_dir_all(&instance.dir).expect("mkdir");
        fs::write(&instance.spec_path, "# The Spec\n").expect("write");
        fs::write(&paths.skill_path, "skillz\n").expect("write skill");

        let inputs = PromptInputs::from_disk(&paths, &instance);
        assert_eq!(inputs.feature_spec, "# The Spec\n");
        assert_eq!(inputs.skill, "skillz\n");
        assert!(inputs.global_prompt.is_empty());
    }
}
