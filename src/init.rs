//! Instance scaffolding for `obliviate init`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use crate::core::task::InstanceMeta;
use crate::io::paths::{InstancePaths, ObliviatePaths};

/// Create `.obliviate/` scaffolding and the instance files if absent.
///
/// Existing files are never overwritten: `init` is safe to re-run and never
/// destroys a queue or hand-edited prompt.
pub fn init_instance(
    paths: &ObliviatePaths,
    name: &str,
    workdir: &str,
) -> Result<InstancePaths> {
    let instance = paths.instance(name);

    create_dir(&paths.home)?;
    create_dir(&instance.dir)?;

    let meta = InstanceMeta {
        name: name.to_string(),
        workdir: workdir.to_string(),
        created_at: Utc::now(),
    };
    let mut meta_json = serde_json::to_string_pretty(&meta).context("serialize instance meta")?;
    meta_json.push('\n');

    write_if_missing(&instance.meta_path, &meta_json)?;
    write_if_missing(&instance.prompt_path, &default_prompt(name))?;
    write_if_missing(
        &instance.spec_path,
        "# Feature Spec\n\nDescribe the target feature here.\n",
    )?;
    write_if_missing(&instance.learnings_path, "# Learnings\n")?;
    write_if_missing(&instance.tasks_path, "")?;
    write_if_missing(&instance.runs_path, "")?;
    write_if_missing(&paths.global_learnings_path, "# Global Learnings\n")?;

    info!(instance = name, dir = %instance.dir.display(), "initialized instance");
    Ok(instance)
}

/// Load instance metadata written by `init`.
pub fn load_instance_meta(path: &Path) -> Result<InstanceMeta> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let meta: InstanceMeta =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(meta)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_if_missing(path: &Path, contents: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn default_prompt(instance: &str) -> String {
    format!(
        "# Obliviate Prompt ({instance})

Rules for each task run:

1. Complete exactly one task.
2. Keep changes scoped to task requirements.
3. Run all verify commands from the task.
4. Commit once with a clear message.
5. If blocked, report failing command and why.
6. Read and apply learnings from both .obliviate/global-learnings.md and this instance's learnings.md.
7. Append non-obvious learnings to this instance's learnings.md (and promote reusable ones to .obliviate/global-learnings.md).
"
    )
}
