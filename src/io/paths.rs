//! Canonical paths within `.obliviate/` for a project root.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

/// Project-level paths under `<project>/.obliviate/`.
#[derive(Debug, Clone)]
pub struct ObliviatePaths {
    pub project_root: PathBuf,
    pub home: PathBuf,
    pub state_dir: PathBuf,
    pub skill_path: PathBuf,
    pub global_prompt_path: PathBuf,
    pub global_learnings_path: PathBuf,
    pub global_state_learnings_path: PathBuf,
}

impl ObliviatePaths {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let home = project_root.join(".obliviate");
        let state_dir = home.join("state");
        Self {
            project_root,
            skill_path: home.join("SKILL.md"),
            global_prompt_path: home.join("global-prompt.md"),
            global_learnings_path: home.join("global-learnings.md"),
            global_state_learnings_path: state_dir.join("global").join("learnings.md"),
            state_dir,
            home,
        }
    }

    /// Paths rooted at the current working directory.
    pub fn from_cwd() -> Result<Self> {
        let cwd = std::env::current_dir().context("resolve current directory")?;
        Ok(Self::new(cwd))
    }

    pub fn instance(&self, name: &str) -> InstancePaths {
        InstancePaths::new(&self.state_dir, name)
    }

    /// Paths for an instance that must already exist.
    ///
    /// Errors with a not-initialized message when `instance.json` is absent.
    pub fn existing_instance(&self, name: &str) -> Result<InstancePaths> {
        let paths = self.instance(name);
        if !paths.meta_path.is_file() {
            return Err(anyhow!(
                "instance \"{name}\" is not initialized in {} (run obliviate init {name})",
                self.project_root.display()
            ));
        }
        Ok(paths)
    }

    /// Resolve an instance workdir against the project root.
    ///
    /// Empty means the project root itself; relative paths are joined to it.
    pub fn resolve_workdir(&self, configured: &str) -> PathBuf {
        let w = configured.trim();
        if w.is_empty() {
            return self.project_root.clone();
        }
        let path = Path::new(w);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        self.project_root.join(path)
    }
}

/// Per-instance paths under `state/<instance>/`.
#[derive(Debug, Clone)]
pub struct InstancePaths {
    pub name: String,
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub prompt_path: PathBuf,
    pub spec_path: PathBuf,
    pub learnings_path: PathBuf,
    pub tasks_path: PathBuf,
    pub runs_path: PathBuf,
    pub cycle_log_path: PathBuf,
    pub lock_path: PathBuf,
}

impl InstancePaths {
    fn new(state_dir: &Path, name: &str) -> Self {
        let dir = state_dir.join(name);
        Self {
            name: name.to_string(),
            meta_path: dir.join("instance.json"),
            prompt_path: dir.join("prompt.md"),
            spec_path: dir.join("spec.md"),
            learnings_path: dir.join("learnings.md"),
            tasks_path: dir.join("tasks.jsonl"),
            runs_path: dir.join("runs.jsonl"),
            cycle_log_path: dir.join("cycle.log"),
            lock_path: dir.join(".tasks.lock"),
            dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_paths_are_stable() {
        let paths = ObliviatePaths::new("/proj");
        let inst = paths.instance("alpha");

        assert!(inst.dir.ends_with(".obliviate/state/alpha"));
        assert!(inst.meta_path.ends_with("instance.json"));
        assert!(inst.tasks_path.ends_with("tasks.jsonl"));
        assert!(inst.runs_path.ends_with("runs.jsonl"));
        assert!(inst.cycle_log_path.ends_with("cycle.log"));
        assert!(inst.lock_path.ends_with(".tasks.lock"));
        assert!(paths.global_state_learnings_path.ends_with("state/global/learnings.md"));
    }

    #[test]
    fn missing_instance_reports_not_initialized() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ObliviatePaths::new(temp.path());
        let err = paths.existing_instance("ghost").unwrap_err();
        assert!(err.to_string().contains("not initialized"));
    }

    #[test]
    fn workdir_resolution_handles_empty_relative_and_absolute() {
        let paths = ObliviatePaths::new("/proj");
        assert_eq!(paths.resolve_workdir(""), PathBuf::from("/proj"));
        assert_eq!(paths.resolve_workdir("."), PathBuf::from("/proj/."));
        assert_eq!(paths.resolve_workdir("sub/dir"), PathBuf::from("/proj/sub/dir"));
        assert_eq!(paths.resolve_workdir("/abs"), PathBuf::from("/abs"));
    }
}
