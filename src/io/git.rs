//! Git adapter for the commit gate.
//!
//! The loop only probes git; it never writes. Committing is the agent's job,
//! so we keep a small, explicit wrapper around `git` subprocess calls.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Return the current HEAD revision (full SHA, trimmed).
    pub fn head_revision(&self) -> Result<String> {
        let output = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git rev-parse HEAD in {}", self.workdir.display()))?;

        if !output.status.success() {
            let mut msg = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if msg.is_empty() {
                msg = format!("exit status {:?}", output.status.code());
            }
            return Err(anyhow!(
                "git rev-parse HEAD in {} failed: {msg}",
                self.workdir.display()
            ));
        }

        let head = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if head.is_empty() {
            return Err(anyhow!(
                "git rev-parse HEAD in {} returned empty output",
                self.workdir.display()
            ));
        }
        debug!(head = %head, "resolved head revision");
        Ok(head)
    }
}
