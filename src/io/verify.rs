//! Verify-command execution through the native shell.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::io::process::run_command_with_timeout;

/// Default per-command verify budget.
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(2 * 60);
/// Truncate captured verify output beyond this many bytes.
pub const OUTPUT_LIMIT_BYTES: usize = 100_000;

/// First verify command that failed, with its captured output for the run
/// record and `last_error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyFailure {
    pub command: String,
    pub output: String,
}

/// Abstraction over single-command verify execution.
///
/// The command string is opaque; the production runner hands it to the
/// platform shell unparsed.
pub trait VerifyRunner {
    /// Run one command. Failures are reported in the returned output/error
    /// pair rather than `Err`, so the loop keeps partial output.
    fn run_command(&self, workdir: &Path, command: &str, timeout: Duration) -> VerifyOutput;
}

/// Outcome of one verify command.
#[derive(Debug, Clone)]
pub struct VerifyOutput {
    pub output: String,
    /// Set when the command exited non-zero, timed out, or failed to spawn.
    pub error: Option<String>,
}

/// Runner that executes commands via the platform shell.
pub struct ShellVerifyRunner;

impl VerifyRunner for ShellVerifyRunner {
    #[instrument(skip_all, fields(command))]
    fn run_command(&self, workdir: &Path, command: &str, timeout: Duration) -> VerifyOutput {
        let mut cmd = shell_command(command);
        cmd.current_dir(workdir);

        let output = match run_command_with_timeout(cmd, None, timeout, OUTPUT_LIMIT_BYTES) {
            Ok(output) => output,
            Err(err) => {
                warn!(error = %err, "verify spawn failed");
                return VerifyOutput {
                    output: String::new(),
                    error: Some(format!("run verify command: {err:#}")),
                };
            }
        };

        let merged = output.merged();
        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "verify timed out");
            return VerifyOutput {
                output: merged,
                error: Some(format!("verify timed out after {timeout:?}")),
            };
        }
        if !output.status.success() {
            debug!(exit_code = ?output.status.code(), "verify command failed");
            return VerifyOutput {
                output: merged,
                error: Some(format!(
                    "verify exited with status {:?}",
                    output.status.code()
                )),
            };
        }
        VerifyOutput {
            output: merged,
            error: None,
        }
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd.exe");
    cmd.arg("/C").arg(command);
    cmd
}

/// Run verify commands in order; the first failure stops the sequence.
pub fn run_verifies<R: VerifyRunner>(
    runner: &R,
    workdir: &Path,
    commands: &[String],
    timeout: Duration,
) -> Option<VerifyFailure> {
    for command in commands {
        let result = runner.run_command(workdir, command, timeout);
        if let Some(error) = result.error {
            return Some(VerifyFailure {
                command: command.clone(),
                output: format!("{}\n{error}", result.output),
            });
        }
    }
    None
}
