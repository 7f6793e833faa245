//! Agent invoker abstraction and the CLI-backed implementation.
//!
//! The [`AgentInvoker`] trait decouples the execution loop from the actual
//! agent backends (`claude`, `codex`). Tests use scripted invokers that
//! return predetermined outcomes without spawning processes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::router::Provider;
use crate::io::process::run_command_with_timeout;

/// Default wall-clock budget for one agent execution.
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(15 * 60);
/// Truncate captured agent output beyond this many bytes.
pub const OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub provider: Provider,
    /// Model name, or empty for the provider default.
    pub model: String,
    /// Working directory the agent runs in.
    pub workdir: PathBuf,
    /// Prompt text fed on stdin.
    pub prompt: String,
    pub timeout: Duration,
}

/// Why an agent invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentErrorKind {
    /// The deadline expired and the process tree was killed.
    TimedOut,
    /// The subprocess could not be spawned or exited non-zero.
    Failed,
}

/// Agent failure, with captured output preserved alongside in
/// [`AgentInvocation`].
#[derive(Debug, Clone)]
pub struct AgentError {
    pub kind: AgentErrorKind,
    pub message: String,
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for AgentError {}

/// Outcome of one agent invocation: output (possibly partial) plus an
/// optional error. Both are kept because failure classification inspects the
/// output even when the process errored.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub output: String,
    pub error: Option<AgentError>,
}

impl AgentInvocation {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(output: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: Some(AgentError {
                kind: AgentErrorKind::Failed,
                message: message.into(),
            }),
        }
    }
}

/// Abstraction over agent execution backends.
pub trait AgentInvoker {
    fn run(&self, request: &AgentRequest) -> AgentInvocation;
}

/// Invoker that spawns the provider CLIs (`claude`, `codex`).
pub struct CliAgentInvoker;

impl AgentInvoker for CliAgentInvoker {
    #[instrument(skip_all, fields(provider = %request.provider, model = %request.model, timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &AgentRequest) -> AgentInvocation {
        info!(workdir = %request.workdir.display(), "starting agent");

        let mut cmd = match request.provider {
            Provider::Claude => Command::new("claude"),
            Provider::Codex => Command::new("codex"),
        };
        let args = match request.provider {
            Provider::Claude => claude_args(&request.model),
            Provider::Codex => codex_args(&request.workdir, &request.model),
        };
        cmd.args(&args).current_dir(&request.workdir);

        let output = match run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            OUTPUT_LIMIT_BYTES,
        ) {
            Ok(output) => output,
            Err(err) => {
                warn!(error = %err, "agent spawn failed");
                return AgentInvocation {
                    output: String::new(),
                    error: Some(AgentError {
                        kind: AgentErrorKind::Failed,
                        message: format!("run {} agent: {err:#}", request.provider),
                    }),
                };
            }
        };

        let merged = output.merged();
        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "agent timed out");
            return AgentInvocation {
                output: merged,
                error: Some(AgentError {
                    kind: AgentErrorKind::TimedOut,
                    message: format!("agent timed out after {:?}", request.timeout),
                }),
            };
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent failed");
            return AgentInvocation {
                output: merged,
                error: Some(AgentError {
                    kind: AgentErrorKind::Failed,
                    message: format!(
                        "{} agent exited with status {:?}",
                        request.provider,
                        output.status.code()
                    ),
                }),
            };
        }

        debug!("agent completed successfully");
        AgentInvocation {
            output: merged,
            error: None,
        }
    }
}

/// Non-interactive `claude` argument list; prompt arrives on stdin.
fn claude_args(model: &str) -> Vec<String> {
    let mut args: Vec<String> = [
        "-p",
        "--output-format",
        "text",
        "--permission-mode",
        "bypassPermissions",
        "--dangerously-skip-permissions",
        "--no-session-persistence",
        "--disallowedTools",
        "AskUserQuestion,EnterPlanMode",
    ]
    .into_iter()
    .map(str::to_string)
    .collect();
    if !model.is_empty() {
        args.push("--model".to_string());
        args.push(model.to_string());
    }
    args
}

/// Non-interactive `codex exec` argument list; the trailing `-` reads the
/// prompt from stdin, so `--model` must be inserted before it.
fn codex_args(workdir: &Path, model: &str) -> Vec<String> {
    let mut args = vec![
        "exec".to_string(),
        "--cd".to_string(),
        workdir.display().to_string(),
        "--skip-git-repo-check".to_string(),
        "--dangerously-bypass-approvals-and-sandbox".to_string(),
    ];
    if !model.is_empty() {
        args.push("--model".to_string());
        args.push(model.to_string());
    }
    args.push("-".to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_args_match_the_noninteractive_contract() {
        let args = claude_args("");
        assert_eq!(
            args,
            vec![
                "-p",
                "--output-format",
                "text",
                "--permission-mode",
                "bypassPermissions",
                "--dangerously-skip-permissions",
                "--no-session-persistence",
                "--disallowedTools",
                "AskUserQuestion,EnterPlanMode",
            ]
        );

        let args = claude_args("sonnet");
        assert_eq!(args[args.len() - 2..], ["--model", "sonnet"]);
    }

    #[test]
    fn codex_args_keep_stdin_marker_last() {
        let args = codex_args(Path::new("/work"), "");
        assert_eq!(
            args,
            vec![
                "exec",
                "--cd",
                "/work",
                "--skip-git-repo-check",
                "--dangerously-bypass-approvals-and-sandbox",
                "-",
            ]
        );

        let args = codex_args(Path::new("/work"), "gpt-5");
        assert_eq!(args.last().map(String::as_str), Some("-"));
        let model_pos = args.iter().position(|a| a == "--model").expect("--model");
        assert_eq!(args[model_pos + 1], "gpt-5");
        assert!(model_pos + 2 == args.len() - 1, "--model sits before the stdin marker");
    }

    #[test]
    fn invocation_helpers_set_error_kind() {
        let ok = AgentInvocation::ok("out");
        assert!(ok.error.is_none());

        let failed = AgentInvocation::failed("partial", "boom");
        let err = failed.error.expect("error");
        assert_eq!(err.kind, AgentErrorKind::Failed);
        assert_eq!(err.message, "boom");
    }
}
