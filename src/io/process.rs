//! Helpers for running child processes with timeouts and bounded output.
//!
//! Children are spawned into their own process group (Unix) so a timeout can
//! take down the whole tree: coding agents routinely spawn build and test
//! grandchildren that would otherwise outlive the direct child and keep file
//! locks on the workdir.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::warn;
use wait_timeout::ChildExt;

/// Grace window between the polite tree signal and the forced kill.
pub const KILL_GRACE: Duration = Duration::from_secs(10);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Merge stdout and stderr into one lossy string, noting truncation.
    pub fn merged(&self) -> String {
        let mut buf = String::new();
        buf.push_str(&String::from_utf8_lossy(&self.stdout));
        if self.stdout_truncated > 0 {
            buf.push_str(&format!("\n[stdout truncated {} bytes]\n", self.stdout_truncated));
        }
        if !self.stderr.is_empty() {
            if !buf.is_empty() && !buf.ends_with('\n') {
                buf.push('\n');
            }
            buf.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        if self.stderr_truncated > 0 {
            buf.push_str(&format!("\n[stderr truncated {} bytes]\n", self.stderr_truncated));
        }
        buf
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking
/// pipe deadlocks.
///
/// Output is read concurrently while the child runs; `output_limit_bytes`
/// bounds the amount of stdout/stderr stored in memory (bytes beyond this are
/// discarded while still draining the pipe). On timeout the child's process
/// tree is signalled, given [`KILL_GRACE`] to flush output, then killed.
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // New process group; its id equals the child pid, which is what the
        // tree kill targets.
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().context("spawn command")?;

    // Feed stdin from its own thread: a child that fills its stdout pipe
    // before draining stdin would deadlock a blocking write here.
    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            Some(thread::spawn(move || {
                // The child may exit without reading; a broken pipe is fine.
                let _ = child_stdin.write_all(&input);
            }))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            timed_out = true;
            terminate_process_tree(&child);
            match child.wait_timeout(KILL_GRACE).context("wait after terminate")? {
                Some(status) => status,
                None => {
                    warn!("child survived grace window, killing process tree");
                    kill_process_tree(&child);
                    child.kill().ok();
                    child.wait().context("wait command after kill")?
                }
            }
        }
    };

    if let Some(handle) = stdin_handle {
        let _ = handle.join();
    }
    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Ask the child's whole process tree to exit (SIGTERM to the group on Unix,
/// `taskkill /T` on Windows).
#[cfg(unix)]
fn terminate_process_tree(child: &Child) {
    signal_process_group(child, libc::SIGTERM);
}

/// Force-kill the child's whole process tree.
#[cfg(unix)]
fn kill_process_tree(child: &Child) {
    signal_process_group(child, libc::SIGKILL);
}

#[cfg(unix)]
fn signal_process_group(child: &Child, signal: libc::c_int) {
    let pid = child.id() as libc::pid_t;
    // The group was created at spawn with process_group(0), so the group id
    // is the child pid. ESRCH just means the tree is already gone.
    let rc = unsafe { libc::killpg(pid, signal) };
    if rc == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pid, signal, error = %err, "killpg failed");
        }
    }
}

#[cfg(not(unix))]
fn terminate_process_tree(child: &Child) {
    taskkill(child, false);
}

#[cfg(not(unix))]
fn kill_process_tree(child: &Child) {
    taskkill(child, true);
}

#[cfg(not(unix))]
fn taskkill(child: &Child, force: bool) {
    let mut cmd = Command::new("taskkill");
    cmd.arg("/T");
    if force {
        cmd.arg("/F");
    }
    cmd.arg("/PID").arg(child.id().to_string());
    if let Err(err) = cmd.status() {
        warn!(pid = child.id(), error = %err, "taskkill failed");
    }
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
