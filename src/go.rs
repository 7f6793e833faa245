//! The execution loop behind `obliviate go`.
//!
//! Orchestrates one cycle over an instance: crash recovery, fair task
//! selection, the spawn-verify-commit pipeline, dual-layer retries (transient
//! provider backoff vs. attempt-counted task failures), provider fallback,
//! and durable state updates.
//!
//! Locking discipline: the instance lock is held for every read-modify-write
//! of `tasks.jsonl`, but released around the (up to 15 minute) agent run so
//! `status`, `skip` and `reset` stay usable while an agent works. After the
//! run the lock is re-acquired and the queue reloaded before the final write.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::backoff::transient_backoff;
use crate::core::classifier::{ProviderFailure, classify_provider_failure};
use crate::core::queue::{next_runnable, status_after_failure};
use crate::core::router::{Provider, route_model, select_fallback};
use crate::core::task::{RunRecord, Task, TaskStatus, find_task_index, tail};
use crate::init::load_instance_meta;
use crate::io::agent::{AgentInvoker, AgentRequest, DEFAULT_AGENT_TIMEOUT};
use crate::io::git::Git;
use crate::io::lock::InstanceLock;
use crate::io::paths::{InstancePaths, ObliviatePaths};
use crate::io::prompt::{PromptInputs, build_execution_prompt};
use crate::io::store::{append_line, append_run, load_tasks, save_tasks};
use crate::io::verify::{DEFAULT_VERIFY_TIMEOUT, VerifyRunner, run_verifies};

/// Marker separating primary from fallback output in the run record.
const FALLBACK_MARKER: &str = "[obliviate fallback]";
/// Run-record output tail length, in chars.
const OUTPUT_TAIL_CHARS: usize = 1000;

/// Tunables for one `go` invocation.
#[derive(Debug, Clone)]
pub struct GoOptions {
    /// Max tasks to process; 0 means all runnable tasks.
    pub limit: usize,
    pub dry_run: bool,
    /// Require each successful task to advance the workdir's head revision.
    pub require_commit: bool,
    /// Task-level attempt cap; at the cap a failing task becomes `blocked`.
    pub max_attempts: u32,
    /// In-loop retries for transient provider outages; never burn an attempt.
    pub max_transient_retries: u32,
    /// Pause between task iterations.
    pub cooldown: Duration,
    pub agent_timeout: Duration,
    pub verify_timeout: Duration,
    /// Suppress per-task progress lines (the `--json` path).
    pub quiet: bool,
}

impl Default for GoOptions {
    fn default() -> Self {
        Self {
            limit: 0,
            dry_run: false,
            require_commit: false,
            max_attempts: 2,
            max_transient_retries: 2,
            cooldown: Duration::ZERO,
            agent_timeout: DEFAULT_AGENT_TIMEOUT,
            verify_timeout: DEFAULT_VERIFY_TIMEOUT,
            quiet: false,
        }
    }
}

/// Summary of one loop invocation, also emitted to `cycle.log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleOutcome {
    pub instance: String,
    pub processed: usize,
    pub done: usize,
    pub failed: usize,
    pub blocked: usize,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub task_ids: Vec<String>,
}

/// Injectable sleep so tests can observe backoff and cooldown without waiting.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by `std::thread::sleep`.
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Install a Ctrl+C handler that flips a shared flag.
///
/// The loop checks the flag between tasks: the current task always finishes
/// and persists before the cycle summary is written.
pub fn install_interrupt_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("install interrupt handler")?;
    Ok(flag)
}

/// Run the execution loop for one instance.
#[instrument(skip_all, fields(instance = %instance.name, limit = opts.limit, dry_run = opts.dry_run))]
pub fn run_cycle<A: AgentInvoker, V: VerifyRunner, S: Sleeper>(
    paths: &ObliviatePaths,
    instance: &InstancePaths,
    agent: &A,
    verifier: &V,
    sleeper: &S,
    interrupt: &AtomicBool,
    opts: &GoOptions,
) -> Result<CycleOutcome> {
    let meta = load_instance_meta(&instance.meta_path)?;
    let workdir = paths.resolve_workdir(&meta.workdir);

    let mut lock = InstanceLock::acquire(&instance.lock_path)?;
    let mut tasks = load_tasks(&instance.tasks_path)?;
    recover_orphaned_tasks(instance, &mut tasks)?;

    let mut outcome = CycleOutcome {
        instance: instance.name.clone(),
        processed: 0,
        done: 0,
        failed: 0,
        blocked: 0,
        dry_run: opts.dry_run,
        task_ids: Vec::new(),
    };

    loop {
        if interrupt.load(Ordering::SeqCst) {
            info!("interrupt received, stopping before next task");
            break;
        }
        if opts.limit > 0 && outcome.processed >= opts.limit {
            break;
        }
        let Some(idx) = next_runnable(&tasks, opts.max_attempts) else {
            break;
        };

        if opts.dry_run {
            // In-memory only, so a dry run walks the queue without touching disk.
            if !opts.quiet {
                println!("would run {} ({})", tasks[idx].id, tasks[idx].title);
            }
            outcome.task_ids.push(tasks[idx].id.clone());
            tasks[idx].status = TaskStatus::Done;
            outcome.processed += 1;
            continue;
        }

        let task = {
            let started_at = Utc::now();
            tasks[idx].status = TaskStatus::InProgress;
            tasks[idx].updated_at = started_at;
            save_tasks(&instance.tasks_path, &tasks)?;
            tasks[idx].clone()
        };

        // The agent can run for up to 15 minutes; holding the lock across it
        // would make every administrative command time out.
        lock.release()?;

        let (primary_provider, primary_model) = route_model(&task.model_hint);
        let prompt_inputs = PromptInputs::from_disk(paths, instance);
        let prompt = build_execution_prompt(&prompt_inputs, &task)?;

        let head_pre = opts
            .require_commit
            .then(|| Git::new(&workdir).head_revision());

        let started_at = Utc::now();
        let exec = run_agent_with_fallback(
            agent,
            sleeper,
            primary_provider,
            &primary_model,
            &workdir,
            &prompt,
            opts,
        );

        let mut run = RunRecord {
            task_id: task.id.clone(),
            status: TaskStatus::Failed,
            provider: exec.provider.as_str().to_string(),
            model: exec.model.clone(),
            primary_provider: primary_provider.as_str().to_string(),
            primary_model: primary_model.clone(),
            fallback_provider: String::new(),
            fallback_model: String::new(),
            fallback_reason: String::new(),
            started_at,
            finished_at: started_at,
            error: String::new(),
            output_tail: tail(&exec.output, OUTPUT_TAIL_CHARS),
            verify_failed: String::new(),
        };
        if let Some(fb) = &exec.fallback {
            run.fallback_provider = fb.provider.as_str().to_string();
            run.fallback_model = fb.model.clone();
            run.fallback_reason = fb.reason.as_str().to_string();
        }

        let mut exec_error = exec.error;

        if exec_error.is_none() {
            if let Some(failure) =
                run_verifies(verifier, &workdir, &task.verify, opts.verify_timeout)
            {
                exec_error = Some(format!("verify failed: {}", failure.command));
                run.output_tail = tail(
                    &format!("{}\n{}", run.output_tail, failure.output),
                    OUTPUT_TAIL_CHARS,
                );
                run.verify_failed = failure.command;
            }
        }

        if exec_error.is_none() && opts.require_commit {
            exec_error = check_commit_gate(&workdir, head_pre.expect("captured when gated"));
        }

        // Final read-modify-write happens back under the lock, on a fresh
        // load: skip/reset may have run while the agent did.
        lock = match InstanceLock::acquire(&instance.lock_path) {
            Ok(lock) => lock,
            Err(err) => {
                warn!(error = %err, "could not re-acquire lock, stopping loop");
                let _ = append_cycle_summary(&instance.cycle_log_path, &outcome);
                return Err(err.context("re-acquire instance lock after agent run"));
            }
        };
        tasks = load_tasks(&instance.tasks_path)?;
        let Some(idx) = find_task_index(&tasks, &task.id) else {
            let _ = append_cycle_summary(&instance.cycle_log_path, &outcome);
            return Err(anyhow!(
                "task \"{}\" not found in instance \"{}\" after agent run",
                task.id,
                instance.name
            ));
        };

        let now = Utc::now();
        run.finished_at = now;
        match exec_error {
            Some(message) => {
                tasks[idx].attempts += 1;
                tasks[idx].last_error = message.clone();
                tasks[idx].updated_at = now;
                tasks[idx].status = status_after_failure(tasks[idx].attempts, opts.max_attempts);
                if tasks[idx].status == TaskStatus::Blocked {
                    outcome.blocked += 1;
                } else {
                    outcome.failed += 1;
                }
                run.status = tasks[idx].status;
                run.error = message.clone();
                if !opts.quiet {
                    println!("{} {} -> {}: {message}", task.id, task.title, tasks[idx].status);
                }
            }
            None => {
                tasks[idx].status = TaskStatus::Done;
                tasks[idx].last_error.clear();
                tasks[idx].updated_at = now;
                run.status = TaskStatus::Done;
                outcome.done += 1;
                // Learnings are a convenience trail; never fail the task on it.
                let _ = append_line(
                    &instance.learnings_path,
                    &format!(
                        "- [{}] {} completed ({})",
                        now.to_rfc3339_opts(SecondsFormat::Secs, true),
                        task.id,
                        task.title
                    ),
                );
                if !opts.quiet {
                    println!("{} {} -> done", task.id, task.title);
                }
            }
        }

        // Task state first, then the journal: a reader may briefly see a done
        // task without its run record, never the reverse.
        save_tasks(&instance.tasks_path, &tasks)?;
        append_run(&instance.runs_path, &run)?;

        outcome.processed += 1;
        outcome.task_ids.push(task.id.clone());

        if interrupt.load(Ordering::SeqCst) {
            info!("interrupt received, stopping after current task");
            break;
        }
        if !opts.cooldown.is_zero() {
            sleeper.sleep(opts.cooldown);
        }
    }

    append_cycle_summary(&instance.cycle_log_path, &outcome)?;
    lock.release()?;
    Ok(outcome)
}

/// Reset tasks a crashed or killed loop left `in_progress` back to `todo`.
fn recover_orphaned_tasks(instance: &InstancePaths, tasks: &mut [Task]) -> Result<()> {
    let mut recovered = 0;
    for task in tasks.iter_mut() {
        if task.status == TaskStatus::InProgress {
            task.status = TaskStatus::Todo;
            task.last_error.clear();
            task.updated_at = Utc::now();
            recovered += 1;
        }
    }
    if recovered > 0 {
        warn!(recovered, "recovered orphaned in_progress tasks");
        save_tasks(&instance.tasks_path, tasks)?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct FallbackDetail {
    provider: Provider,
    model: String,
    reason: ProviderFailure,
}

/// What one spawn-with-retries pipeline produced.
#[derive(Debug, Clone)]
struct AgentExecution {
    /// Provider/model actually used (the fallback's when a fallback ran).
    provider: Provider,
    model: String,
    output: String,
    error: Option<String>,
    fallback: Option<FallbackDetail>,
}

/// Invoke the primary agent with transient backoff, then fall back once.
///
/// Transient provider outages (rate limits, overloads) retry the primary up
/// to `max_transient_retries` times with 30/60/120 s backoff and never count
/// as an attempt. Any remaining classified failure triggers the one-shot
/// fallback; an unclassified failure belongs to the task.
fn run_agent_with_fallback<A: AgentInvoker, S: Sleeper>(
    agent: &A,
    sleeper: &S,
    primary_provider: Provider,
    primary_model: &str,
    workdir: &Path,
    prompt: &str,
    opts: &GoOptions,
) -> AgentExecution {
    let request = |provider: Provider, model: &str| AgentRequest {
        provider,
        model: model.to_string(),
        workdir: workdir.to_path_buf(),
        prompt: prompt.to_string(),
        timeout: opts.agent_timeout,
    };

    let mut transient_retries = 0u32;
    let mut invocation = agent.run(&request(primary_provider, primary_model));

    loop {
        let Some(error) = invocation.error.clone() else {
            return AgentExecution {
                provider: primary_provider,
                model: primary_model.to_string(),
                output: invocation.output,
                error: None,
                fallback: None,
            };
        };

        let Some(reason) = classify_provider_failure(&error.message, &invocation.output) else {
            // Unrecognized failure: the task owns it, no fallback.
            return AgentExecution {
                provider: primary_provider,
                model: primary_model.to_string(),
                output: invocation.output,
                error: Some(error.message),
                fallback: None,
            };
        };

        if reason.is_transient() && transient_retries < opts.max_transient_retries {
            let delay = transient_backoff(transient_retries);
            info!(
                reason = %reason,
                retry = transient_retries + 1,
                delay_secs = delay.as_secs(),
                "transient provider failure, backing off"
            );
            sleeper.sleep(delay);
            transient_retries += 1;
            invocation = agent.run(&request(primary_provider, primary_model));
            continue;
        }

        let Some((fb_provider, fb_model)) = select_fallback(primary_provider) else {
            return AgentExecution {
                provider: primary_provider,
                model: primary_model.to_string(),
                output: invocation.output,
                error: Some(error.message),
                fallback: None,
            };
        };

        info!(reason = %reason, fallback = %fb_provider, "provider failure, trying fallback");
        let fb_invocation = agent.run(&request(fb_provider, &fb_model));
        let combined = format!(
            "{}\n\n{FALLBACK_MARKER}\n{}",
            invocation.output, fb_invocation.output
        )
        .trim()
        .to_string();
        let detail = FallbackDetail {
            provider: fb_provider,
            model: fb_model.clone(),
            reason,
        };

        return match fb_invocation.error {
            None => AgentExecution {
                provider: fb_provider,
                model: fb_model,
                output: combined,
                error: None,
                fallback: Some(detail),
            },
            Some(fb_error) => AgentExecution {
                provider: fb_provider,
                model: fb_model,
                output: combined,
                error: Some(format!(
                    "primary failed ({reason}): {}; fallback failed: {}",
                    error.message, fb_error.message
                )),
                fallback: Some(detail),
            },
        };
    }
}

/// Require the head revision to have advanced across the task.
fn check_commit_gate(workdir: &Path, head_pre: Result<String>) -> Option<String> {
    let pre = match head_pre {
        Ok(pre) => pre,
        Err(err) => {
            return Some(format!("require-commit: resolve pre-task git head: {err:#}"));
        }
    };
    match Git::new(workdir).head_revision() {
        Err(err) => Some(format!("require-commit: resolve post-task git head: {err:#}")),
        Ok(post) if post == pre => {
            Some("require-commit enabled: no new commit created".to_string())
        }
        Ok(_) => {
            debug!("commit gate passed");
            None
        }
    }
}

/// Append the one-line cycle summary; the last write of a loop invocation.
fn append_cycle_summary(path: &Path, outcome: &CycleOutcome) -> Result<()> {
    let task_ids = if outcome.task_ids.is_empty() {
        "-".to_string()
    } else {
        outcome.task_ids.join(",")
    };
    let line = format!(
        "{} instance={} processed={} done={} failed={} blocked={} dry_run={} task_ids={}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        outcome.instance,
        outcome.processed,
        outcome.done,
        outcome.failed,
        outcome.blocked,
        outcome.dry_run,
        task_ids
    );
    append_line(path, &line)
}
