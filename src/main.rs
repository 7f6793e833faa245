//! Fresh-context task loop runner.
//!
//! Maintains per-instance task queues under `<project>/.obliviate/` and
//! executes them one at a time by spawning non-interactive coding agents,
//! gating each task on its verify commands.

use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result, anyhow};
use clap::{ArgGroup, Parser, Subcommand};
use serde::Serialize;

use obliviate::add::{TaskDraft, add_tasks, parse_batch};
use obliviate::admin::{
    list_runs, reset_task, show_task, skip_task, status_all, status_instance,
};
use obliviate::core::task::RunRecord;
use obliviate::exit_codes::classify_exit_code;
use obliviate::go::{GoOptions, ThreadSleeper, install_interrupt_flag, run_cycle};
use obliviate::init::init_instance;
use obliviate::io::agent::CliAgentInvoker;
use obliviate::io::paths::ObliviatePaths;
use obliviate::io::verify::ShellVerifyRunner;
use obliviate::logging;

#[derive(Parser)]
#[command(
    name = "obliviate",
    version,
    about = "Fresh-context task loop runner driving non-interactive coding agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create instance files under .obliviate/ if absent.
    Init {
        instance: String,
        /// Workdir agents and verify commands run in, relative to the project root.
        #[arg(long, default_value = ".")]
        workdir: String,
    },
    /// Add one task to an instance queue.
    Add {
        instance: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        spec: String,
        /// Verification command (repeatable).
        #[arg(long = "verify")]
        verify: Vec<String>,
        /// Model hint (codex, claude-sonnet, claude-opus, ...).
        #[arg(long = "model", default_value = "")]
        model: String,
        #[arg(long, default_value = "med")]
        priority: String,
        #[arg(long, default_value = "agent")]
        source: String,
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Add tasks in bulk from a JSON array or JSONL input.
    #[command(group(ArgGroup::new("input").required(true).args(["file", "stdin"])))]
    AddBatch {
        instance: String,
        /// Input file (json array or jsonl).
        #[arg(long)]
        file: Option<PathBuf>,
        /// Read batch input from stdin.
        #[arg(long)]
        stdin: bool,
        #[arg(long)]
        json: bool,
    },
    /// Counts by status; without an instance, enumerate all instances.
    Status {
        instance: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Print one task.
    Show {
        instance: String,
        task_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Put a task back to todo with zeroed attempts.
    Reset {
        instance: String,
        task_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Block a task so the loop never picks it.
    Skip {
        instance: String,
        task_id: String,
        /// Human-readable skip reason.
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Tail of the run journal.
    Runs {
        instance: String,
        /// Most recent runs to return (0 = all).
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Filter by task id.
        #[arg(long)]
        task_id: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Run the task loop.
    Go {
        instance: String,
        /// Max tasks to process (0 = all).
        #[arg(long, default_value_t = 0)]
        limit: usize,
        /// Show what would run without spawning agents.
        #[arg(long)]
        dry_run: bool,
        /// Require each successful task to create a new git commit.
        #[arg(long)]
        require_commit: bool,
        /// Task failures allowed before a task is blocked.
        #[arg(long, default_value_t = 2)]
        max_attempts: u32,
        /// In-loop retries for transient provider outages.
        #[arg(long, default_value_t = 2)]
        max_transient_retries: u32,
        /// Pause between tasks, in seconds.
        #[arg(long, default_value_t = 0)]
        cooldown_secs: u64,
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli.command) {
        eprintln!("error: {err:#}");
        std::process::exit(classify_exit_code(&format!("{err:#}")));
    }
}

fn run(command: Command) -> Result<()> {
    let paths = ObliviatePaths::from_cwd()?;
    match command {
        Command::Init { instance, workdir } => cmd_init(&paths, &instance, &workdir),
        Command::Add {
            instance,
            title,
            spec,
            verify,
            model,
            priority,
            source,
            json,
        } => cmd_add(&paths, &instance, &title, &spec, verify, &model, &priority, &source, json),
        Command::AddBatch {
            instance,
            file,
            stdin,
            json,
        } => cmd_add_batch(&paths, &instance, file, stdin, json),
        Command::Status { instance, json } => cmd_status(&paths, instance.as_deref(), json),
        Command::Show {
            instance,
            task_id,
            json,
        } => cmd_show(&paths, &instance, &task_id, json),
        Command::Reset {
            instance,
            task_id,
            json,
        } => cmd_reset(&paths, &instance, &task_id, json),
        Command::Skip {
            instance,
            task_id,
            reason,
            json,
        } => cmd_skip(&paths, &instance, &task_id, reason.as_deref(), json),
        Command::Runs {
            instance,
            limit,
            task_id,
            json,
        } => cmd_runs(&paths, &instance, limit, task_id.as_deref(), json),
        Command::Go {
            instance,
            limit,
            dry_run,
            require_commit,
            max_attempts,
            max_transient_retries,
            cooldown_secs,
            json,
        } => cmd_go(
            &paths,
            &instance,
            GoOptions {
                limit,
                dry_run,
                require_commit,
                max_attempts,
                max_transient_retries,
                cooldown: std::time::Duration::from_secs(cooldown_secs),
                quiet: json,
                ..GoOptions::default()
            },
            json,
        ),
    }
}

fn cmd_init(paths: &ObliviatePaths, instance: &str, workdir: &str) -> Result<()> {
    let instance_paths = init_instance(paths, instance, workdir)?;
    println!(
        "initialized instance \"{instance}\" at {}",
        instance_paths.dir.display()
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_add(
    paths: &ObliviatePaths,
    instance: &str,
    title: &str,
    spec: &str,
    verify: Vec<String>,
    model: &str,
    priority: &str,
    source: &str,
    json: bool,
) -> Result<()> {
    let instance_paths = paths.existing_instance(instance)?;
    let draft = TaskDraft::new(title, spec, verify, model, priority, source)?;
    let added = add_tasks(&instance_paths, vec![draft])?;
    if json {
        return print_json(&added[0]);
    }
    println!("added 1 task: {}", added[0].id);
    Ok(())
}

fn cmd_add_batch(
    paths: &ObliviatePaths,
    instance: &str,
    file: Option<PathBuf>,
    stdin: bool,
    json: bool,
) -> Result<()> {
    let instance_paths = paths.existing_instance(instance)?;
    let payload = if stdin {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read batch from stdin")?;
        buf
    } else {
        let path = file.expect("clap enforces --file or --stdin");
        std::fs::read_to_string(&path)
            .with_context(|| format!("read batch file {}", path.display()))?
    };

    let drafts = parse_batch(&payload)?;
    if drafts.is_empty() {
        return Err(anyhow!("no valid tasks in input"));
    }
    let added = add_tasks(&instance_paths, drafts)?;
    if json {
        return print_json(&added);
    }
    println!("added {} tasks to {instance}", added.len());
    Ok(())
}

fn cmd_status(paths: &ObliviatePaths, instance: Option<&str>, json: bool) -> Result<()> {
    if let Some(instance) = instance {
        let instance_paths = paths.existing_instance(instance)?;
        let summary = status_instance(&instance_paths)?;
        if json {
            return print_json(&summary);
        }
        print_status_line(&summary);
        return Ok(());
    }

    let all = status_all(paths)?;
    if json {
        return print_json(&all);
    }
    if all.is_empty() {
        println!("no instances found");
        return Ok(());
    }
    for summary in &all {
        print_status_line(summary);
    }
    Ok(())
}

fn print_status_line(summary: &obliviate::admin::StatusSummary) {
    println!(
        "[{}] total={} todo={} in_progress={} done={} failed={} blocked={}",
        summary.instance,
        summary.total,
        summary.todo,
        summary.in_progress,
        summary.done,
        summary.failed,
        summary.blocked
    );
}

fn cmd_show(paths: &ObliviatePaths, instance: &str, task_id: &str, _json: bool) -> Result<()> {
    let instance_paths = paths.existing_instance(instance)?;
    let task = show_task(&instance_paths, task_id)?;
    print_json(&task)
}

fn cmd_reset(paths: &ObliviatePaths, instance: &str, task_id: &str, json: bool) -> Result<()> {
    let instance_paths = paths.existing_instance(instance)?;
    let task = reset_task(&instance_paths, task_id)?;
    if json {
        return print_json(&task);
    }
    println!("reset {} -> todo", task.id);
    Ok(())
}

fn cmd_skip(
    paths: &ObliviatePaths,
    instance: &str,
    task_id: &str,
    reason: Option<&str>,
    json: bool,
) -> Result<()> {
    let instance_paths = paths.existing_instance(instance)?;
    let task = skip_task(&instance_paths, task_id, reason)?;
    if json {
        return print_json(&task);
    }
    println!("skipped {} -> blocked ({})", task.id, task.last_error);
    Ok(())
}

#[derive(Serialize)]
struct RunsResult<'a> {
    instance: &'a str,
    count: usize,
    runs: Vec<RunRecord>,
}

fn cmd_runs(
    paths: &ObliviatePaths,
    instance: &str,
    limit: usize,
    task_id: Option<&str>,
    json: bool,
) -> Result<()> {
    let instance_paths = paths.existing_instance(instance)?;
    let runs = list_runs(&instance_paths, limit, task_id)?;
    if json {
        return print_json(&RunsResult {
            instance,
            count: runs.len(),
            runs,
        });
    }
    if runs.is_empty() {
        println!("[{instance}] no runs found");
        return Ok(());
    }
    for run in &runs {
        println!(
            "{} {} {} {}/{}",
            run.finished_at.to_rfc3339(),
            run.task_id,
            run.status,
            run.provider,
            run.model
        );
    }
    Ok(())
}

fn cmd_go(paths: &ObliviatePaths, instance: &str, opts: GoOptions, json: bool) -> Result<()> {
    let instance_paths = paths.existing_instance(instance)?;
    // A handler may already be registered (e.g. under a test harness); run
    // without interrupt support in that case.
    let interrupt = install_interrupt_flag()
        .unwrap_or_else(|_| std::sync::Arc::new(AtomicBool::new(false)));

    let outcome = run_cycle(
        paths,
        &instance_paths,
        &CliAgentInvoker,
        &ShellVerifyRunner,
        &ThreadSleeper,
        &interrupt,
        &opts,
    )?;

    if json {
        return print_json(&outcome);
    }
    println!("processed {} task(s)", outcome.processed);
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{rendered}");
    Ok(())
}
