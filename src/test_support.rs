//! Test-only helpers: deterministic tasks and scripted loop collaborators.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use crate::core::task::{Task, TaskStatus};
use crate::go::Sleeper;
use crate::io::agent::{AgentInvocation, AgentInvoker, AgentRequest};
use crate::io::verify::{VerifyOutput, VerifyRunner};

/// Create a deterministic `todo` task with default fields.
pub fn task(id: &str) -> Task {
    let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    Task {
        id: id.to_string(),
        title: format!("{id} title"),
        spec: format!("{id} spec"),
        verify: vec!["echo ok".to_string()],
        status: TaskStatus::Todo,
        model_hint: "codex".to_string(),
        priority: "med".to_string(),
        attempts: 0,
        last_error: String::new(),
        source: "test".to_string(),
        created_at: ts,
        updated_at: ts,
    }
}

/// Create a deterministic task with an explicit status.
pub fn task_with_status(id: &str, status: TaskStatus) -> Task {
    let mut task = task(id);
    task.status = status;
    task
}

/// Agent invoker that replays a scripted sequence of invocations.
///
/// Panics when invoked past the end of the script: a test that spawns more
/// agents than it scripted is broken.
pub struct ScriptedAgent {
    script: RefCell<VecDeque<AgentInvocation>>,
    calls: RefCell<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(script: Vec<AgentInvocation>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Requests seen so far, in order.
    pub fn calls(&self) -> Vec<AgentRequest> {
        self.calls.borrow().clone()
    }
}

impl AgentInvoker for ScriptedAgent {
    fn run(&self, request: &AgentRequest) -> AgentInvocation {
        self.calls.borrow_mut().push(request.clone());
        self.script
            .borrow_mut()
            .pop_front()
            .expect("scripted agent invoked past the end of its script")
    }
}

/// Verify runner that replays scripted outcomes, then keeps passing.
pub struct ScriptedVerifier {
    script: RefCell<VecDeque<VerifyOutput>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedVerifier {
    /// A verifier whose every command passes.
    pub fn passing() -> Self {
        Self::new(Vec::new())
    }

    /// Replay `script` outcomes in order; pass once the script is exhausted.
    pub fn new(script: Vec<VerifyOutput>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// One scripted failure, then passes.
    pub fn failing_once(output: &str) -> Self {
        Self::new(vec![VerifyOutput {
            output: output.to_string(),
            error: Some("verify exited with status Some(1)".to_string()),
        }])
    }

    /// Commands seen so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl VerifyRunner for ScriptedVerifier {
    fn run_command(&self, _workdir: &Path, command: &str, _timeout: Duration) -> VerifyOutput {
        self.calls.borrow_mut().push(command.to_string());
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| VerifyOutput {
                output: "ok".to_string(),
                error: None,
            })
    }
}

/// Sleeper that records requested durations and returns immediately.
#[derive(Default)]
pub struct RecordingSleeper {
    slept: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept.borrow_mut().push(duration);
    }
}
