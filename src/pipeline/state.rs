// src/pipeline/state.rs

//! Shared, mutex-protected record of build, stage and step status.
//!
//! The executor and every step task mutate the same [`RunState`]. All
//! mutation goes through a single mutex; compound read-modify-write
//! sequences (e.g. reading an exit code right after a finish) take the
//! guard explicitly via [`RunState::lock`].

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

/// Exit code a step uses to request an early exit: the step itself counts
/// as passed and all remaining pending steps are skipped.
pub const EXIT_CODE_EARLY_EXIT: i32 = 78;

/// Conventional exit code recorded when the engine reports an OOM kill.
pub const EXIT_CODE_OOM_KILLED: i32 = 137;

/// Exit code recorded when a step fails with an internal error rather
/// than a process exit.
pub const EXIT_CODE_INTERNAL_ERROR: i32 = 255;

/// Lifecycle status of a step (and, derived, of the stage).
///
/// Transitions are monotonic: Pending → (Running | Skipped) →
/// (Passed | Failed | Killed). Mutators on [`RunState`] ignore steps that
/// are already terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Running,
    Skipped,
    Passed,
    Failed,
    Killed,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Pending | Status::Running)
    }
}

/// Build metadata, read by environment composition and reporters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Build {
    pub number: u64,
    pub event: String,
    pub commit: String,
    pub branch: String,
    pub link: String,
}

/// The stage grouping reported atomically at run start and end.
#[derive(Debug, Clone, Serialize)]
pub struct Stage {
    pub name: String,
    pub number: u64,
    pub status: Status,
}

impl Stage {
    pub fn new(name: impl Into<String>, number: u64) -> Self {
        Self {
            name: name.into(),
            number,
            status: Status::Pending,
        }
    }
}

/// Per-step record.
#[derive(Debug, Clone, Serialize)]
pub struct StepState {
    pub name: String,
    pub number: u64,
    pub status: Status,
    pub exit_code: i32,
    pub error: Option<String>,
    /// Unix seconds; zero until the step starts.
    pub started: u64,
    /// Unix seconds; zero until the step reaches a terminal state.
    pub stopped: u64,
}

/// The data behind the [`RunState`] mutex.
#[derive(Debug)]
pub struct StateInner {
    pub build: Build,
    pub stage: Stage,
    pub steps: Vec<StepState>,
    cancelled: bool,
}

impl StateInner {
    pub fn step(&self, name: &str) -> Option<&StepState> {
        self.steps.iter().find(|s| s.name == name)
    }

    fn step_mut(&mut self, name: &str) -> Option<&mut StepState> {
        self.steps.iter_mut().find(|s| s.name == name)
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn failed(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s.status, Status::Failed | Status::Killed))
    }

    /// Derive the stage status from the step records.
    fn sync_stage(&mut self) {
        if self.cancelled {
            self.stage.status = Status::Killed;
        } else if self.failed() {
            self.stage.status = Status::Failed;
        } else if self.steps.iter().all(|s| s.status.is_terminal()) {
            self.stage.status = Status::Passed;
        } else if self.steps.iter().any(|s| s.status != Status::Pending) {
            self.stage.status = Status::Running;
        }
    }
}

/// Mutex-protected run state shared between the executor and step tasks.
#[derive(Debug)]
pub struct RunState {
    inner: Mutex<StateInner>,
}

impl RunState {
    /// Create a state with one pending record per step name, numbered from 1.
    pub fn new(build: Build, stage: Stage, step_names: impl IntoIterator<Item = String>) -> Self {
        let steps = step_names
            .into_iter()
            .enumerate()
            .map(|(i, name)| StepState {
                name,
                number: i as u64 + 1,
                status: Status::Pending,
                exit_code: 0,
                error: None,
                started: 0,
                stopped: 0,
            })
            .collect();

        Self {
            inner: Mutex::new(StateInner {
                build,
                stage,
                steps,
                cancelled: false,
            }),
        }
    }

    /// Take the state lock for a compound read or read-modify-write.
    pub fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock()
    }

    /// True once any step has failed or been killed.
    pub fn failed(&self) -> bool {
        self.inner.lock().failed()
    }

    /// True once the pipeline has been cancelled.
    pub fn cancelled(&self) -> bool {
        self.inner.lock().cancelled
    }

    /// True when the named step is in a terminal state.
    pub fn finished(&self, name: &str) -> bool {
        self.inner
            .lock()
            .step(name)
            .map(|s| s.status.is_terminal())
            .unwrap_or(false)
    }

    /// Mark the named step running.
    pub fn start(&self, name: &str) {
        let mut inner = self.inner.lock();
        if let Some(step) = inner.step_mut(name) {
            if step.status == Status::Pending {
                step.status = Status::Running;
                step.started = unix_now();
            }
        }
        inner.sync_stage();
    }

    /// Record the step's exit code and derive its terminal status.
    ///
    /// Exit code 78 requests an early exit and counts as passing; a step
    /// with a recorded error is failed regardless of the code.
    pub fn finish(&self, name: &str, exit_code: i32) {
        let mut inner = self.inner.lock();
        if let Some(step) = inner.step_mut(name) {
            if !step.status.is_terminal() {
                step.exit_code = exit_code;
                step.status = match () {
                    _ if step.error.is_some() => Status::Failed,
                    _ if exit_code == 0 || exit_code == EXIT_CODE_EARLY_EXIT => Status::Passed,
                    _ => Status::Failed,
                };
                step.stopped = unix_now();
            }
        }
        inner.sync_stage();
    }

    /// Mark a still-pending step skipped.
    pub fn skip(&self, name: &str) {
        let mut inner = self.inner.lock();
        if let Some(step) = inner.step_mut(name) {
            if step.status == Status::Pending {
                step.status = Status::Skipped;
                let now = unix_now();
                step.started = now;
                step.stopped = now;
            }
        }
        inner.sync_stage();
    }

    /// Skip every step that has not started yet.
    pub fn skip_all(&self) {
        let mut inner = self.inner.lock();
        let now = unix_now();
        for step in &mut inner.steps {
            if step.status == Status::Pending {
                step.status = Status::Skipped;
                step.started = now;
                step.stopped = now;
            }
        }
        inner.sync_stage();
    }

    /// Fail the named step with an internal error.
    pub fn fail(&self, name: &str, err: &DagrunErrorLike) {
        let mut inner = self.inner.lock();
        if let Some(step) = inner.step_mut(name) {
            if !step.status.is_terminal() {
                step.status = Status::Failed;
                step.error = Some(err.to_string());
                step.exit_code = EXIT_CODE_INTERNAL_ERROR;
                step.stopped = unix_now();
            }
        }
        inner.sync_stage();
    }

    /// Fail every step that has not reached a terminal state.
    pub fn fail_all(&self, err: &DagrunErrorLike) {
        let mut inner = self.inner.lock();
        let now = unix_now();
        let msg = err.to_string();
        for step in &mut inner.steps {
            if !step.status.is_terminal() {
                step.status = Status::Failed;
                step.error = Some(msg.clone());
                step.exit_code = EXIT_CODE_INTERNAL_ERROR;
                step.stopped = now;
            }
        }
        inner.sync_stage();
    }

    /// Terminal sweep: drive every still-pending or still-running step to
    /// Passed (no error recorded) or Failed.
    pub fn finish_all(&self) {
        let mut inner = self.inner.lock();
        let now = unix_now();
        for step in &mut inner.steps {
            if !step.status.is_terminal() {
                step.status = if step.error.is_some() {
                    Status::Failed
                } else {
                    Status::Passed
                };
                step.stopped = now;
            }
        }
        inner.sync_stage();
    }

    /// Cancel the pipeline: every non-terminal step is killed.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        inner.cancelled = true;
        let now = unix_now();
        for step in &mut inner.steps {
            if !step.status.is_terminal() {
                step.status = Status::Killed;
                step.stopped = now;
            }
        }
        inner.sync_stage();
    }
}

/// Anything displayable can be recorded as a step error; in practice this is
/// [`crate::errors::DagrunError`] or a collaborator's error.
pub type DagrunErrorLike = dyn std::fmt::Display + Send + Sync;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
