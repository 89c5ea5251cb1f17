//! Fake collaborators for exercising the executor without a real backend.
//!
//! [`FakeEngine`] plays scripted step outcomes and records invocations;
//! [`RecordingReporter`], [`MemoryStreamer`] and [`RecordingUploader`]
//! capture everything the core emits so tests can assert on it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use dagrun::engine::{Engine, Exited};
use dagrun::errors::{DagrunError, Result};
use dagrun::logs::LogSink;
use dagrun::pipeline::spec::{Spec, Step};
use dagrun::pipeline::state::{RunState, Status};
use dagrun::pipeline::{Reporter, Streamer, Uploader};

/// Scripted behaviour for one step run by the [`FakeEngine`].
#[derive(Debug, Clone)]
pub struct StepScript {
    log: Vec<u8>,
    delay: Option<Duration>,
    result: ScriptResult,
}

#[derive(Debug, Clone)]
enum ScriptResult {
    Exit(i32),
    OomKill,
    Error(String),
    BlockUntilCancelled,
}

impl StepScript {
    pub fn exit(code: i32) -> Self {
        Self {
            log: Vec::new(),
            delay: None,
            result: ScriptResult::Exit(code),
        }
    }

    pub fn oom_kill() -> Self {
        Self {
            log: Vec::new(),
            delay: None,
            result: ScriptResult::OomKill,
        }
    }

    pub fn error(msg: &str) -> Self {
        Self {
            log: Vec::new(),
            delay: None,
            result: ScriptResult::Error(msg.to_string()),
        }
    }

    /// Park in the engine until the pipeline is cancelled.
    pub fn block_until_cancelled() -> Self {
        Self {
            log: Vec::new(),
            delay: None,
            result: ScriptResult::BlockUntilCancelled,
        }
    }

    /// Bytes written to the step's log before the outcome is played.
    pub fn with_log(mut self, bytes: &[u8]) -> Self {
        self.log = bytes.to_vec();
        self
    }

    /// Hold the step in the engine for `delay` before the outcome; a
    /// cancellation during the delay ends the run as cancelled.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Engine that plays [`StepScript`]s and records everything.
#[derive(Default)]
pub struct FakeEngine {
    scripts: Mutex<HashMap<String, StepScript>>,
    setup_error: Mutex<Option<String>>,
    setup_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
    started: Mutex<Vec<String>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeEngine {
    /// Script the outcome for a step; unscripted steps exit 0.
    pub fn script(&self, step: &str, script: StepScript) {
        self.scripts.lock().insert(step.to_string(), script);
    }

    pub fn fail_setup(&self, msg: &str) {
        *self.setup_error.lock() = Some(msg.to_string());
    }

    pub fn setup_calls(&self) -> usize {
        self.setup_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    /// Step names in the order their runs started.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    /// High-water mark of concurrent runs.
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn setup(&self, _spec: &dyn Spec) -> Result<()> {
        self.setup_calls.fetch_add(1, Ordering::SeqCst);
        match self.setup_error.lock().clone() {
            Some(msg) => Err(DagrunError::Other(anyhow!(msg))),
            None => Ok(()),
        }
    }

    async fn destroy(&self, _spec: &dyn Spec) -> Result<()> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        _spec: &dyn Spec,
        step: &dyn Step,
        log: &mut dyn LogSink,
    ) -> Result<Exited> {
        let script = self
            .scripts
            .lock()
            .get(step.name())
            .cloned()
            .unwrap_or_else(|| StepScript::exit(0));

        self.started.lock().push(step.name().to_string());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        if !script.log.is_empty() {
            log.write(&script.log).await?;
        }

        if let Some(delay) = script.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(DagrunError::Cancelled),
            }
        }

        match script.result {
            ScriptResult::Exit(code) => Ok(Exited {
                exit_code: code,
                oom_killed: false,
            }),
            ScriptResult::OomKill => Ok(Exited {
                exit_code: 0,
                oom_killed: true,
            }),
            ScriptResult::Error(msg) => Err(DagrunError::Other(anyhow!(msg))),
            ScriptResult::BlockUntilCancelled => {
                cancel.cancelled().await;
                Err(DagrunError::Cancelled)
            }
        }
    }
}

/// One observed report, snapshotted at call time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEvent {
    Stage {
        status: Status,
    },
    Step {
        name: String,
        status: Status,
        exit_code: i32,
    },
}

/// Reporter that records snapshots and can inject per-step report errors.
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ReportEvent>>,
    fail_steps: Mutex<HashSet<String>>,
}

impl RecordingReporter {
    /// Make every `report_step` for this step return an error (after
    /// recording the snapshot).
    pub fn fail_step_reports(&self, step: &str) {
        self.fail_steps.lock().insert(step.to_string());
    }

    pub fn events(&self) -> Vec<ReportEvent> {
        self.events.lock().clone()
    }

    pub fn step_events(&self, step: &str) -> Vec<ReportEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, ReportEvent::Step { name, .. } if name == step))
            .cloned()
            .collect()
    }

    pub fn stage_events(&self) -> Vec<ReportEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, ReportEvent::Stage { .. }))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn report_stage(&self, state: &RunState) -> Result<()> {
        let status = state.lock().stage.status;
        self.events.lock().push(ReportEvent::Stage { status });
        Ok(())
    }

    async fn report_step(&self, state: &RunState, step_name: &str) -> Result<()> {
        let snapshot = {
            let inner = state.lock();
            inner.step(step_name).map(|s| (s.status, s.exit_code))
        };
        if let Some((status, exit_code)) = snapshot {
            self.events.lock().push(ReportEvent::Step {
                name: step_name.to_string(),
                status,
                exit_code,
            });
        }
        if self.fail_steps.lock().contains(step_name) {
            return Err(DagrunError::Other(anyhow!(
                "injected report failure for '{step_name}'"
            )));
        }
        Ok(())
    }
}

/// Streamer that buffers each step's log in memory.
#[derive(Default)]
pub struct MemoryStreamer {
    logs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    closes: Arc<Mutex<HashMap<String, usize>>>,
}

impl MemoryStreamer {
    pub fn log(&self, step: &str) -> Vec<u8> {
        self.logs.lock().get(step).cloned().unwrap_or_default()
    }

    pub fn close_count(&self, step: &str) -> usize {
        self.closes.lock().get(step).copied().unwrap_or(0)
    }
}

struct MemorySink {
    name: String,
    logs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    closes: Arc<Mutex<HashMap<String, usize>>>,
}

#[async_trait]
impl LogSink for MemorySink {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.logs
            .lock()
            .entry(self.name.clone())
            .or_default()
            .extend_from_slice(chunk);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        *self.closes.lock().entry(self.name.clone()).or_default() += 1;
        Ok(())
    }
}

#[async_trait]
impl Streamer for MemoryStreamer {
    async fn stream(&self, _state: &RunState, step_name: &str) -> Box<dyn LogSink> {
        Box::new(MemorySink {
            name: step_name.to_string(),
            logs: Arc::clone(&self.logs),
            closes: Arc::clone(&self.closes),
        })
    }
}

/// Uploader that keeps received cards.
#[derive(Default)]
pub struct RecordingUploader {
    cards: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingUploader {
    pub fn cards(&self) -> Vec<(String, Vec<u8>)> {
        self.cards.lock().clone()
    }
}

#[async_trait]
impl Uploader for RecordingUploader {
    async fn upload_card(&self, card: &[u8], _state: &RunState, step_name: &str) -> Result<()> {
        self.cards
            .lock()
            .push((step_name.to_string(), card.to_vec()));
        Ok(())
    }
}
