// src/runtime/executor.rs

//! Pipeline orchestration: owns the lifecycle of one stage run.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::dag::DagScheduler;
use crate::engine::Engine;
use crate::errors::{Accumulator, DagrunError, Result};
use crate::pipeline::spec::{ErrPolicy, Spec};
use crate::pipeline::state::RunState;
use crate::pipeline::{Reporter, Streamer, Uploader};
use crate::runtime::gate::ConcurrencyGate;
use crate::runtime::step_runner::StepRunner;

/// Drives a compiled [`Spec`] to completion on an [`Engine`], streaming
/// logs and reporting progress through the configured collaborators.
pub struct Executor {
    engine: Arc<dyn Engine>,
    reporter: Arc<dyn Reporter>,
    runner: Arc<StepRunner>,
}

impl Executor {
    /// Wire an executor. `threads` bounds how many steps run concurrently;
    /// zero means unbounded.
    pub fn new(
        reporter: Arc<dyn Reporter>,
        streamer: Arc<dyn Streamer>,
        uploader: Arc<dyn Uploader>,
        engine: Arc<dyn Engine>,
        threads: usize,
    ) -> Self {
        Self {
            engine: Arc::clone(&engine),
            reporter: Arc::clone(&reporter),
            runner: Arc::new(StepRunner {
                engine,
                reporter,
                streamer,
                uploader,
                gate: ConcurrencyGate::new(threads),
            }),
        }
    }

    /// Execute the pipeline and return the accumulated orchestration error.
    ///
    /// Step failures are not an error here: they surface through `state`.
    /// The engine environment is destroyed on every path, including
    /// cancellation, which is why teardown ignores the caller's token.
    pub async fn exec(
        &self,
        cancel: CancellationToken,
        spec: Arc<dyn Spec>,
        state: Arc<RunState>,
    ) -> Result<()> {
        debug!(pipeline = %spec.name(), steps = spec.step_len(), "executing pipeline");
        let result = self.run_stage(&cancel, &spec, &state).await;

        debug!("destroying the pipeline environment");
        match self.engine.destroy(spec.as_ref()).await {
            Ok(()) => debug!("successfully destroyed the pipeline environment"),
            Err(err) => debug!(error = %err, "cannot destroy the pipeline environment"),
        }

        result
    }

    async fn run_stage(
        &self,
        cancel: &CancellationToken,
        spec: &Arc<dyn Spec>,
        state: &Arc<RunState>,
    ) -> Result<()> {
        if let Err(err) = self.engine.setup(spec.as_ref()).await {
            error!(error = %err, "cannot set up the pipeline environment");
            state.fail_all(&err);
            return self.reporter.report_stage(state).await;
        }

        // Child token: a fail-fast step cancels siblings without touching
        // the caller's token.
        let child = cancel.child_token();

        let mut dag = DagScheduler::new();
        for i in 0..spec.step_len() {
            let name = spec.step_at(i).name().to_string();
            let runner = Arc::clone(&self.runner);
            let spec = Arc::clone(spec);
            let state = Arc::clone(state);
            let child = child.clone();
            dag.add_vertex(
                name,
                Box::pin(async move {
                    let step = spec.step_at(i);
                    let res = runner.exec(&child, &state, &spec, step).await;
                    if step.err_policy() == ErrPolicy::FailFast {
                        // Reading the record needs the lock; the step task
                        // that wrote it has already returned.
                        let exit_code = {
                            let inner = state.lock();
                            inner.step(step.name()).map(|s| s.exit_code).unwrap_or(0)
                        };
                        if exit_code > 0 {
                            debug!(step = %step.name(), exit_code, "fail-fast step failed; cancelling pipeline");
                            child.cancel();
                        }
                    }
                    res
                }),
            );
        }
        for i in 0..spec.step_len() {
            let step = spec.step_at(i);
            for dep in step.dependencies() {
                dag.add_edge(dep.clone(), step.name().to_string());
            }
        }

        let mut acc = Accumulator::new();
        if let Err(err) = dag.run().await {
            match &err {
                DagrunError::MissingVertex(_) | DagrunError::DependencyCycle(_) => {
                    error!(error = %err, "cannot schedule the pipeline");
                }
                _ => {}
            }
            // An unexpected scheduler error must place the pipeline in a
            // failing state if it is not failing already.
            if !state.failed() {
                state.fail_all(&err);
            }
            acc.push(err);
        }

        state.finish_all();
        if let Err(err) = self.reporter.report_stage(state).await {
            acc.push(err);
        }
        acc.into_result()
    }
}
