// src/runtime/step_runner.rs

//! Per-step execution: policy evaluation, environment composition, engine
//! invocation and result reporting.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::environ;
use crate::errors::{Accumulator, DagrunError, Result};
use crate::logs::card::CardExtractor;
use crate::logs::LogSink;
use crate::logs::redact::SecretRedactor;
use crate::pipeline::spec::{RunPolicy, Spec, Step};
use crate::pipeline::state::{RunState, EXIT_CODE_EARLY_EXIT, EXIT_CODE_OOM_KILLED};
use crate::pipeline::{Reporter, Streamer, Uploader};
use crate::runtime::gate::ConcurrencyGate;

/// Runs a single step from admission to terminal report. One instance is
/// shared by every step task of a pipeline.
pub(crate) struct StepRunner {
    pub engine: Arc<dyn Engine>,
    pub reporter: Arc<dyn Reporter>,
    pub streamer: Arc<dyn Streamer>,
    pub uploader: Arc<dyn Uploader>,
    pub gate: Option<ConcurrencyGate>,
}

impl StepRunner {
    pub async fn exec(
        &self,
        cancel: &CancellationToken,
        state: &Arc<RunState>,
        spec: &Arc<dyn Spec>,
        step: &dyn Step,
    ) -> Result<()> {
        let mut acc = Accumulator::new();
        let name = step.name().to_string();

        if cancel.is_cancelled() {
            state.cancel();
            return Ok(());
        }

        // Admission. The permit releases on drop, so the slot is freed on
        // every exit path, panics included.
        let _permit = match &self.gate {
            Some(gate) => {
                debug!(step = %name, "acquiring concurrency gate");
                match gate.acquire(cancel).await {
                    Ok(permit) => {
                        if cancel.is_cancelled() {
                            state.cancel();
                            return Ok(());
                        }
                        Some(permit)
                    }
                    Err(DagrunError::Cancelled) => {
                        debug!(step = %name, "gate acquire cancelled");
                        state.cancel();
                        return Ok(());
                    }
                    Err(err) => {
                        warn!(step = %name, error = %err, "failed to acquire concurrency gate");
                        return Err(err);
                    }
                }
            }
            None => None,
        };

        // Policy gate. The order matters: cancellation wins over policy,
        // Always bypasses the already-finished check.
        if state.cancelled() {
            return Ok(());
        }
        match step.run_policy() {
            RunPolicy::Never => return Ok(()),
            RunPolicy::Always => {}
            RunPolicy::OnFailure if !state.failed() => {
                state.skip(&name);
                return self.reporter.report_step(state, &name).await;
            }
            RunPolicy::OnSuccess if state.failed() => {
                state.skip(&name);
                return self.reporter.report_step(state, &name).await;
            }
            _ => {
                // Already terminal, e.g. skipped by an early-exit step.
                if state.finished(&name) {
                    return Ok(());
                }
            }
        }

        state.start(&name);
        self.reporter.report_step(state, &name).await?;

        // Compose the effective environment onto a mutable copy of the
        // step. Build/stage/step variables are read under the state lock.
        let mut clone = step.clone_step();
        let composed = {
            let inner = state.lock();
            environ::combine([
                clone.environ().clone(),
                environ::build(&inner.build),
                environ::stage(&inner.stage),
                inner.step(&name).map(environ::step).unwrap_or_default(),
            ])
        };
        clone.set_environ(composed);

        // Log pipeline: raw sink, then secret redaction, then card
        // extraction.
        let raw = self.streamer.stream(state, &name).await;
        let redacted = SecretRedactor::wrap(raw, step.secrets());
        let mut extractor = CardExtractor::new(redacted);

        // Detached steps run fire-and-forget; their status stays Running
        // until the terminal sweep.
        if step.detached() {
            debug!(step = %name, "launching detached step");
            let engine = Arc::clone(&self.engine);
            let spec = Arc::clone(spec);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let res = engine
                    .run(&cancel, spec.as_ref(), clone.as_ref(), &mut extractor)
                    .await;
                if let Err(err) = res {
                    debug!(error = %err, "detached step ended with error");
                }
                if let Err(err) = extractor.close().await {
                    debug!(error = %err, "cannot close detached step log");
                }
            });
            return Ok(());
        }

        let run_result = self
            .engine
            .run(cancel, spec.as_ref(), clone.as_ref(), &mut extractor)
            .await;

        // Close the stream; a remote sink may upload its buffer here.
        if let Err(err) = extractor.close().await {
            acc.push(err);
        }

        if let Some(card) = extractor.card() {
            if let Err(err) = self.uploader.upload_card(card, state, &name).await {
                warn!(step = %name, error = %err, "cannot upload card");
            }
        }

        if cancel.is_cancelled() {
            state.cancel();
            return acc.into_result();
        }

        match run_result {
            Ok(exited) => {
                if exited.oom_killed {
                    debug!(step = %name, "received oom kill");
                    state.finish(&name, EXIT_CODE_OOM_KILLED);
                } else {
                    debug!(step = %name, exit_code = exited.exit_code, "step exited");
                    state.finish(&name, exited.exit_code);
                }
                if let Err(err) = self.reporter.report_step(state, &name).await {
                    warn!(step = %name, error = %err, "cannot report step status");
                    acc.push(err);
                }
                if exited.exit_code == EXIT_CODE_EARLY_EXIT {
                    debug!(step = %name, "received early exit; skipping remaining pending steps");
                    state.skip_all();
                }
                acc.into_result()
            }
            Err(err) if err.is_cancelled() => {
                state.cancel();
                acc.into_result()
            }
            Err(err) => {
                // Internal engine error, as opposed to a step process
                // exiting non-zero.
                state.fail(&name, &err);
                if let Err(report_err) = self.reporter.report_step(state, &name).await {
                    warn!(step = %name, error = %report_err, "cannot report step failure");
                    acc.push(report_err);
                }
                acc.into_result()
            }
        }
    }
}
