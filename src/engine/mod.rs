// src/engine/mod.rs

//! Execution engine contract.
//!
//! An engine owns the environment a pipeline runs in (container, VM, SSH
//! session, ...). The core calls `setup` once, `run` once per non-skipped
//! step, and `destroy` exactly once per pipeline, regardless of how the run
//! ends.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::Result;
use crate::logs::LogSink;
use crate::pipeline::spec::{Spec, Step};

/// How a step process exited.
#[derive(Debug, Clone, Copy, Default)]
pub struct Exited {
    pub exit_code: i32,
    pub oom_killed: bool,
}

/// A pluggable execution backend. Implementations must be safe for
/// concurrent `run` invocations on distinct steps.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Provision the pipeline environment. Runs outside the caller's
    /// cancellation scope so a cancelled run never half-provisions.
    async fn setup(&self, spec: &dyn Spec) -> Result<()>;

    /// Tear down the pipeline environment. Also outside the cancellation
    /// scope: a cancelled run still cleans up.
    async fn destroy(&self, spec: &dyn Spec) -> Result<()>;

    /// Execute one step, streaming its output into `log`.
    ///
    /// Returns [`Exited`] when the step process ran to an exit code, or an
    /// error for internal engine failures. Cancellation surfaces either
    /// through the token or as [`DagrunError::Cancelled`](crate::errors::DagrunError::Cancelled).
    async fn run(
        &self,
        cancel: &CancellationToken,
        spec: &dyn Spec,
        step: &dyn Step,
        log: &mut dyn LogSink,
    ) -> Result<Exited>;
}
