// src/lib.rs

//! dagrun — pipeline execution core for a CI runner.
//!
//! The crate takes an already-compiled pipeline [`Spec`](pipeline::Spec)
//! (a DAG of build steps bound to an execution [`Engine`](engine::Engine))
//! and drives it to completion: topological parallel dispatch, per-step
//! run and failure policies, bounded concurrency, cancellation, log
//! streaming with secret redaction, and progress reporting.
//!
//! Concrete engines (container, VM, SSH), log transports and control-plane
//! reporters live in the embedding runner; this crate defines their
//! contracts and everything between them.

pub mod dag;
pub mod engine;
pub mod environ;
pub mod errors;
pub mod logging;
pub mod logs;
pub mod pipeline;
pub mod runtime;

pub use engine::{Engine, Exited};
pub use errors::{DagrunError, Result};
pub use pipeline::{
    Build, ErrPolicy, NopReporter, NopStreamer, NopUploader, Reporter, RunPolicy, RunState,
    Secret, Spec, Stage, Status, Step, StepState, Streamer, Uploader,
};
pub use runtime::Executor;
