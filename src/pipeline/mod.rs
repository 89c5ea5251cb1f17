// src/pipeline/mod.rs

//! Pipeline data model and reporting collaborators.

pub mod spec;
pub mod state;

use async_trait::async_trait;

use crate::errors::Result;
use crate::logs::LogSink;

pub use spec::{ErrPolicy, RunPolicy, Secret, Spec, Step};
pub use state::{Build, RunState, Stage, StateInner, Status, StepState};

/// Publishes state snapshots to whatever tracks the build (control plane,
/// terminal UI, ...). Reports are idempotent snapshots of the state at call
/// time; implementations must tolerate concurrent calls for distinct steps.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report_stage(&self, state: &RunState) -> Result<()>;

    async fn report_step(&self, state: &RunState, step_name: &str) -> Result<()>;
}

/// Opens per-step log sinks. The returned sink's `close` may flush or
/// upload the buffered log.
#[async_trait]
pub trait Streamer: Send + Sync {
    async fn stream(&self, state: &RunState, step_name: &str) -> Box<dyn LogSink>;
}

/// Receives card artifacts extracted from step logs.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload_card(&self, card: &[u8], state: &RunState, step_name: &str) -> Result<()>;
}

/// Reporter that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopReporter;

#[async_trait]
impl Reporter for NopReporter {
    async fn report_stage(&self, _state: &RunState) -> Result<()> {
        Ok(())
    }

    async fn report_step(&self, _state: &RunState, _step_name: &str) -> Result<()> {
        Ok(())
    }
}

/// Streamer that discards all log output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopStreamer;

struct NopSink;

#[async_trait]
impl LogSink for NopSink {
    async fn write(&mut self, _chunk: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Streamer for NopStreamer {
    async fn stream(&self, _state: &RunState, _step_name: &str) -> Box<dyn LogSink> {
        Box::new(NopSink)
    }
}

/// Uploader that discards cards.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopUploader;

#[async_trait]
impl Uploader for NopUploader {
    async fn upload_card(&self, _card: &[u8], _state: &RunState, _step_name: &str) -> Result<()> {
        Ok(())
    }
}
