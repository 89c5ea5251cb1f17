// src/pipeline/spec.rs

//! Compiled pipeline description.
//!
//! A [`Spec`] is produced by whatever frontend compiles pipeline source into
//! an executable form; the execution core only reads it. Each backend
//! (container, VM, SSH, ...) supplies its own concrete spec and step types
//! behind these traits, the same way executor backends are swapped in tests.

use std::collections::BTreeMap;

/// When a step is allowed to run, evaluated at dispatch time against the
/// current pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPolicy {
    /// Run only while no previous step has failed.
    #[default]
    OnSuccess,
    /// Run only once some previous step has failed.
    OnFailure,
    /// Run regardless of pipeline state.
    Always,
    /// Never run.
    Never,
}

/// How a non-zero exit code of this step affects the rest of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrPolicy {
    /// The step fails; independent steps keep running.
    #[default]
    Fail,
    /// The step fails and the whole pipeline is cancelled.
    FailFast,
}

/// A secret injected into a step, redacted from its log stream when masked.
#[derive(Debug, Clone)]
pub struct Secret {
    pub name: String,
    pub value: String,
    pub masked: bool,
}

impl Secret {
    pub fn masked(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            masked: true,
        }
    }
}

/// An immutable, already-compiled pipeline: a named set of steps addressed
/// by index.
pub trait Spec: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn step_len(&self) -> usize;

    /// Step at `index`. Panics when out of range, like slice indexing.
    fn step_at(&self, index: usize) -> &dyn Step;
}

/// A single unit of work in the pipeline, mapped 1:1 to a DAG vertex.
pub trait Step: Send + Sync {
    /// Unique within the spec.
    fn name(&self) -> &str;

    /// Names of steps that must reach a terminal state before this one may
    /// start.
    fn dependencies(&self) -> &[String];

    fn run_policy(&self) -> RunPolicy;

    fn err_policy(&self) -> ErrPolicy;

    /// Detached steps run fire-and-forget; their completion does not gate
    /// dependents.
    fn detached(&self) -> bool;

    fn secrets(&self) -> &[Secret];

    fn environ(&self) -> &BTreeMap<String, String>;

    fn set_environ(&mut self, environ: BTreeMap<String, String>);

    /// Mutable copy with the same identity, used to compose the per-run
    /// environment without touching the shared spec.
    fn clone_step(&self) -> Box<dyn Step>;
}
