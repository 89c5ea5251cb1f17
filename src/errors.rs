// src/errors.rs

//! Crate-wide error type and multi-error accumulation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DagrunError {
    /// An edge in the step graph references a step name that does not exist.
    #[error("missing vertex: {0}")]
    MissingVertex(String),

    /// The step graph contains a dependency cycle.
    #[error("dependency cycle detected involving step '{0}'")]
    DependencyCycle(String),

    /// The step (or the pipeline) was cancelled. Engines return this when a
    /// run is torn down by the cancellation token rather than by the step
    /// process itself.
    #[error("execution cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Several errors collected over the course of a pipeline run.
    #[error("{}", format_aggregate(.0))]
    Aggregate(Vec<DagrunError>),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DagrunError {
    /// True when the error indicates cancellation rather than failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DagrunError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, DagrunError>;

fn format_aggregate(errors: &[DagrunError]) -> String {
    let parts: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    format!("{} errors occurred: {}", errors.len(), parts.join("; "))
}

/// Collects errors across the phases of a pipeline run.
///
/// Every phase appends rather than replaces, so a log-close failure does not
/// mask an earlier reporter failure. `into_result` collapses to `Ok(())`,
/// the single error, or [`DagrunError::Aggregate`].
#[derive(Debug, Default)]
pub struct Accumulator {
    errors: Vec<DagrunError>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: DagrunError) {
        self.errors.push(err);
    }

    /// Append the error of a result, keeping the value side if any.
    pub fn record<T>(&mut self, res: Result<T>) -> Option<T> {
        match res {
            Ok(v) => Some(v),
            Err(err) => {
                self.errors.push(err);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(mut self) -> Result<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(DagrunError::Aggregate(self.errors)),
        }
    }
}
