// src/runtime/gate.rs

//! Bounded-parallelism admission control for step execution.

use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::errors::{DagrunError, Result};

/// A weighted counting gate limiting how many steps run concurrently.
///
/// The permit releases its token on drop, so release is always paired with
/// a successful acquire and survives panics in the step body.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    sem: Arc<Semaphore>,
}

impl ConcurrencyGate {
    /// A gate admitting `threads` concurrent steps, or `None` when
    /// `threads` is zero (unlimited).
    pub fn new(threads: usize) -> Option<Self> {
        if threads == 0 {
            return None;
        }
        Some(Self {
            sem: Arc::new(Semaphore::new(threads)),
        })
    }

    /// Wait for a slot. Returns [`DagrunError::Cancelled`] when the token
    /// fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit> {
        tokio::select! {
            _ = cancel.cancelled() => Err(DagrunError::Cancelled),
            permit = Arc::clone(&self.sem).acquire_owned() => {
                permit.map_err(|e| DagrunError::Other(anyhow!("concurrency gate closed: {e}")))
            }
        }
    }
}
