// src/logs/mod.rs

//! Log sinks and the in-core stream wrappers.
//!
//! A [`Streamer`](crate::pipeline::Streamer) opens a raw [`LogSink`] for a
//! step; the step runner wraps it in a [`SecretRedactor`](redact::SecretRedactor)
//! and a [`CardExtractor`](card::CardExtractor) before handing it to the
//! engine.

pub mod card;
pub mod redact;

use async_trait::async_trait;

use crate::errors::Result;

/// Destination for a step's log bytes.
///
/// `close` is always called exactly once when the step ends; implementations
/// may flush or upload buffered content there.
#[async_trait]
pub trait LogSink: Send {
    async fn write(&mut self, chunk: &[u8]) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}
