// src/logs/card.rs

//! Card extraction from step log streams.
//!
//! A step can publish a structured "card" artifact by printing an OSC
//! escape sequence to its log: `ESC ] 1338 ;` followed by the
//! base64-encoded payload and terminated by BEL. The extractor strips the
//! sequence from the forwarded stream and keeps the decoded payload for
//! upload after the step finishes.

use async_trait::async_trait;
use base64::Engine as _;
use tracing::debug;

use crate::errors::Result;
use crate::logs::LogSink;

const CARD_PREFIX: &[u8] = b"\x1b]1338;";
const CARD_TERMINATOR: u8 = 0x07;

/// Lines longer than this are flushed unscanned; a card sequence is never
/// anywhere near this large.
const MAX_LINE_LEN: usize = 64 * 1024;

/// A [`LogSink`] wrapper that sniffs card payloads out of the stream.
pub struct CardExtractor {
    inner: Box<dyn LogSink>,
    line: Vec<u8>,
    card: Option<Vec<u8>>,
}

impl CardExtractor {
    pub fn new(inner: Box<dyn LogSink>) -> Self {
        Self {
            inner,
            line: Vec::new(),
            card: None,
        }
    }

    /// The decoded card payload, if one was captured. Call after `close`.
    pub fn card(&self) -> Option<&[u8]> {
        self.card.as_deref()
    }

    async fn scan_line(&mut self, line: Vec<u8>) -> Result<()> {
        let Some(start) = find(&line, CARD_PREFIX) else {
            return self.inner.write(&line).await;
        };

        let payload_start = start + CARD_PREFIX.len();
        let payload_end = line[payload_start..]
            .iter()
            .position(|&b| b == CARD_TERMINATOR || b == b'\n')
            .map(|i| payload_start + i)
            .unwrap_or(line.len());

        match base64::engine::general_purpose::STANDARD.decode(&line[payload_start..payload_end]) {
            Ok(decoded) => self.card = Some(decoded),
            Err(err) => debug!(error = %err, "discarding undecodable card payload"),
        }

        // Forward the line with the card sequence snipped out.
        let mut rest = &line[payload_end..];
        if rest.first() == Some(&CARD_TERMINATOR) {
            rest = &rest[1..];
        }
        let mut forwarded = line[..start].to_vec();
        forwarded.extend_from_slice(rest);
        if !forwarded.is_empty() && forwarded != b"\n" {
            self.inner.write(&forwarded).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl LogSink for CardExtractor {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.line.extend_from_slice(chunk);

        while let Some(nl) = self.line.iter().position(|&b| b == b'\n') {
            let rest = self.line.split_off(nl + 1);
            let line = std::mem::replace(&mut self.line, rest);
            self.scan_line(line).await?;
        }

        if self.line.len() > MAX_LINE_LEN {
            let line = std::mem::take(&mut self.line);
            self.inner.write(&line).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.line.is_empty() {
            let line = std::mem::take(&mut self.line);
            self.scan_line(line).await?;
        }
        self.inner.close().await
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
