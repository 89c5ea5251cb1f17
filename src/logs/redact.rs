// src/logs/redact.rs

//! Secret redaction for step log streams.

use async_trait::async_trait;

use crate::errors::Result;
use crate::logs::LogSink;
use crate::pipeline::spec::Secret;

const MASK: &[u8] = b"******";

/// Fragments shorter than this are not redacted; masking one- or two-byte
/// strings would mangle unrelated log output.
const MIN_FRAGMENT_LEN: usize = 3;

/// A [`LogSink`] wrapper that replaces every occurrence of each masked
/// secret value with a fixed mask.
///
/// Writes are not line- or token-aligned, so the redactor holds back the
/// last `max_fragment_len - 1` bytes of the stream: a secret split across
/// two writes is always reassembled before it can be emitted. The holdback
/// is flushed on close.
pub struct SecretRedactor {
    inner: Box<dyn LogSink>,
    fragments: Vec<Vec<u8>>,
    holdback: usize,
    pending: Vec<u8>,
}

impl SecretRedactor {
    /// Wrap `inner`, redacting the given secrets. When nothing needs
    /// masking the sink is returned unwrapped.
    pub fn wrap(inner: Box<dyn LogSink>, secrets: &[Secret]) -> Box<dyn LogSink> {
        let fragments = collect_fragments(secrets);
        if fragments.is_empty() {
            return inner;
        }
        let holdback = fragments.iter().map(|f| f.len()).max().unwrap_or(1) - 1;
        Box::new(Self {
            inner,
            fragments,
            holdback,
            pending: Vec::new(),
        })
    }

    fn masked(&self, data: Vec<u8>) -> Vec<u8> {
        let mut data = data;
        for fragment in &self.fragments {
            data = mask_occurrences(&data, fragment);
        }
        data
    }
}

#[async_trait]
impl LogSink for SecretRedactor {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(chunk);
        let taken = std::mem::take(&mut self.pending);
        let data = self.masked(taken);

        let keep = self.holdback.min(data.len());
        let split = data.len() - keep;
        self.pending = data[split..].to_vec();
        if split > 0 {
            self.inner.write(&data[..split]).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let taken = std::mem::take(&mut self.pending);
        let data = self.masked(taken);
        if !data.is_empty() {
            self.inner.write(&data).await?;
        }
        self.inner.close().await
    }
}

/// Split secret values into redactable fragments: multiline values are
/// masked line by line, trimmed, with too-short fragments dropped.
fn collect_fragments(secrets: &[Secret]) -> Vec<Vec<u8>> {
    let mut fragments = Vec::new();
    for secret in secrets {
        if !secret.masked {
            continue;
        }
        for part in secret.value.split('\n') {
            let part = part.trim();
            if part.len() >= MIN_FRAGMENT_LEN {
                fragments.push(part.as_bytes().to_vec());
            }
        }
    }
    fragments
}

fn mask_occurrences(data: &[u8], fragment: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data.len() - i >= fragment.len() && &data[i..i + fragment.len()] == fragment {
            out.extend_from_slice(MASK);
            i += fragment.len();
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct CaptureSink {
        buf: Arc<Mutex<Vec<u8>>>,
        closed: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl LogSink for CaptureSink {
        async fn write(&mut self, chunk: &[u8]) -> Result<()> {
            self.buf.lock().extend_from_slice(chunk);
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            *self.closed.lock() = true;
            Ok(())
        }
    }

    fn capture() -> (Box<dyn LogSink>, Arc<Mutex<Vec<u8>>>, Arc<Mutex<bool>>) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(Mutex::new(false));
        (
            Box::new(CaptureSink {
                buf: Arc::clone(&buf),
                closed: Arc::clone(&closed),
            }),
            buf,
            closed,
        )
    }

    fn secret(value: &str) -> Secret {
        Secret::masked("token", value)
    }

    #[tokio::test]
    async fn masks_a_secret_inside_one_write() {
        let (sink, buf, _) = capture();
        let mut w = SecretRedactor::wrap(sink, &[secret("hunter2")]);
        w.write(b"password is hunter2!\n").await.unwrap();
        w.close().await.unwrap();
        assert_eq!(&buf.lock()[..], b"password is ******!\n");
    }

    #[tokio::test]
    async fn masks_a_secret_split_across_writes() {
        let (sink, buf, _) = capture();
        let mut w = SecretRedactor::wrap(sink, &[secret("hunter2")]);
        w.write(b"password is hun").await.unwrap();
        w.write(b"ter2!\n").await.unwrap();
        w.close().await.unwrap();
        assert_eq!(&buf.lock()[..], b"password is ******!\n");
    }

    #[tokio::test]
    async fn masks_byte_at_a_time_writes() {
        let (sink, buf, _) = capture();
        let mut w = SecretRedactor::wrap(sink, &[secret("hunter2")]);
        for b in b"say hunter2 twice: hunter2hunter2" {
            w.write(&[*b]).await.unwrap();
        }
        w.close().await.unwrap();
        assert_eq!(&buf.lock()[..], b"say ****** twice: ************");
    }

    #[tokio::test]
    async fn multiline_values_are_masked_per_line() {
        let (sink, buf, _) = capture();
        let key = secret("line-one\nline-two");
        let mut w = SecretRedactor::wrap(sink, &[key]);
        w.write(b"a line-one b line-two c\n").await.unwrap();
        w.close().await.unwrap();
        assert_eq!(&buf.lock()[..], b"a ****** b ****** c\n");
    }

    #[tokio::test]
    async fn unmasked_and_short_secrets_pass_through() {
        let (sink, buf, closed) = capture();
        let plain = Secret {
            name: "user".to_string(),
            value: "alice".to_string(),
            masked: false,
        };
        let short = secret("ab");
        let mut w = SecretRedactor::wrap(sink, &[plain, short]);
        w.write(b"alice ab\n").await.unwrap();
        w.close().await.unwrap();
        assert_eq!(&buf.lock()[..], b"alice ab\n");
        assert!(*closed.lock());
    }
}
