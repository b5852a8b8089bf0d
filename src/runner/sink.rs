//! Output sinks
//!
//! The executor hands every chunk of child output to a sink as soon as it
//! arrives. Any `io::Write` works as a sink; `SharedOutput` is an in-memory
//! buffer that other threads can inspect while a command is still running.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

/// Append-only consumer of streamed output
pub trait OutputSink {
    /// Append one chunk, in delivery order
    fn append(&mut self, chunk: &[u8]);
}

impl<W: Write> OutputSink for W {
    fn append(&mut self, chunk: &[u8]) {
        if let Err(e) = self.write_all(chunk).and_then(|_| self.flush()) {
            tracing::warn!(error = %e, "output sink rejected a chunk");
        }
    }
}

/// Thread-safe in-memory output buffer
///
/// Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct SharedOutput {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl SharedOutput {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the raw bytes received so far
    pub fn bytes(&self) -> Vec<u8> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Output received so far, lossily decoded
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes()).into_owned()
    }

    /// Whether nothing has been received yet
    pub fn is_empty(&self) -> bool {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
