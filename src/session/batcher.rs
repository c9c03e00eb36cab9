//! Frame-cadence output accumulation.
//!
//! The batcher only tracks bytes and whether a flush is already scheduled;
//! the session's pump task owns the timer and the delivery target.

/// Accumulates PTY output between display frames.
#[derive(Debug, Default)]
pub struct OutputBatcher {
    buffer: Vec<u8>,
    flush_scheduled: bool,
}

impl OutputBatcher {
    /// Create an empty batcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk.
    ///
    /// Returns `true` when the caller must schedule a flush, i.e. this is
    /// the first non-empty chunk since the last flush.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        if chunk.is_empty() {
            return false;
        }
        self.buffer.extend_from_slice(chunk);
        if self.flush_scheduled {
            false
        } else {
            self.flush_scheduled = true;
            true
        }
    }

    /// Take everything accumulated so far, clearing the schedule flag.
    pub fn take(&mut self) -> Option<Vec<u8>> {
        self.flush_scheduled = false;
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    /// Put bytes that could not be delivered back in front of the buffer.
    pub fn restore(&mut self, mut bytes: Vec<u8>) {
        bytes.append(&mut self.buffer);
        self.buffer = bytes;
    }

    /// Whether undelivered bytes are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of undelivered bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }
}
