//! Bounded scrollback buffering for session output.
//!
//! Each session retains its recent output so a reconnecting client can be
//! replayed the full buffer. The buffer holds whole chunks in emission order
//! and prunes from the oldest end after every append.

use std::collections::VecDeque;

use bytes::Bytes;

/// Retention budget for one session's scrollback.
pub const SCROLLBACK_CAP_BYTES: usize = 100 * 1024;

/// Ordered sequence of output chunks with a running byte total.
///
/// Eviction removes whole chunks from the oldest end, but the newest chunk is
/// never evicted even if it alone exceeds the budget, so a live session always
/// has something to replay.
#[derive(Debug)]
pub struct ScrollbackBuffer {
    chunks: VecDeque<Bytes>,
    total_bytes: usize,
    cap: usize,
}

impl ScrollbackBuffer {
    /// Creates a buffer with the standard retention budget.
    pub fn new() -> Self {
        Self::with_cap(SCROLLBACK_CAP_BYTES)
    }

    /// Creates a buffer with an explicit budget.
    pub fn with_cap(cap: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            total_bytes: 0,
            cap,
        }
    }

    /// Appends a chunk, then prunes oldest-first until within budget.
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.total_bytes += chunk.len();
        self.chunks.push_back(chunk);
        while self.total_bytes > self.cap && self.chunks.len() > 1 {
            if let Some(evicted) = self.chunks.pop_front() {
                self.total_bytes -= evicted.len();
            }
        }
    }

    /// Concatenates every buffered chunk into one replay payload.
    pub fn replay(&self) -> Bytes {
        let mut out = Vec::with_capacity(self.total_bytes);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        Bytes::from(out)
    }

    /// Total buffered bytes.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Number of buffered chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl Default for ScrollbackBuffer {
    fn default() -> Self {
        Self::new()
    }
}
