//! Per-connection audio buffering and end-of-utterance detection
//!
//! The aggregator never owns a timer task. It keeps a single debounce deadline
//! that every appended chunk pushes forward; the owning coordinator sleeps until
//! that deadline and then asks for a decision with [`AudioAggregator::check`].
//! A decision consumes the deadline, so insufficient audio is judged once per
//! quiet period and only new input schedules another check.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::AudioConfig;

/// When buffered audio counts as a complete utterance
#[derive(Debug, Clone, Copy)]
pub struct AggregatorPolicy {
    /// Silence after the last chunk that ends an utterance
    pub quiet_interval: Duration,
    /// Chunk count that is enough on its own
    pub min_chunks: usize,
    /// Byte count that is enough on its own
    pub min_bytes: usize,
}

impl From<&AudioConfig> for AggregatorPolicy {
    fn from(config: &AudioConfig) -> Self {
        Self {
            quiet_interval: config.quiet_interval,
            min_chunks: config.min_chunks,
            min_bytes: config.min_bytes,
        }
    }
}

/// Outcome of a debounce check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    /// No check is scheduled
    Idle,
    /// Newer audio moved the deadline; nothing decided
    Superseded,
    /// Quiet interval elapsed with too little audio; the buffer is kept
    Insufficient,
    /// Quiet interval elapsed and the buffer holds an utterance
    Ready,
}

/// Buffers raw audio chunks for one connection
#[derive(Debug)]
pub struct AudioAggregator {
    policy: AggregatorPolicy,
    chunks: Vec<Vec<u8>>,
    buffered_bytes: usize,
    last_chunk_at: Option<Instant>,
    deadline: Option<Instant>,
}

impl AudioAggregator {
    #[must_use]
    pub const fn new(policy: AggregatorPolicy) -> Self {
        Self {
            policy,
            chunks: Vec::new(),
            buffered_bytes: 0,
            last_chunk_at: None,
            deadline: None,
        }
    }

    /// Append a chunk received at `now` and push the debounce deadline out
    pub fn append(&mut self, chunk: Vec<u8>, now: Instant) {
        if chunk.is_empty() {
            return;
        }
        self.buffered_bytes += chunk.len();
        self.chunks.push(chunk);
        self.last_chunk_at = Some(now);
        // An interval past the clock's range never elapses
        self.deadline = now.checked_add(self.policy.quiet_interval);
    }

    /// Instant at which the pending debounce check is due
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Decide whether the buffer holds a finished utterance
    ///
    /// Any decision other than `Superseded` clears the pending check. The
    /// buffer itself is left untouched; call [`drain`](Self::drain) on `Ready`.
    pub fn check(&mut self, now: Instant) -> Check {
        let Some(last) = self.last_chunk_at.filter(|_| self.deadline.is_some()) else {
            return Check::Idle;
        };

        if now.saturating_duration_since(last) < self.policy.quiet_interval {
            return Check::Superseded;
        }

        self.deadline = None;
        if self.is_sufficient() {
            Check::Ready
        } else {
            Check::Insufficient
        }
    }

    /// Take all buffered audio, concatenated in arrival order
    pub fn drain(&mut self) -> Option<Vec<u8>> {
        self.deadline = None;
        if self.chunks.is_empty() {
            return None;
        }
        let audio = self.chunks.concat();
        self.chunks.clear();
        self.buffered_bytes = 0;
        Some(audio)
    }

    /// Drop buffered audio and any pending check
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.buffered_bytes = 0;
        self.deadline = None;
    }

    fn is_sufficient(&self) -> bool {
        self.chunks.len() >= self.policy.min_chunks || self.buffered_bytes >= self.policy.min_bytes
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub const fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
