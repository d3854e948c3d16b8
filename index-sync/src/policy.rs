//! Size/time debounce policy for the addition job queue.

use std::time::{Duration, Instant};

/// Decides when queued additions are flushed to the store.
///
/// A flush is due once the queue holds more than `max_batch_size` jobs, or
/// once `flush_interval` has passed since the previous flush. A flush moves
/// at most `max_batch_size` jobs.
#[derive(Debug, Clone)]
pub struct BatchPolicy {
    max_batch_size: usize,
    flush_interval: Duration,
    last_flush: Instant,
}

impl BatchPolicy {
    /// `max_batch_size` is clamped to at least one.
    pub fn new(max_batch_size: usize, flush_interval: Duration) -> Self {
        Self {
            max_batch_size: max_batch_size.max(1),
            flush_interval,
            last_flush: Instant::now(),
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    pub fn last_flush(&self) -> Instant {
        self.last_flush
    }

    /// Whether the queue length alone warrants waking the worker.
    pub fn over_threshold(&self, queued: usize) -> bool {
        queued > self.max_batch_size
    }

    pub fn should_flush(&self, queued: usize, now: Instant) -> bool {
        self.over_threshold(queued)
            || now.saturating_duration_since(self.last_flush) >= self.flush_interval
    }

    /// Number of jobs the next flush takes from a queue of `queued`.
    pub fn batch_len(&self, queued: usize) -> usize {
        queued.min(self.max_batch_size)
    }

    pub fn mark_flushed(&mut self, now: Instant) {
        self.last_flush = now;
    }
}
