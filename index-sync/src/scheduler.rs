//! Background worker that flushes the addition job queue.
//!
//! The worker alternates between waiting and draining:
//!
//! ```text
//!  Waiting ──(signal or poll timeout)──► Draining ──► Waiting
//!                                            │
//!                                  (stop requested)
//!                                            ▼
//!                                         Stopped
//! ```
//!
//! A timeout leads to a drain attempt just like a signal does, so the
//! time-based flush happens even when no producer ever crosses the size
//! threshold. A failed deletion run is retried only after the next
//! timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::state::{Shared, SyncState};
use crate::store::StoreOperation;

/// Outcome of one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DrainReport {
    /// Whether the batch policy called for a flush.
    pub(crate) flushed: bool,

    /// Records handed to the store's immediate add.
    pub(crate) records: usize,

    pub(crate) deletions_processed: bool,
}

/// Worker thread body. Returns once a stop request has been observed and
/// the in-flight cycle has completed.
pub(crate) fn run(shared: Arc<Shared>, poll_interval: Duration) {
    info!("Index sync worker started");

    loop {
        let mut state = shared.state.lock();
        if !state.wake_condition() {
            let timed_out = shared.wake.wait_for(&mut state, poll_interval).timed_out();
            trace!(timed_out, "Worker woke");
            if timed_out {
                state.deletion_backoff = false;
            }
        }

        let report = state.drain_cycle(Instant::now());
        if report.records > 0 || report.deletions_processed {
            debug!(
                "Drain cycle: flushed {} additions, deletions processed: {}, {} still queued",
                report.records,
                report.deletions_processed,
                state.additions.len()
            );
        }

        if state.stop_requested {
            break;
        }
    }

    info!("Index sync worker stopping");
}

impl SyncState {
    /// Flush one batch of additions if the policy says so, then run the
    /// store's deletion jobs if it reports them ready.
    pub(crate) fn drain_cycle(&mut self, now: Instant) -> DrainReport {
        let mut report = DrainReport::default();

        if self.policy.should_flush(self.additions.len(), now) {
            let batch = self.policy.batch_len(self.additions.len());
            for _ in 0..batch {
                let Some(record) = self.additions.pop_front() else {
                    break;
                };
                let key = record.key();
                let result = self.store.add_immediate(record);
                self.report(StoreOperation::AddImmediate, &key, result);
                report.records += 1;
            }

            self.policy.mark_flushed(now);
            self.counters.additions_flushed += report.records;
            self.counters.flushes += 1;
            report.flushed = true;
        }

        if self.deletions_due() {
            let result = self.store.process_deletion_jobs();
            self.deletion_backoff = result.is_err();
            self.report(StoreOperation::ProcessDeletions, "", result);
            self.counters.deletion_runs += 1;
            report.deletions_processed = true;
        }

        report
    }
}
