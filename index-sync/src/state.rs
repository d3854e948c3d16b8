//! Mutable engine state shared between callers and the worker.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::mounts::MountSnapshot;
use crate::policy::BatchPolicy;
use crate::record::ChangeRecord;
use crate::store::{FailureHook, IndexStore, StoreFailure, StoreOperation};

/// Lock plus wake signal. Every field of [`SyncState`] and every call into
/// the store or the mount snapshot goes through `state`.
pub(crate) struct Shared {
    pub(crate) state: Mutex<SyncState>,
    pub(crate) wake: Condvar,
}

impl Shared {
    pub(crate) fn new(state: SyncState) -> Self {
        Self {
            state: Mutex::new(state),
            wake: Condvar::new(),
        }
    }
}

pub(crate) struct SyncState {
    /// Bulk lane, drained by `scheduled_drain`.
    pub(crate) pending: VecDeque<ChangeRecord>,

    /// Hot lane, drained by the worker.
    pub(crate) additions: VecDeque<ChangeRecord>,

    pub(crate) policy: BatchPolicy,
    pub(crate) stop_requested: bool,

    /// Set when the last deletion run failed. Deletion jobs are then only
    /// retried after a poll timeout.
    pub(crate) deletion_backoff: bool,

    pub(crate) store: Box<dyn IndexStore>,
    pub(crate) mounts: Box<dyn MountSnapshot>,
    pub(crate) failure_hook: Option<FailureHook>,
    pub(crate) counters: SyncCounters,
}

impl SyncState {
    pub(crate) fn new(
        policy: BatchPolicy,
        store: Box<dyn IndexStore>,
        mounts: Box<dyn MountSnapshot>,
    ) -> Self {
        Self {
            pending: VecDeque::new(),
            additions: VecDeque::new(),
            policy,
            stop_requested: false,
            deletion_backoff: false,
            store,
            mounts,
            failure_hook: None,
            counters: SyncCounters::default(),
        }
    }

    /// Condition the worker waits on.
    pub(crate) fn wake_condition(&self) -> bool {
        self.policy.over_threshold(self.additions.len())
            || self.deletions_due()
            || self.stop_requested
    }

    pub(crate) fn deletions_due(&self) -> bool {
        !self.deletion_backoff && self.store.deletion_jobs_ready()
    }

    /// Swallow a store result, surfacing failures through logs, counters
    /// and the failure hook. The hook runs under the state lock.
    pub(crate) fn report(
        &mut self,
        operation: StoreOperation,
        target: &str,
        result: Result<()>,
    ) {
        let Err(error) = result else {
            return;
        };

        let failure = StoreFailure {
            operation,
            target: target.to_string(),
            error,
        };
        warn!(
            "Index store {} failed for '{}': {}",
            failure.operation, failure.target, failure.error
        );
        self.counters.store_failures += 1;

        if let Some(hook) = &self.failure_hook {
            hook(&failure);
        }
    }
}

/// Running totals kept under the state lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounters {
    /// Records moved from the bulk lane to the store's delayed add.
    pub pending_drained: usize,

    /// Records moved from the hot lane to the store's immediate add.
    pub additions_flushed: usize,

    /// Worker flush cycles (including empty time-based ones).
    pub flushes: usize,

    /// Deletion job runs triggered by the worker.
    pub deletion_runs: usize,

    /// Store mutations that returned an error.
    pub store_failures: usize,
}
