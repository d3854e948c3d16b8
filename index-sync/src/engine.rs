//! The index sync engine: lifecycle plus the synchronous public surface.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::filter::IgnoredEventFilter;
use crate::mounts::{MountSnapshot, MountTable};
use crate::policy::BatchPolicy;
use crate::record::{ChangeKind, ChangeRecord, FsRecordGenerator, RecordGenerator};
use crate::scheduler;
use crate::state::{Shared, SyncCounters, SyncState};
use crate::store::{FailureHook, IndexStore, MemoryIndexStore, StoreFailure, StoreOperation};

const WORKER_THREAD_NAME: &str = "index-sync-worker";

/// Synchronization core between file-system notifications and the index.
///
/// Two independent lanes feed the store:
/// - the bulk lane ([`insert_pending`](Self::insert_pending) +
///   [`scheduled_drain`](Self::scheduled_drain)), moved in capped chunks to
///   the store's delayed add by an external timer;
/// - the hot lane ([`enqueue_delayed_add`](Self::enqueue_delayed_add)),
///   flushed by the background worker to the store's immediate add under
///   the size/time batch policy.
///
/// Records keep their order within a lane; the lanes are not ordered with
/// respect to each other. Every operation takes the same lock, and the
/// worker is started on construction and joined by
/// [`terminate`](Self::terminate) or on drop.
pub struct IndexSync {
    pub(crate) config: SyncConfig,
    pub(crate) shared: Arc<Shared>,
    pub(crate) filter: IgnoredEventFilter,
    pub(crate) generator: Box<dyn RecordGenerator>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IndexSync {
    /// Create a new engine builder.
    pub fn builder(config: SyncConfig) -> IndexSyncBuilder {
        IndexSyncBuilder::new(config)
    }

    /// Create an engine over the given store and mount snapshot and start
    /// its worker.
    pub fn new(
        config: SyncConfig,
        store: impl IndexStore + 'static,
        mounts: impl MountSnapshot + 'static,
    ) -> Result<Self> {
        Self::builder(config)
            .with_store(store)
            .with_mounts(mounts)
            .build()
    }

    fn start(
        config: SyncConfig,
        store: Box<dyn IndexStore>,
        mounts: Box<dyn MountSnapshot>,
        generator: Box<dyn RecordGenerator>,
        failure_hook: Option<FailureHook>,
    ) -> Result<Self> {
        config.validate()?;

        let policy = BatchPolicy::new(config.max_batch_size, config.flush_interval());
        let mut state = SyncState::new(policy, store, mounts);
        state.failure_hook = failure_hook;
        let shared = Arc::new(Shared::new(state));

        let worker_shared = shared.clone();
        let poll_interval = config.poll_interval();
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || scheduler::run(worker_shared, poll_interval))?;

        info!(
            "Index sync engine started (batch size {}, flush interval {:?}, index {})",
            config.max_batch_size,
            config.flush_interval(),
            config.index_dir.display()
        );

        Ok(Self {
            filter: IgnoredEventFilter::new(&config.ignore),
            config,
            shared,
            generator,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// The in-flight drain cycle completes first. Concurrent callers all
    /// return after the worker has exited; later calls are no-ops.
    /// Producers may keep enqueueing afterwards, but nothing drains the hot
    /// lane any more.
    pub fn terminate(&self) {
        self.shared.state.lock().stop_requested = true;
        self.shared.wake.notify_one();

        // Held across the join so a concurrent caller returns only once the
        // worker is gone.
        let mut worker = self.worker.lock();
        let Some(handle) = worker.take() else {
            return;
        };

        let thread_id = handle.thread().id();
        match handle.join() {
            Ok(()) => info!("Worker thread {thread_id:?} has exited."),
            Err(_) => error!("Worker thread {thread_id:?} panicked"),
        }
    }

    /// Whether the worker has not been terminated yet.
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Move up to `drain_cap` records from the bulk lane to the store's
    /// delayed add, one record per lock acquisition, and nudge the worker.
    ///
    /// Meant to be called periodically. Returns the number of records moved.
    pub fn scheduled_drain(&self) -> usize {
        let mut drained = 0;

        while drained < self.config.drain_cap {
            let mut state = self.shared.state.lock();
            let Some(record) = state.pending.pop_front() else {
                break;
            };

            let key = record.key();
            let result = state.store.add_delayed(record);
            state.report(StoreOperation::AddDelayed, &key, result);
            state.counters.pending_drained += 1;
            drained += 1;
        }

        self.shared.wake.notify_one();

        if drained > 0 {
            debug!("Scheduled drain moved {drained} pending records");
        }
        drained
    }

    /// Append records to the bulk lane.
    pub fn insert_pending(&self, records: impl IntoIterator<Item = ChangeRecord>) {
        let mut state = self.shared.state.lock();
        let before = state.pending.len();
        state.pending.extend(records);
        trace!("Queued {} pending records", state.pending.len() - before);
    }

    /// Records waiting in the bulk lane.
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Records waiting in the hot lane.
    pub fn addition_count(&self) -> usize {
        self.shared.state.lock().additions.len()
    }

    /// Reload the mount table.
    pub fn refresh_mounts(&self) -> Result<()> {
        self.shared.state.lock().mounts.refresh()
    }

    pub fn device_available(&self, device: u64) -> bool {
        self.shared.state.lock().mounts.contains_device(device)
    }

    pub fn mount_point_for_device(&self, device: u64) -> Option<PathBuf> {
        self.shared.state.lock().mounts.mount_point(device)
    }

    pub fn index_directory(&self) -> PathBuf {
        self.shared.state.lock().store.index_directory()
    }

    /// Install the store's change filter. `filter` returns true for paths
    /// that may be indexed; it runs under the engine lock.
    pub fn set_change_filter(&self, filter: impl Fn(&Path) -> bool + Send + Sync + 'static) {
        self.shared
            .state
            .lock()
            .store
            .set_change_filter(Box::new(filter));
    }

    /// Install the callback receiving swallowed store failures. It runs
    /// under the engine lock and must not call back into the engine.
    pub fn set_failure_hook(&self, hook: impl Fn(&StoreFailure) + Send + Sync + 'static) {
        self.shared.state.lock().failure_hook = Some(Arc::new(hook));
    }

    /// Push a record onto the hot lane, waking the worker once the lane
    /// holds more than one batch.
    pub fn enqueue_delayed_add(&self, record: ChangeRecord) {
        let mut state = self.shared.state.lock();
        state.additions.push_back(record);
        if state.policy.over_threshold(state.additions.len()) {
            self.shared.wake.notify_one();
        }
    }

    /// Forward a removal term to the store, waking the worker when the store
    /// reports its deletion jobs ready.
    pub fn enqueue_delayed_remove(&self, term: impl Into<String>) {
        let term = term.into();
        let mut state = self.shared.state.lock();
        let result = state.store.remove_delayed(term.clone());
        state.report(StoreOperation::RemoveDelayed, &term, result);
        if state.store.deletion_jobs_ready() {
            self.shared.wake.notify_one();
        }
    }

    /// Whether an event for `path` should be discarded.
    pub fn ignored_event(&self, path: impl AsRef<Path>, preceding_ignored: bool) -> bool {
        let state = self.shared.state.lock();
        self.filter
            .ignored(path.as_ref(), preceding_ignored, state.mounts.as_ref())
    }

    /// Search the index. A negative `offset` yields no results without
    /// consulting the store; a negative `max_count` is treated as zero.
    pub fn query(&self, path: &str, keywords: &str, offset: i64, max_count: i64) -> Vec<String> {
        let Ok(offset) = usize::try_from(offset) else {
            return Vec::new();
        };
        let max_count = usize::try_from(max_count).unwrap_or(0);

        let state = self.shared.state.lock();
        state.store.query(path, keywords, offset, max_count, true)
    }

    /// Remove `path` from the index right away. Succeeds when the path is
    /// absent afterwards, whether or not it was indexed before.
    pub fn remove_path(&self, path: &str) -> bool {
        let mut state = self.shared.state.lock();
        let result = state.store.remove_immediate(path);
        state.report(StoreOperation::RemoveImmediate, path, result);
        !state.store.document_exists(path)
    }

    pub fn has_record(&self, path: &str) -> bool {
        self.shared.state.lock().store.document_exists(path)
    }

    /// Generate a record for `path` and hand it to the store's delayed add.
    ///
    /// Returns false without touching the store when no record can be
    /// generated; otherwise returns whether the store now holds the path.
    pub fn add_path(&self, path: &str) -> bool {
        let record = match self.generator.generate(ChangeKind::Created, Path::new(path)) {
            Ok(record) => record,
            Err(e) => {
                debug!("Not indexing {path}: {e}");
                return false;
            }
        };

        let mut state = self.shared.state.lock();
        let result = state.store.add_delayed(record);
        state.report(StoreOperation::AddDelayed, path, result);
        state.store.document_exists(path)
    }

    /// Snapshot of queue lengths and running totals.
    pub fn stats(&self) -> SyncStats {
        let running = self.is_running();
        let state = self.shared.state.lock();

        SyncStats {
            pending: state.pending.len(),
            additions: state.additions.len(),
            counters: state.counters,
            worker_running: running,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}

impl Drop for IndexSync {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Builder for [`IndexSync`].
///
/// Collaborators not supplied fall back to the in-memory store, a mount
/// table built from the configured mounts, and the metadata-based record
/// generator.
pub struct IndexSyncBuilder {
    config: SyncConfig,
    store: Option<Box<dyn IndexStore>>,
    mounts: Option<Box<dyn MountSnapshot>>,
    generator: Option<Box<dyn RecordGenerator>>,
    failure_hook: Option<FailureHook>,
}

impl IndexSyncBuilder {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            store: None,
            mounts: None,
            generator: None,
            failure_hook: None,
        }
    }

    pub fn with_store(mut self, store: impl IndexStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn with_mounts(mut self, mounts: impl MountSnapshot + 'static) -> Self {
        self.mounts = Some(Box::new(mounts));
        self
    }

    pub fn with_record_generator(mut self, generator: impl RecordGenerator + 'static) -> Self {
        self.generator = Some(Box::new(generator));
        self
    }

    pub fn with_failure_hook(
        mut self,
        hook: impl Fn(&StoreFailure) + Send + Sync + 'static,
    ) -> Self {
        self.failure_hook = Some(Arc::new(hook));
        self
    }

    /// Build the engine and start its worker.
    pub fn build(self) -> Result<IndexSync> {
        let config = self.config;
        let store = self.store.unwrap_or_else(|| {
            Box::new(
                MemoryIndexStore::new(config.index_dir.clone())
                    .with_deletion_batch_size(config.deletion_batch_size),
            )
        });
        let mounts = self
            .mounts
            .unwrap_or_else(|| Box::new(MountTable::from_entries(config.mounts.clone())));
        let generator = self
            .generator
            .unwrap_or_else(|| Box::new(FsRecordGenerator));

        IndexSync::start(config, store, mounts, generator, self.failure_hook)
    }
}

/// Statistics about the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Records in the bulk lane.
    pub pending: usize,

    /// Records in the hot lane.
    pub additions: usize,

    pub counters: SyncCounters,

    pub worker_running: bool,
}
