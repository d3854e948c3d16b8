//! Periodic driver for the bulk lane.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::IndexSync;

/// Shortest tick accepted; tokio's interval rejects a zero period.
const MIN_DRAIN_INTERVAL: Duration = Duration::from_millis(1);

/// Calls [`IndexSync::scheduled_drain`] on a fixed interval.
///
/// The drain itself is blocking (it takes the engine lock once per record),
/// so each tick runs it on tokio's blocking pool.
pub struct ScheduledDrainer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ScheduledDrainer {
    /// Start ticking. Must be called from within a tokio runtime.
    pub fn spawn(engine: Arc<IndexSync>, interval: Duration) -> Self {
        if interval < MIN_DRAIN_INTERVAL {
            warn!("Drain interval {interval:?} too short, using {MIN_DRAIN_INTERVAL:?}");
        }
        let interval = interval.max(MIN_DRAIN_INTERVAL);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.child_token();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let engine = engine.clone();
                match tokio::task::spawn_blocking(move || engine.scheduled_drain()).await {
                    Ok(0) => {}
                    Ok(drained) => debug!("Drainer tick moved {drained} records"),
                    Err(e) => error!("Scheduled drain task failed: {e}"),
                }
            }

            debug!("Scheduled drainer loop exited");
        });

        info!("Scheduled drainer started (interval {interval:?})");
        Self { cancel, task }
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }

    /// Stop ticking and wait for an in-flight drain to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("Scheduled drainer task panicked: {e}");
        }
        info!("Scheduled drainer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::mounts::MountTable;
    use crate::record::{ChangeKind, ChangeRecord};
    use crate::store::MemoryIndexStore;
    use pretty_assertions::assert_eq;

    fn engine(store: &MemoryIndexStore) -> Arc<IndexSync> {
        let config = SyncConfig::new("/idx", Duration::from_secs(3600)).with_drain_cap(500);
        Arc::new(IndexSync::new(config, store.clone(), MountTable::empty()).unwrap())
    }

    fn records(count: usize) -> Vec<ChangeRecord> {
        (0..count)
            .map(|i| ChangeRecord::new(ChangeKind::Created, format!("/bulk/{i:04}")))
            .collect()
    }

    #[tokio::test]
    async fn test_drainer_empties_pending_buffer() {
        let store = MemoryIndexStore::new("/idx");
        let engine = engine(&store);
        engine.insert_pending(records(600));

        let drainer = ScheduledDrainer::spawn(engine.clone(), Duration::from_millis(10));
        assert!(drainer.is_running());

        for _ in 0..500 {
            if engine.pending_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drainer.stop().await;

        assert_eq!(engine.pending_count(), 0);
        assert_eq!(store.len(), 600);
        assert_eq!(engine.stats().counters.pending_drained, 600);
    }

    #[tokio::test]
    async fn test_stop_halts_ticks() {
        let store = MemoryIndexStore::new("/idx");
        let engine = engine(&store);

        let drainer = ScheduledDrainer::spawn(engine.clone(), Duration::from_millis(5));
        drainer.stop().await;

        engine.insert_pending(records(3));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(engine.pending_count(), 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_zero_interval_still_drains() {
        let store = MemoryIndexStore::new("/idx");
        let engine = engine(&store);
        engine.insert_pending(records(1));

        let drainer = ScheduledDrainer::spawn(engine.clone(), Duration::ZERO);
        for _ in 0..100 {
            if engine.pending_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(drainer.is_running());
        drainer.stop().await;
        assert_eq!(engine.pending_count(), 0);
    }
}
