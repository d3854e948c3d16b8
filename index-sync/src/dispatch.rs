//! Routing of raw change notifications into the engine's lanes.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::engine::IndexSync;
use crate::filter::DirectoryMemo;
use crate::record::RawEvent;

/// What happened to a burst of raw events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    /// Events that became hot-lane additions.
    pub additions: usize,

    /// Events forwarded as delayed removals.
    pub removals: usize,

    /// Events dropped by the ignored-event filter.
    pub ignored: usize,

    /// Access/unknown events and paths no record could be generated for.
    pub skipped: usize,
}

impl IndexSync {
    /// Filter a burst of notifications and route the survivors.
    ///
    /// Additions go to the hot lane with a freshly generated record;
    /// deletions and rename sources become delayed removals. Consecutive
    /// events under the same parent directory share one mount lookup.
    pub fn dispatch_events(&self, events: impl IntoIterator<Item = RawEvent>) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let mut memo = DirectoryMemo::default();

        for event in events {
            if !event.kind.is_addition() && !event.kind.is_removal() {
                summary.skipped += 1;
                continue;
            }

            let ignored = {
                let state = self.shared.state.lock();
                memo.ignored(&self.filter, &event.path, state.mounts.as_ref())
            };
            if ignored {
                trace!("Ignoring {:?} for {}", event.kind, event.path.display());
                summary.ignored += 1;
                continue;
            }

            if event.kind.is_removal() {
                self.enqueue_delayed_remove(event.path.to_string_lossy());
                summary.removals += 1;
                continue;
            }

            // Generated outside the lock: this touches the file system.
            match self.generator.generate(event.kind, &event.path) {
                Ok(record) => {
                    self.enqueue_delayed_add(record);
                    summary.additions += 1;
                }
                Err(e) => {
                    trace!("Skipping {}: {e}", event.path.display());
                    summary.skipped += 1;
                }
            }
        }

        if summary != DispatchSummary::default() {
            debug!(
                "Dispatched events: {} additions, {} removals, {} ignored, {} skipped",
                summary.additions, summary.removals, summary.ignored, summary.skipped
            );
        }
        summary
    }
}
