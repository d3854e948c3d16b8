//! Live file-system notifications feeding the engine.

use std::path::PathBuf;
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use crate::engine::IndexSync;
use crate::error::{Result, SyncError};
use crate::record::{ChangeKind, RawEvent};

/// Watches directory trees and dispatches their events into an engine.
pub struct ChangeWatcher {
    roots: Vec<PathBuf>,
    watcher: Option<RecommendedWatcher>,
}

impl ChangeWatcher {
    /// Watch every root recursively. All roots must be existing
    /// directories; nothing is watched if one of them is not.
    pub fn start(engine: Arc<IndexSync>, roots: impl IntoIterator<Item = PathBuf>) -> Result<Self> {
        let roots: Vec<PathBuf> = roots.into_iter().collect();
        for root in &roots {
            if !root.exists() {
                return Err(SyncError::DirectoryNotFound(root.display().to_string()));
            }
            if !root.is_dir() {
                return Err(SyncError::Config(format!(
                    "Path is not a directory: {}",
                    root.display()
                )));
            }
        }

        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    engine.dispatch_events(raw_events(event));
                }
                Err(e) => error!("Watch error: {e}"),
            },
        )?;

        for root in &roots {
            watcher.watch(root, RecursiveMode::Recursive)?;
            debug!("Started watching: {}", root.display());
        }

        info!("Change watcher started on {} roots", roots.len());
        Ok(Self {
            roots,
            watcher: Some(watcher),
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Unwatch all roots. Calling this again is a no-op.
    pub fn stop(&mut self) {
        let Some(mut watcher) = self.watcher.take() else {
            return;
        };

        for root in &self.roots {
            if let Err(e) = watcher.unwatch(root) {
                warn!("Failed to unwatch {}: {e}", root.display());
            }
        }
        info!("Change watcher stopped");
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Split a notify event into one raw event per path. A rename reported
/// with both ends becomes a removal of the source and an addition of the
/// target.
fn raw_events(event: Event) -> Vec<RawEvent> {
    if let (EventKind::Modify(ModifyKind::Name(RenameMode::Both)), [from, to]) =
        (event.kind, event.paths.as_slice())
    {
        return vec![
            RawEvent::new(ChangeKind::RenamedFrom, from.clone()),
            RawEvent::new(ChangeKind::RenamedTo, to.clone()),
        ];
    }

    let kind = ChangeKind::from(event.kind);
    event
        .paths
        .into_iter()
        .map(|path| RawEvent::new(kind, path))
        .collect()
}
