//! Bulk rescans of a directory tree into the pending buffer.

use std::path::Path;
use std::time::Instant;

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::engine::IndexSync;
use crate::error::{Result, SyncError};
use crate::filter::DirectoryMemo;
use crate::record::ChangeKind;

impl IndexSync {
    /// Walk `path` and queue a record for every entry below it on the bulk
    /// lane. Entries on overlay mounts and shadow records are left out, and
    /// ignored directories are not descended into. Returns the number of
    /// records queued.
    pub fn index_directory_tree(&self, path: impl AsRef<Path>) -> Result<usize> {
        let root = path.as_ref();
        if !root.is_dir() {
            return Err(SyncError::DirectoryNotFound(root.display().to_string()));
        }

        let start = Instant::now();
        let mut memo = DirectoryMemo::default();
        let mut records = Vec::new();
        let mut ignored = 0;
        let mut skipped = 0;

        let mut walker = WalkDir::new(root).min_depth(1).follow_links(false).into_iter();
        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry during rescan: {e}");
                    skipped += 1;
                    continue;
                }
            };

            let drop_entry = {
                let state = self.shared.state.lock();
                memo.ignored(&self.filter, entry.path(), state.mounts.as_ref())
            };
            if drop_entry {
                ignored += 1;
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }

            match self.generator.generate(ChangeKind::Created, entry.path()) {
                Ok(record) => records.push(record),
                Err(_) => skipped += 1,
            }
        }

        let queued = records.len();
        self.insert_pending(records);

        info!(
            "Queued {} records from {} in {:?} (ignored: {}, skipped: {})",
            queued,
            root.display(),
            start.elapsed(),
            ignored,
            skipped
        );
        Ok(queued)
    }
}
