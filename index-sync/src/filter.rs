//! Filtering of events that originate from long-filename overlay mounts.

use std::path::{Path, PathBuf};

use crate::config::IgnoreConfig;
use crate::mounts::MountSnapshot;

/// Decides whether a change notification should be discarded.
#[derive(Debug, Clone)]
pub struct IgnoredEventFilter {
    shadow_suffix: String,
    overlay_fs_type: String,
}

impl IgnoredEventFilter {
    pub fn new(config: &IgnoreConfig) -> Self {
        Self {
            shadow_suffix: config.shadow_suffix.clone(),
            overlay_fs_type: config.overlay_fs_type.clone(),
        }
    }

    /// Whether `path` is a long-filename shadow record.
    pub fn is_shadow_record(&self, path: &Path) -> bool {
        path.as_os_str()
            .as_encoded_bytes()
            .ends_with(self.shadow_suffix.as_bytes())
    }

    /// Whether `path` lives on a long-filename overlay mount.
    pub fn on_overlay_mount(&self, path: &Path, mounts: &dyn MountSnapshot) -> bool {
        mounts.path_matches_type(path, &self.overlay_fs_type)
    }

    /// Shadow records are always ignored. Otherwise the mount lookup only
    /// runs when `preceding_ignored` is false; callers walking a burst of
    /// events under one directory pass `true` once the directory has been
    /// resolved, which skips the lookup.
    pub fn ignored(
        &self,
        path: &Path,
        preceding_ignored: bool,
        mounts: &dyn MountSnapshot,
    ) -> bool {
        if self.is_shadow_record(path) {
            return true;
        }

        !preceding_ignored && self.on_overlay_mount(path, mounts)
    }
}

/// Carries the per-directory mount decision across a burst of events so
/// the mount table is consulted once per parent directory.
#[derive(Debug, Default)]
pub(crate) struct DirectoryMemo {
    parent: Option<PathBuf>,
    overlay: bool,
}

impl DirectoryMemo {
    /// Whether the event at `path` should be dropped. Siblings share their
    /// parent's covering mount, so the lookup is done on the parent.
    pub(crate) fn ignored(
        &mut self,
        filter: &IgnoredEventFilter,
        path: &Path,
        mounts: &dyn MountSnapshot,
    ) -> bool {
        let Some(parent) = path.parent() else {
            return filter.ignored(path, false, mounts);
        };

        if self.parent.as_deref() != Some(parent) {
            self.overlay = filter.on_overlay_mount(parent, mounts);
            self.parent = Some(parent.to_path_buf());
        }

        self.overlay || filter.ignored(path, true, mounts)
    }
}
