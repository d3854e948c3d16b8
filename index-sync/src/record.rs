//! Change records and the raw notifications they are derived from.

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// One observed file-system change, ready to be applied to the index.
///
/// Records are moved from queue to queue and into the store; they are
/// intentionally not `Clone`.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// The kind of change.
    pub kind: ChangeKind,

    /// Path to the affected file or directory.
    pub path: PathBuf,

    /// When the change was observed.
    pub timestamp: DateTime<Utc>,

    /// Attributes captured when the record was generated.
    pub attributes: RecordAttributes,
}

impl ChangeRecord {
    /// Create a new record stamped with the current time.
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            timestamp: Utc::now(),
            attributes: RecordAttributes::default(),
        }
    }

    /// Attach attributes to the record.
    pub fn with_attributes(mut self, attributes: RecordAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Path as the string key used by the index store.
    pub fn key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory
    }
}

/// Kind of file-system change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// File was created.
    Created,

    /// File was modified.
    Modified,

    /// File was deleted.
    Deleted,

    /// File was renamed (old path).
    RenamedFrom,

    /// File was renamed (new path).
    RenamedTo,

    /// File metadata changed.
    MetadataChanged,

    /// Access time changed.
    Accessed,

    /// Unknown event type.
    Unknown,
}

impl ChangeKind {
    /// Whether the change should (re)insert the path into the index.
    pub fn is_addition(self) -> bool {
        matches!(
            self,
            Self::Created | Self::Modified | Self::RenamedTo | Self::MetadataChanged
        )
    }

    /// Whether the change should drop the path from the index.
    pub fn is_removal(self) -> bool {
        matches!(self, Self::Deleted | Self::RenamedFrom)
    }
}

impl From<notify::EventKind> for ChangeKind {
    fn from(kind: notify::EventKind) -> Self {
        match kind {
            notify::EventKind::Create(_) => Self::Created,
            notify::EventKind::Modify(modify_kind) => match modify_kind {
                notify::event::ModifyKind::Name(rename) => match rename {
                    notify::event::RenameMode::From => Self::RenamedFrom,
                    notify::event::RenameMode::To => Self::RenamedTo,
                    _ => Self::Modified,
                },
                notify::event::ModifyKind::Metadata(_) => Self::MetadataChanged,
                _ => Self::Modified,
            },
            notify::EventKind::Remove(_) => Self::Deleted,
            notify::EventKind::Access(_) => Self::Accessed,
            _ => Self::Unknown,
        }
    }
}

/// Attributes of the path a record refers to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordAttributes {
    pub is_file: bool,
    pub is_directory: bool,

    /// File size in bytes (if known).
    pub size: Option<u64>,

    /// Last modification time (if known).
    pub modified: Option<DateTime<Utc>>,

    /// File extension (if any).
    pub extension: Option<String>,
}

impl RecordAttributes {
    /// Build attributes from already-fetched metadata.
    pub fn from_metadata(path: &Path, metadata: &Metadata) -> Self {
        Self {
            is_file: metadata.is_file(),
            is_directory: metadata.is_dir(),
            size: metadata.is_file().then(|| metadata.len()),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            extension: path
                .extension()
                .and_then(|e| e.to_str())
                .map(String::from),
        }
    }
}

/// An unprocessed change notification, before filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

impl RawEvent {
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Derives change records from raw paths.
///
/// Implementations are called outside the engine lock and may touch the
/// file system. A failure means the path cannot be indexed right now
/// (typically because it vanished).
pub trait RecordGenerator: Send + Sync {
    fn generate(&self, kind: ChangeKind, path: &Path) -> Result<ChangeRecord>;
}

impl<F> RecordGenerator for F
where
    F: Fn(ChangeKind, &Path) -> Result<ChangeRecord> + Send + Sync,
{
    fn generate(&self, kind: ChangeKind, path: &Path) -> Result<ChangeRecord> {
        self(kind, path)
    }
}

/// Generates records by reading file metadata (symlinks are not followed).
#[derive(Debug, Clone, Copy, Default)]
pub struct FsRecordGenerator;

impl RecordGenerator for FsRecordGenerator {
    fn generate(&self, kind: ChangeKind, path: &Path) -> Result<ChangeRecord> {
        let metadata =
            std::fs::symlink_metadata(path).map_err(|e| SyncError::RecordGeneration {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        Ok(ChangeRecord::new(kind, path)
            .with_attributes(RecordAttributes::from_metadata(path, &metadata)))
    }
}
