//! Configuration types for the index sync engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::mounts::MountEntry;
use crate::publish::ServiceIdentity;

/// Default number of addition jobs flushed per worker cycle.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Default upper bound on records moved by one scheduled drain.
pub const DEFAULT_DRAIN_CAP: usize = 500;

/// Default worker poll timeout.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Configuration for the sync engine.
///
/// The flush interval has no built-in default and must be supplied by the
/// caller, either through [`SyncConfig::new`] or the `flush_interval_ms`
/// key of a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Directory holding the index data.
    pub index_dir: PathBuf,

    /// Maximum addition jobs flushed per worker cycle (must be > 0).
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Time after the last flush at which pending additions are flushed
    /// regardless of queue length.
    pub flush_interval_ms: u64,

    /// How long the worker waits for a signal before draining anyway.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum records moved per scheduled drain.
    #[serde(default = "default_drain_cap")]
    pub drain_cap: usize,

    /// Tick of the scheduled drainer.
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,

    /// Queued deletion terms before the in-memory store reports deletion
    /// jobs ready.
    #[serde(default = "default_deletion_batch_size")]
    pub deletion_batch_size: usize,

    /// Event filtering.
    #[serde(default)]
    pub ignore: IgnoreConfig,

    /// Identity claimed on the publish endpoint.
    #[serde(default)]
    pub publish: ServiceIdentity,

    /// Static mount table.
    #[serde(default)]
    pub mounts: Vec<MountEntry>,
}

impl SyncConfig {
    /// Create a new configuration with default values.
    pub fn new(index_dir: impl Into<PathBuf>, flush_interval: Duration) -> Self {
        Self {
            index_dir: index_dir.into(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            flush_interval_ms: duration_to_ms(flush_interval),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            drain_cap: DEFAULT_DRAIN_CAP,
            drain_interval_ms: default_drain_interval_ms(),
            deletion_batch_size: default_deletion_batch_size(),
            ignore: IgnoreConfig::default(),
            publish: ServiceIdentity::default(),
            mounts: Vec::new(),
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(SyncError::Config(
                "max_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.drain_cap == 0 {
            return Err(SyncError::Config(
                "drain_cap must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(SyncError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.drain_interval_ms == 0 {
            return Err(SyncError::Config(
                "drain_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.ignore.shadow_suffix.is_empty() {
            return Err(SyncError::Config(
                "ignore.shadow_suffix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the maximum batch size.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Set the worker poll timeout.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_to_ms(interval);
        self
    }

    /// Set the scheduled drain cap.
    pub fn with_drain_cap(mut self, cap: usize) -> Self {
        self.drain_cap = cap;
        self
    }

    /// Set the scheduled drainer tick.
    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval_ms = duration_to_ms(interval);
        self
    }

    /// Set the in-memory store deletion threshold.
    pub fn with_deletion_batch_size(mut self, size: usize) -> Self {
        self.deletion_batch_size = size;
        self
    }

    /// Set the event filter configuration.
    pub fn with_ignore(mut self, ignore: IgnoreConfig) -> Self {
        self.ignore = ignore;
        self
    }

    /// Set the publish identity.
    pub fn with_publish(mut self, identity: ServiceIdentity) -> Self {
        self.publish = identity;
        self
    }

    /// Add a static mount entry.
    pub fn with_mount(mut self, entry: MountEntry) -> Self {
        self.mounts.push(entry);
        self
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }
}

/// Configuration for the ignored-event filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    /// File name suffix of long-filename shadow records.
    pub shadow_suffix: String,

    /// Filesystem type of the long-filename overlay mount.
    pub overlay_fs_type: String,
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            shadow_suffix: ".longname".to_string(),
            overlay_fs_type: "fuse.dlnfs".to_string(),
        }
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_drain_cap() -> usize {
    DEFAULT_DRAIN_CAP
}

fn default_drain_interval_ms() -> u64 {
    1000
}

fn default_deletion_batch_size() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_defaults() {
        let config = SyncConfig::new("/var/lib/anything", Duration::from_secs(3));

        assert_eq!(config.max_batch_size, 100);
        assert_eq!(config.drain_cap, 500);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.flush_interval(), Duration::from_secs(3));
        assert_eq!(config.ignore.shadow_suffix, ".longname");
        assert_eq!(config.ignore.overlay_fs_type, "fuse.dlnfs");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let config = SyncConfig::from_toml_str(
            r#"
            index_dir = "/tmp/index"
            flush_interval_ms = 250
            max_batch_size = 10

            [ignore]
            shadow_suffix = ".lfn"
            overlay_fs_type = "fuse.lfn"

            [[mounts]]
            device = 2049
            mount_point = "/data"
            fs_type = "ext4"
            "#,
        )
        .unwrap();

        assert_eq!(config.index_dir, Path::new("/tmp/index"));
        assert_eq!(config.flush_interval(), Duration::from_millis(250));
        assert_eq!(config.max_batch_size, 10);
        assert_eq!(config.drain_cap, DEFAULT_DRAIN_CAP);
        assert_eq!(config.ignore.shadow_suffix, ".lfn");
        assert_eq!(config.mounts.len(), 1);
        assert_eq!(config.mounts[0].device, 2049);
    }

    #[test]
    fn test_flush_interval_is_required() {
        let result = SyncConfig::from_toml_str(r#"index_dir = "/tmp/index""#);
        assert!(matches!(result, Err(SyncError::ConfigParse(_))));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config =
            SyncConfig::new("/tmp/index", Duration::from_secs(1)).with_max_batch_size(0);
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_zero_drain_interval_rejected() {
        let result = SyncConfig::from_toml_str(
            r#"
            index_dir = "/tmp/index"
            flush_interval_ms = 250
            drain_interval_ms = 0
            "#,
        );
        assert!(matches!(result, Err(SyncError::Config(_))));

        let config = SyncConfig::new("/tmp/index", Duration::from_secs(1))
            .with_drain_interval(Duration::ZERO);
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }
}
