//! Mount topology used to decide whether events are relevant.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SyncError};

/// Snapshot of the system mount table.
///
/// Implementations are not internally synchronized. The engine only calls
/// them while holding its state lock, so every method must return promptly
/// and must not call back into the engine.
pub trait MountSnapshot: Send {
    /// Re-read the mount table and replace the snapshot atomically.
    fn refresh(&mut self) -> Result<()>;

    /// Whether the nearest mount covering `path` has filesystem type `fs_type`.
    fn path_matches_type(&self, path: &Path, fs_type: &str) -> bool;

    /// Whether the device is currently mounted.
    fn contains_device(&self, device: u64) -> bool;

    /// Mount point of the device, if mounted.
    fn mount_point(&self, device: u64) -> Option<PathBuf>;
}

/// One row of the mount table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    pub device: u64,
    pub mount_point: PathBuf,
    pub fs_type: String,
}

impl MountEntry {
    pub fn new(device: u64, mount_point: impl Into<PathBuf>, fs_type: impl Into<String>) -> Self {
        Self {
            device,
            mount_point: mount_point.into(),
            fs_type: fs_type.into(),
        }
    }
}

/// Supplies mount table rows to a [`MountTable`].
pub trait MountSource: Send {
    fn load(&self) -> Result<Vec<MountEntry>>;
}

/// A fixed list of mounts, e.g. from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticMounts(pub Vec<MountEntry>);

impl MountSource for StaticMounts {
    fn load(&self) -> Result<Vec<MountEntry>> {
        Ok(self.0.clone())
    }
}

impl<F> MountSource for F
where
    F: Fn() -> Result<Vec<MountEntry>> + Send,
{
    fn load(&self) -> Result<Vec<MountEntry>> {
        self()
    }
}

/// Reads the live mount table from a `mountinfo` file (Linux).
#[derive(Debug, Clone)]
pub struct ProcMountInfo {
    path: PathBuf,
}

impl ProcMountInfo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcMountInfo {
    fn default() -> Self {
        Self::new("/proc/self/mountinfo")
    }
}

impl MountSource for ProcMountInfo {
    fn load(&self) -> Result<Vec<MountEntry>> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            SyncError::Mounts(format!("failed to read {}: {e}", self.path.display()))
        })?;
        Ok(parse_mountinfo(&text))
    }
}

/// Parse `mountinfo` lines. Malformed lines are skipped.
///
/// Each line reads `id parent major:minor root mount_point options
/// [optional fields...] - fs_type source super_options`.
pub fn parse_mountinfo(text: &str) -> Vec<MountEntry> {
    text.lines()
        .filter_map(|line| {
            let entry = parse_mountinfo_line(line);
            if entry.is_none() && !line.trim().is_empty() {
                debug!("Skipping malformed mountinfo line: {line}");
            }
            entry
        })
        .collect()
}

fn parse_mountinfo_line(line: &str) -> Option<MountEntry> {
    let (mount_fields, fs_fields) = line.split_once(" - ")?;
    let mut fields = mount_fields.split_whitespace();
    let device = fields.nth(2)?;
    let mount_point = fields.nth(1)?;
    let fs_type = fs_fields.split_whitespace().next()?;

    let (major, minor) = device.split_once(':')?;
    let device = encode_device(major.parse().ok()?, minor.parse().ok()?);

    Some(MountEntry::new(device, unescape_octal(mount_point), fs_type))
}

/// Device number in the same encoding as `st_dev`.
fn encode_device(major: u64, minor: u64) -> u64 {
    ((major & 0xffff_f000) << 32)
        | ((major & 0x0000_0fff) << 8)
        | ((minor & 0xffff_ff00) << 12)
        | (minor & 0x0000_00ff)
}

// mountinfo escapes space, tab, newline and backslash as `\ooo`.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match octal_escape(&bytes[i..]) {
            Some(value) => {
                out.push(value);
                i += 4;
            }
            None => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn octal_escape(bytes: &[u8]) -> Option<u8> {
    let (&b'\\', digits) = bytes.split_first()? else {
        return None;
    };
    let digits = std::str::from_utf8(digits.get(..3)?).ok()?;
    u8::from_str_radix(digits, 8).ok()
}

/// Table-backed mount snapshot with longest-prefix lookup.
pub struct MountTable {
    source: Box<dyn MountSource>,
    entries: Vec<MountEntry>,
    devices: HashMap<u64, PathBuf>,
}

impl MountTable {
    /// Create a table and load it once from `source`.
    pub fn new(source: impl MountSource + 'static) -> Result<Self> {
        let mut table = Self {
            source: Box::new(source),
            entries: Vec::new(),
            devices: HashMap::new(),
        };
        table.refresh()?;
        Ok(table)
    }

    /// Create a table over a fixed list of entries.
    pub fn from_entries(entries: Vec<MountEntry>) -> Self {
        let devices = index_devices(&entries);
        Self {
            source: Box::new(StaticMounts(entries.clone())),
            entries,
            devices,
        }
    }

    /// Create a table with no mounts.
    pub fn empty() -> Self {
        Self::from_entries(Vec::new())
    }

    /// Nearest mount whose mount point is an ancestor of (or equal to) `path`.
    ///
    /// When several mounts are stacked on the same point the last one listed
    /// is the visible one.
    pub fn covering_mount(&self, path: &Path) -> Option<&MountEntry> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| path.starts_with(&entry.mount_point))
            .max_by_key(|(index, entry)| (entry.mount_point.components().count(), *index))
            .map(|(_, entry)| entry)
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }
}

impl MountSnapshot for MountTable {
    fn refresh(&mut self) -> Result<()> {
        let entries = self.source.load()?;
        let devices = index_devices(&entries);

        debug!("Mount table refreshed: {} entries", entries.len());
        self.entries = entries;
        self.devices = devices;
        Ok(())
    }

    fn path_matches_type(&self, path: &Path, fs_type: &str) -> bool {
        self.covering_mount(path)
            .is_some_and(|entry| entry.fs_type == fs_type)
    }

    fn contains_device(&self, device: u64) -> bool {
        self.devices.contains_key(&device)
    }

    fn mount_point(&self, device: u64) -> Option<PathBuf> {
        self.devices.get(&device).cloned()
    }
}

// The first mount of a device is its canonical mount point; later rows are
// bind mounts.
fn index_devices(entries: &[MountEntry]) -> HashMap<u64, PathBuf> {
    let mut devices = HashMap::new();
    for entry in entries {
        devices
            .entry(entry.device)
            .or_insert_with(|| entry.mount_point.clone());
    }
    devices
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_table() -> MountTable {
        MountTable::from_entries(vec![
            MountEntry::new(1, "/", "ext4"),
            MountEntry::new(2, "/home", "ext4"),
            MountEntry::new(3, "/home/user/.lfn", "fuse.dlnfs"),
            MountEntry::new(2, "/srv/bind", "ext4"),
        ])
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = sample_table();

        assert!(table.path_matches_type(Path::new("/home/user/.lfn/a/b.txt"), "fuse.dlnfs"));
        assert!(!table.path_matches_type(Path::new("/home/user/docs/b.txt"), "fuse.dlnfs"));
        assert_eq!(
            table
                .covering_mount(Path::new("/home/user/docs"))
                .map(|e| e.device),
            Some(2)
        );
    }

    #[test]
    fn test_prefix_match_is_by_component() {
        let table = sample_table();

        // "/home/user/.lfnx" is not under "/home/user/.lfn".
        assert!(!table.path_matches_type(Path::new("/home/user/.lfnx/file"), "fuse.dlnfs"));
    }

    #[test]
    fn test_stacked_mount_last_wins() {
        let table = MountTable::from_entries(vec![
            MountEntry::new(1, "/", "ext4"),
            MountEntry::new(5, "/media", "vfat"),
            MountEntry::new(6, "/media", "fuse.dlnfs"),
        ]);

        assert!(table.path_matches_type(Path::new("/media/x"), "fuse.dlnfs"));
    }

    #[test]
    fn test_device_lookup() {
        let table = sample_table();

        assert!(table.contains_device(3));
        assert!(!table.contains_device(42));
        assert_eq!(table.mount_point(2), Some(PathBuf::from("/home")));
        assert_eq!(table.mount_point(42), None);
    }

    #[test]
    fn test_refresh_replaces_snapshot() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let mut table = MountTable::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) as u64;
            Ok(vec![MountEntry::new(10 + n, "/mnt", "ext4")])
        })
        .unwrap();

        assert!(table.contains_device(10));
        table.refresh().unwrap();
        assert!(table.contains_device(11));
        assert!(!table.contains_device(10));
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_refresh_keeps_previous_snapshot() {
        let fail = Arc::new(AtomicUsize::new(0));
        let flag = fail.clone();
        let mut table = MountTable::new(move || {
            if flag.load(Ordering::SeqCst) > 0 {
                Err(SyncError::Mounts("mount table unreadable".to_string()))
            } else {
                Ok(vec![MountEntry::new(7, "/data", "xfs")])
            }
        })
        .unwrap();

        fail.store(1, Ordering::SeqCst);
        assert!(table.refresh().is_err());
        assert!(table.contains_device(7));
    }

    #[test]
    fn test_parse_mountinfo() {
        let text = "\
22 1 8:2 / / rw,relatime shared:1 - ext4 /dev/sda2 rw
41 22 0:52 / /home/u/My\\040Files rw,nosuid - fuse.dlnfs dlnfs rw,user_id=1000
garbage line
";

        let entries = parse_mountinfo(text);

        assert_eq!(
            entries,
            vec![
                MountEntry::new(2050, "/", "ext4"),
                MountEntry::new(52, "/home/u/My Files", "fuse.dlnfs"),
            ]
        );
    }

    #[test]
    fn test_device_encoding_matches_st_dev() {
        assert_eq!(encode_device(8, 2), 0x802);
        assert_eq!(encode_device(259, 1), 0x10301);
        assert_eq!(encode_device(0, 300), 0x10_002c);
    }

    #[test]
    fn test_missing_mountinfo_is_a_mounts_error() {
        let source = ProcMountInfo::new("/nonexistent/mountinfo");
        assert!(matches!(source.load(), Err(SyncError::Mounts(_))));
    }
}
