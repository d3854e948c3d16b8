//! Index store contract and an in-memory implementation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{Result, SyncError};
use crate::record::ChangeRecord;

/// Predicate deciding whether a path may enter the index.
pub type ChangeFilter = Box<dyn Fn(&Path) -> bool + Send + Sync>;

/// Callback receiving store failures that the engine swallows.
pub type FailureHook = Arc<dyn Fn(&StoreFailure) + Send + Sync>;

/// The search index the engine feeds.
///
/// Every call is made while the engine holds its state lock, so calls must
/// be bounded in latency and must never re-enter the engine. Mutations
/// return errors for reporting only; the engine does not retry them.
pub trait IndexStore: Send {
    /// Apply an addition as part of the worker's current batch.
    fn add_immediate(&mut self, record: ChangeRecord) -> Result<()>;

    /// Queue an addition for the store's own batching.
    fn add_delayed(&mut self, record: ChangeRecord) -> Result<()>;

    fn remove_immediate(&mut self, path: &str) -> Result<()>;

    /// Queue removal of every document under `term`.
    fn remove_delayed(&mut self, term: String) -> Result<()>;

    /// Whether enough removals are queued to be worth processing.
    fn deletion_jobs_ready(&self) -> bool;

    fn process_deletion_jobs(&mut self) -> Result<()>;

    fn document_exists(&self, path: &str) -> bool;

    /// Paths of documents under `path` whose names match `keywords`.
    fn query(
        &self,
        path: &str,
        keywords: &str,
        offset: usize,
        max_count: usize,
        fuzzy: bool,
    ) -> Vec<String>;

    fn set_change_filter(&mut self, filter: ChangeFilter);

    fn index_directory(&self) -> PathBuf;
}

/// Store mutation that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOperation {
    AddImmediate,
    AddDelayed,
    RemoveImmediate,
    RemoveDelayed,
    ProcessDeletions,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AddImmediate => "add_immediate",
            Self::AddDelayed => "add_delayed",
            Self::RemoveImmediate => "remove_immediate",
            Self::RemoveDelayed => "remove_delayed",
            Self::ProcessDeletions => "process_deletions",
        };
        f.write_str(name)
    }
}

/// A failed store mutation, as delivered to the failure hook.
#[derive(Debug)]
pub struct StoreFailure {
    pub operation: StoreOperation,

    /// Path or term the operation targeted (empty for deletion runs).
    pub target: String,

    pub error: SyncError,
}

/// A document held by [`MemoryIndexStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub path: String,
    pub is_directory: bool,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    pub indexed_at: DateTime<Utc>,
}

impl IndexedDocument {
    fn from_record(record: &ChangeRecord) -> Self {
        Self {
            path: record.key(),
            is_directory: record.is_directory(),
            size: record.attributes.size,
            modified: record.attributes.modified,
            indexed_at: Utc::now(),
        }
    }

    fn file_name(&self) -> &str {
        Path::new(&self.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.path)
    }
}

/// Operation counters of [`MemoryIndexStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounters {
    pub immediate_adds: usize,
    pub delayed_adds: usize,
    pub filtered_adds: usize,
    pub immediate_removes: usize,
    pub delayed_removes: usize,
    pub deletion_runs: usize,
    pub queries: usize,
}

struct MemoryInner {
    index_dir: PathBuf,
    documents: BTreeMap<String, IndexedDocument>,
    deletion_terms: Vec<String>,
    deletion_batch_size: usize,
    filter: Option<ChangeFilter>,
    read_only: bool,
    counters: StoreCounters,
}

impl MemoryInner {
    fn insert(&mut self, record: &ChangeRecord) -> Result<bool> {
        if self.read_only {
            return Err(SyncError::Store(format!(
                "index is read-only, cannot add {}",
                record.path.display()
            )));
        }

        if let Some(filter) = &self.filter {
            if !filter(&record.path) {
                trace!("Change filter rejected {}", record.path.display());
                self.counters.filtered_adds += 1;
                return Ok(false);
            }
        }

        let document = IndexedDocument::from_record(record);
        self.documents.insert(document.path.clone(), document);
        Ok(true)
    }

    fn remove_under(&mut self, term: &str) -> usize {
        let before = self.documents.len();
        let root = Path::new(term);
        self.documents.retain(|path, _| !Path::new(path).starts_with(root));
        before - self.documents.len()
    }
}

/// Path-keyed in-memory index.
///
/// Delayed additions become visible immediately; delayed removals are
/// queued as terms and applied once `deletion_batch_size` terms are
/// waiting. Clones share the same index.
#[derive(Clone)]
pub struct MemoryIndexStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryIndexStore {
    pub fn new(index_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryInner {
                index_dir: index_dir.into(),
                documents: BTreeMap::new(),
                deletion_terms: Vec::new(),
                deletion_batch_size: 64,
                filter: None,
                read_only: false,
                counters: StoreCounters::default(),
            })),
        }
    }

    /// Set how many queued removals make deletion jobs ready (min one).
    pub fn with_deletion_batch_size(self, size: usize) -> Self {
        self.inner.lock().deletion_batch_size = size.max(1);
        self
    }

    /// Make every mutation fail, e.g. while the index volume is unavailable.
    pub fn set_read_only(&self, read_only: bool) {
        self.inner.lock().read_only = read_only;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().documents.is_empty()
    }

    pub fn document(&self, path: &str) -> Option<IndexedDocument> {
        self.inner.lock().documents.get(path).cloned()
    }

    pub fn pending_deletions(&self) -> usize {
        self.inner.lock().deletion_terms.len()
    }

    pub fn counters(&self) -> StoreCounters {
        self.inner.lock().counters.clone()
    }
}

impl fmt::Debug for MemoryIndexStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryIndexStore")
            .field("index_dir", &inner.index_dir)
            .field("documents", &inner.documents.len())
            .field("deletion_terms", &inner.deletion_terms.len())
            .finish()
    }
}

impl IndexStore for MemoryIndexStore {
    fn add_immediate(&mut self, record: ChangeRecord) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.insert(&record)? {
            inner.counters.immediate_adds += 1;
        }
        Ok(())
    }

    fn add_delayed(&mut self, record: ChangeRecord) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.insert(&record)? {
            inner.counters.delayed_adds += 1;
        }
        Ok(())
    }

    fn remove_immediate(&mut self, path: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.read_only {
            return Err(SyncError::Store(format!(
                "index is read-only, cannot remove {path}"
            )));
        }
        let removed = inner.remove_under(path);
        inner.counters.immediate_removes += 1;
        trace!("Removed {removed} documents under {path}");
        Ok(())
    }

    fn remove_delayed(&mut self, term: String) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.deletion_terms.push(term);
        inner.counters.delayed_removes += 1;
        Ok(())
    }

    fn deletion_jobs_ready(&self) -> bool {
        let inner = self.inner.lock();
        inner.deletion_terms.len() >= inner.deletion_batch_size
    }

    fn process_deletion_jobs(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.read_only {
            return Err(SyncError::Store(
                "index is read-only, deletion jobs kept".to_string(),
            ));
        }

        let terms = std::mem::take(&mut inner.deletion_terms);
        let removed: usize = terms.iter().map(|term| inner.remove_under(term)).sum();
        inner.counters.deletion_runs += 1;
        debug!(
            "Processed {} deletion jobs, {removed} documents removed",
            terms.len()
        );
        Ok(())
    }

    fn document_exists(&self, path: &str) -> bool {
        self.inner.lock().documents.contains_key(path)
    }

    fn query(
        &self,
        path: &str,
        keywords: &str,
        offset: usize,
        max_count: usize,
        fuzzy: bool,
    ) -> Vec<String> {
        let mut inner = self.inner.lock();
        inner.counters.queries += 1;

        let terms: Vec<String> = keywords
            .split_whitespace()
            .map(|k| if fuzzy { k.to_lowercase() } else { k.to_string() })
            .collect();
        let root = Path::new(path);

        inner
            .documents
            .values()
            .filter(|doc| path.is_empty() || Path::new(&doc.path).starts_with(root))
            .filter(|doc| {
                let name = if fuzzy {
                    doc.file_name().to_lowercase()
                } else {
                    doc.file_name().to_string()
                };
                terms.iter().all(|term| name.contains(term.as_str()))
            })
            .skip(offset)
            .take(max_count)
            .map(|doc| doc.path.clone())
            .collect()
    }

    fn set_change_filter(&mut self, filter: ChangeFilter) {
        self.inner.lock().filter = Some(filter);
    }

    fn index_directory(&self) -> PathBuf {
        self.inner.lock().index_dir.clone()
    }
}
