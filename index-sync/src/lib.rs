//! # Index Sync
//!
//! Synchronization core between file-system change notifications and a
//! file-name index. It buffers change records, batches them into the
//! index store on a background worker, filters notifications coming from
//! long-filename overlay mounts and answers index queries.
//!
//! ## Features
//!
//! - **Bulk lane**: pending records moved to the store in capped chunks by
//!   a periodic drain
//! - **Hot lane**: addition jobs flushed by a worker thread once the queue
//!   outgrows a batch or the flush interval elapses
//! - **Event filtering**: shadow records and overlay-mount paths are
//!   dropped before they reach the index
//! - **Publishing**: the query surface is published under a service
//!   identity by the first instance to claim it
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           IndexSync                              │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ChangeWatcher ──► dispatch_events ──► hot lane ──► worker ──┐   │
//! │                          │                                   │   │
//! │                   IgnoredEventFilter                         ▼   │
//! │                          │                             IndexStore│
//! │  index_directory_tree ──► bulk lane ──► ScheduledDrainer ────▲   │
//! │                                                              │   │
//! │  PublishedIndex ──► query / add_path / remove_path ──────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod dispatch;
pub mod drain;
pub mod engine;
pub mod error;
pub mod filter;
pub mod indexer;
pub mod mounts;
pub mod policy;
pub mod publish;
pub mod record;
mod scheduler;
mod state;
pub mod store;
pub mod watcher;

pub use config::{IgnoreConfig, SyncConfig};
pub use dispatch::DispatchSummary;
pub use drain::ScheduledDrainer;
pub use engine::{IndexSync, IndexSyncBuilder, SyncStats};
pub use error::{Result, SyncError};
pub use filter::IgnoredEventFilter;
pub use mounts::{
    MountEntry, MountSnapshot, MountSource, MountTable, ProcMountInfo, StaticMounts,
    parse_mountinfo,
};
pub use policy::BatchPolicy;
pub use publish::{
    ClaimOutcome, IndexRequest, IndexResponse, LocalBus, Publication, PublishEndpoint,
    PublishedIndex, ServiceIdentity,
};
pub use record::{
    ChangeKind, ChangeRecord, FsRecordGenerator, RawEvent, RecordAttributes, RecordGenerator,
};
pub use state::SyncCounters;
pub use store::{IndexStore, MemoryIndexStore, StoreFailure, StoreOperation};
pub use watcher::ChangeWatcher;
