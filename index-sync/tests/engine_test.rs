//! End-to-end tests for the sync engine through its public surface.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anything_index_sync::{
    ChangeKind, ChangeRecord, IndexRequest, IndexResponse, IndexStore, IndexSync, LocalBus,
    MemoryIndexStore, MountTable, Publication, PublishedIndex, RawEvent, Result, ServiceIdentity,
    SyncConfig,
};
use pretty_assertions::assert_eq;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn records(prefix: &str, count: usize) -> Vec<ChangeRecord> {
    (0..count)
        .map(|i| ChangeRecord::new(ChangeKind::Created, format!("{prefix}/{i:05}")))
        .collect()
}

fn plain_record(kind: ChangeKind, path: &Path) -> Result<ChangeRecord> {
    Ok(ChangeRecord::new(kind, path))
}

fn engine_over(store: &MemoryIndexStore, flush_interval: Duration) -> IndexSync {
    IndexSync::builder(SyncConfig::new("/idx", flush_interval))
        .with_store(store.clone())
        .with_mounts(MountTable::empty())
        .with_record_generator(plain_record)
        .build()
        .unwrap()
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_scheduled_drain_is_capped() {
    let store = MemoryIndexStore::new("/idx");
    let engine = engine_over(&store, Duration::from_secs(3600));
    engine.insert_pending(records("/bulk", 600));

    assert_eq!(engine.scheduled_drain(), 500);
    assert_eq!(engine.pending_count(), 100);

    assert_eq!(engine.scheduled_drain(), 100);
    assert_eq!(engine.pending_count(), 0);

    assert_eq!(engine.scheduled_drain(), 0);
    assert_eq!(store.len(), 600);
    assert_eq!(store.counters().delayed_adds, 600);
}

#[test]
fn test_worker_flushes_exactly_one_batch() {
    let store = MemoryIndexStore::new("/idx");
    let engine = engine_over(&store, Duration::from_secs(3600));

    for record in records("/hot", 101) {
        engine.enqueue_delayed_add(record);
    }

    assert!(wait_until(|| store.len() == 100));
    assert_eq!(engine.addition_count(), 1);
    assert!(store.document_exists("/hot/00000"));
    assert!(!store.document_exists("/hot/00100"));
}

#[test]
fn test_lanes_drain_independently() {
    let store = MemoryIndexStore::new("/idx");
    let engine = engine_over(&store, Duration::from_millis(20));

    engine.insert_pending(records("/bulk", 3));
    engine.enqueue_delayed_add(ChangeRecord::new(ChangeKind::Created, "/hot/one"));

    assert!(wait_until(|| store.document_exists("/hot/one")));
    assert_eq!(engine.pending_count(), 3);

    engine.scheduled_drain();
    assert_eq!(store.len(), 4);
}

#[test]
fn test_terminate_stops_background_flushes() {
    let store = MemoryIndexStore::new("/idx");
    let engine = engine_over(&store, Duration::from_millis(10));

    engine.terminate();
    engine.terminate();
    assert!(!engine.is_running());

    for record in records("/late", 150) {
        engine.enqueue_delayed_add(record);
    }
    thread::sleep(Duration::from_millis(100));

    assert_eq!(engine.addition_count(), 150);
    assert!(store.is_empty());

    // The bulk lane is driven by the caller and keeps working.
    engine.insert_pending(records("/bulk", 2));
    assert_eq!(engine.scheduled_drain(), 2);
}

#[test]
fn test_concurrent_producers_reconcile() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 250;

    let store = MemoryIndexStore::new("/idx");
    let engine = Arc::new(engine_over(&store, Duration::from_millis(5)));
    let drained = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let engine = engine.clone();
            let drained = drained.clone();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let path = format!("/stress/t{t}/f{i:04}");
                    engine.insert_pending([ChangeRecord::new(ChangeKind::Created, &path)]);
                    engine.enqueue_delayed_add(ChangeRecord::new(
                        ChangeKind::Modified,
                        format!("/hot/t{t}/f{i:04}"),
                    ));
                    if i % 10 == 0 {
                        drained.fetch_add(engine.scheduled_drain(), Ordering::SeqCst);
                        engine.query("/stress", "f0", 0, 5);
                        engine.has_record(&path);
                    }
                    if i % 25 == 0 {
                        let direct = format!("/direct/t{t}/f{i:04}");
                        assert!(engine.add_path(&direct));
                        assert!(engine.has_record(&direct));
                        assert!(engine.remove_path(&direct));
                        assert!(!engine.has_record(&direct));
                    }
                    if i % 50 == 0 {
                        engine.remove_path(&format!("/hot/t{t}"));
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let stats = engine.stats();
    assert_eq!(
        stats.pending + drained.load(Ordering::SeqCst),
        THREADS * PER_THREAD
    );
    assert_eq!(stats.counters.pending_drained, drained.load(Ordering::SeqCst));

    assert!(wait_until(|| engine.addition_count() == 0));
    assert_eq!(
        engine.stats().counters.additions_flushed,
        THREADS * PER_THREAD
    );
}

#[test]
fn test_ignore_rules() {
    let config = SyncConfig::load(fixtures_dir().join("sync.toml")).unwrap();
    let store = MemoryIndexStore::new("/idx");
    let engine = IndexSync::builder(config)
        .with_store(store.clone())
        .with_record_generator(plain_record)
        .build()
        .unwrap();

    for path in ["x.longname", "/data/.lfn/a.longname", "/home/u/b.longname"] {
        assert!(engine.ignored_event(path, false));
        assert!(engine.ignored_event(path, true));
    }
    assert!(engine.ignored_event("/data/.lfn/dir/file", false));
    assert!(!engine.ignored_event("/data/.lfn/dir/file", true));
    assert!(!engine.ignored_event("/home/u/file", false));

    let summary = engine.dispatch_events(vec![
        RawEvent::new(ChangeKind::Created, "/data/.lfn/dir/file"),
        RawEvent::new(ChangeKind::Created, "/home/u/file"),
        RawEvent::new(ChangeKind::Created, "/home/u/file.longname"),
    ]);
    assert_eq!(summary.additions, 1);
    assert_eq!(summary.ignored, 2);

    assert!(wait_until(|| store.document_exists("/home/u/file")));
}

#[test]
fn test_dispatched_removal_reaches_store() {
    let config = SyncConfig::load(fixtures_dir().join("sync.toml")).unwrap();
    let store = MemoryIndexStore::new("/idx").with_deletion_batch_size(1);
    let engine = IndexSync::builder(config)
        .with_store(store.clone())
        .build()
        .unwrap();

    engine.insert_pending(records("/home/u/docs", 3));
    engine.scheduled_drain();
    assert_eq!(store.len(), 3);

    engine.dispatch_events([RawEvent::new(ChangeKind::Deleted, "/home/u/docs")]);

    assert!(wait_until(|| store.is_empty()));
    assert_eq!(engine.stats().counters.deletion_runs, 1);
}

#[test]
fn test_failing_deletions_wait_for_poll() {
    let config = SyncConfig::new("/idx", Duration::from_secs(3600))
        .with_poll_interval(Duration::from_millis(50));
    let store = MemoryIndexStore::new("/idx").with_deletion_batch_size(1);
    store.set_read_only(true);
    let engine = IndexSync::builder(config)
        .with_store(store.clone())
        .with_mounts(MountTable::empty())
        .with_record_generator(plain_record)
        .build()
        .unwrap();

    engine.enqueue_delayed_remove("/gone");
    thread::sleep(Duration::from_millis(300));
    engine.terminate();

    // One attempt on the wake plus roughly one per poll timeout.
    let counters = engine.stats().counters;
    assert!(counters.deletion_runs >= 1);
    assert!(counters.deletion_runs <= 20, "{} runs", counters.deletion_runs);
    assert_eq!(counters.store_failures, counters.deletion_runs);
    assert_eq!(store.pending_deletions(), 1);
}

#[test]
fn test_second_instance_adopts_identity() {
    let bus = LocalBus::new();
    let identity = ServiceIdentity::new("io.anything.IndexSync.Shared", "/shared");

    let first_store = MemoryIndexStore::new("/idx-a");
    let second_store = MemoryIndexStore::new("/idx-b");
    let first = Arc::new(engine_over(&first_store, Duration::from_secs(3600)));
    let second = Arc::new(engine_over(&second_store, Duration::from_secs(3600)));

    let published = match PublishedIndex::claim(first.clone(), &bus, identity.clone()).unwrap() {
        Publication::Claimed(published) => published,
        Publication::Adopted => panic!("first instance should claim the identity"),
    };
    let adopted = PublishedIndex::claim(second.clone(), &bus, identity).unwrap();
    assert!(!adopted.is_claimed());

    // The second instance still serves direct calls.
    assert!(second.add_path("/home/u/report.pdf"));
    assert!(second.has_record("/home/u/report.pdf"));
    assert_eq!(
        second.query("/home", "report", 0, 10),
        vec!["/home/u/report.pdf".to_string()]
    );

    // The published surface answers for the first instance only.
    assert_eq!(
        published.handle(IndexRequest::HasRecord {
            path: "/home/u/report.pdf".to_string(),
        }),
        IndexResponse::Flag(false)
    );
}
