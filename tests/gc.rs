use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;
use vellum::{
    CheckpointRegistry, DefaultGcSupport, GcError, ManualClock, MemoryDocumentStore, NodeDocument,
    Range, Revision, RevisionVector, SplitDocType, VersionGarbageCollector,
};

const NOW_MS: i64 = 400_000;
const HEAD_TS_MS: i64 = 350_000;
// cutoff lands at 200 s
const MAX_AGE: Duration = Duration::from_millis(200_000);

fn rev(ts_ms: i64) -> Revision {
    Revision::new(ts_ms, 0, 1)
}

/// Surfaces collector events when RUST_LOG is set. Later calls lose the
/// `try_init` race and are ignored.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

struct Fixture {
    store: Arc<MemoryDocumentStore>,
    checkpoints: Arc<CheckpointRegistry>,
    clock: Arc<ManualClock>,
    collector: Arc<VersionGarbageCollector>,
    _scratch: tempfile::TempDir,
}

fn fixture() -> Fixture {
    init_logging();
    let store = Arc::new(MemoryDocumentStore::new());
    let checkpoints = Arc::new(CheckpointRegistry::new());
    let clock = Arc::new(ManualClock::at(NOW_MS));
    let head: RevisionVector = [rev(HEAD_TS_MS)].into_iter().collect();
    let scratch = tempfile::tempdir().expect("scratch dir");
    let collector = Arc::new(
        VersionGarbageCollector::new(
            store.clone(),
            Arc::new(DefaultGcSupport::new(store.clone())),
            checkpoints.clone(),
            clock.clone(),
            Arc::new(head),
        )
        .with_scratch_dir(scratch.path()),
    );
    Fixture {
        store,
        checkpoints,
        clock,
        collector,
        _scratch: scratch,
    }
}

/// A node that existed, then was deleted well before the cutoff.
fn deleted_doc(path: &str, modified_secs: i64) -> NodeDocument {
    let mut doc = NodeDocument::new(path, modified_secs);
    doc.mark_exists(rev(50_000));
    doc.mark_deleted(rev(150_000));
    doc
}

#[test]
fn collects_deleted_leaf_documents() {
    let fx = fixture();
    for path in ["/a", "/b", "/c"] {
        fx.store.create(deleted_doc(path, 100));
    }

    let stats = fx.collector.gc(MAX_AGE).expect("gc run");

    assert_eq!(stats.deleted_doc_gc_count, 3);
    assert_eq!(stats.deleted_leaf_doc_gc_count, 3);
    assert_eq!(stats.split_doc_gc_count, 0);
    assert!(!stats.canceled);
    assert!(!stats.ignored_gc_due_to_checkpoint);
    assert!(fx.store.is_empty());
}

#[test]
fn live_nodes_survive_collection() {
    let fx = fixture();
    // deleted once, but recreated and alive at head
    let mut revived = NodeDocument::new("/alive", 100);
    revived.mark_deleted(rev(100_000));
    revived.mark_exists(rev(200_000));
    fx.store.create(revived);
    // tombstone newer than head: still alive from the run's perspective
    let mut later = NodeDocument::new("/later", 100);
    later.mark_exists(rev(100_000));
    later.mark_deleted(rev(380_000));
    fx.store.create(later);

    let stats = fx.collector.gc(MAX_AGE).expect("gc run");

    assert_eq!(stats.deleted_doc_gc_count, 0);
    assert_eq!(fx.store.len(), 2);
}

#[test]
fn previous_documents_follow_their_main() {
    let fx = fixture();
    let mut main = deleted_doc("/x", 100);
    for high_ts in [60_000, 80_000] {
        let high = rev(high_ts);
        main.add_previous_range(high, Range::new(rev(high_ts - 10_000), 0));
        fx.store
            .create(NodeDocument::previous("/x", high, 0, SplitDocType::DefaultLeaf, 100));
    }
    fx.store.create(main);

    let stats = fx.collector.gc(MAX_AGE).expect("gc run");

    assert_eq!(stats.deleted_doc_gc_count, 1);
    assert_eq!(stats.deleted_leaf_doc_gc_count, 0);
    assert_eq!(stats.split_doc_gc_count, 2);
    assert!(fx.store.is_empty());
    // first-level previous ids are derived, never fetched
    assert_eq!(fx.store.find_calls(), 0);
}

#[test]
fn intermediate_previous_documents_are_fetched() {
    let fx = fixture();
    let high = rev(80_000);
    let mut main = deleted_doc("/m", 100);
    main.add_previous_range(high, Range::new(rev(40_000), 1));

    let mut inter = NodeDocument::previous("/m", high, 1, SplitDocType::Intermediate, 100);
    for leaf_ts in [50_000, 70_000] {
        let leaf_high = rev(leaf_ts);
        inter.add_previous_range(leaf_high, Range::new(rev(leaf_ts - 5_000), 0));
        fx.store.create(NodeDocument::previous(
            inter.path(),
            leaf_high,
            0,
            SplitDocType::DefaultLeaf,
            100,
        ));
    }
    fx.store.create(inter);
    fx.store.create(main);

    let stats = fx.collector.gc(MAX_AGE).expect("gc run");

    assert_eq!(stats.deleted_doc_gc_count, 1);
    assert_eq!(stats.split_doc_gc_count, 3);
    assert_eq!(stats.intermediate_split_doc_gc_count, 0);
    assert!(fx.store.is_empty());
    assert!(fx.store.find_calls() > 0);
}

#[test]
fn recreated_nodes_keep_their_previous_documents() {
    let fx = fixture();
    let high = rev(60_000);
    let mut main = deleted_doc("/r", 100);
    main.add_previous_range(high, Range::new(rev(50_000), 0));
    let prev = NodeDocument::previous("/r", high, 0, SplitDocType::DefaultLeaf, 100);
    let prev_id = prev.id().to_string();
    fx.store.create(prev);
    fx.store.create(main);

    // a writer recreates the node between collection and delete
    let store = fx.store.clone();
    fx.store.set_remove_hook(Box::new(move |_, call| {
        if call == 1 {
            store.set_modified("1:/r", 999);
        }
    }));

    let stats = fx.collector.gc(MAX_AGE).expect("gc run");

    assert_eq!(stats.deleted_doc_gc_count, 0);
    assert_eq!(stats.split_doc_gc_count, 0);
    assert!(fx.store.contains("1:/r"));
    assert!(fx.store.contains(&prev_id));
}

#[test]
fn checkpoint_older_than_cutoff_blocks_collection() {
    let fx = fixture();
    fx.store.create(deleted_doc("/a", 100));
    fx.checkpoints.register(rev(100_000));

    let stats = fx.collector.gc(MAX_AGE).expect("gc run");

    assert!(stats.ignored_gc_due_to_checkpoint);
    assert_eq!(stats.deleted_doc_gc_count, 0);
    assert_eq!(fx.store.len(), 1);
}

#[test]
fn checkpoint_newer_than_cutoff_does_not_block() {
    let fx = fixture();
    fx.store.create(deleted_doc("/a", 100));
    fx.checkpoints.register(rev(300_000));

    let stats = fx.collector.gc(MAX_AGE).expect("gc run");

    assert!(!stats.ignored_gc_due_to_checkpoint);
    assert_eq!(stats.deleted_doc_gc_count, 1);
    assert!(fx.store.is_empty());
}

#[test]
fn cancellation_stops_at_the_next_batch_boundary() {
    let fx = fixture();
    for i in 0..1_000 {
        fx.store.create(deleted_doc(&format!("/n{i}"), 100));
    }

    let collector = fx.collector.clone();
    fx.store.set_remove_hook(Box::new(move |_, call| {
        if call == 2 {
            collector.cancel();
        }
    }));

    let stats = fx.collector.gc(MAX_AGE).expect("gc run");

    assert!(stats.canceled);
    assert!(stats.deleted_doc_gc_count >= 450);
    assert!(stats.deleted_doc_gc_count <= 900);
    assert_eq!(stats.deleted_doc_gc_count, stats.deleted_leaf_doc_gc_count);
    assert_eq!(fx.store.len(), 1_000 - stats.deleted_doc_gc_count);
}

#[test]
fn second_collection_fails_while_one_is_running() {
    let fx = fixture();
    fx.store.create(deleted_doc("/a", 100));

    let collector = fx.collector.clone();
    let nested: Arc<Mutex<Vec<GcError>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = nested.clone();
    fx.store.set_remove_hook(Box::new(move |_, call| {
        if call == 1 {
            if let Err(err) = collector.gc(MAX_AGE) {
                sink.lock().push(err);
            }
        }
    }));

    let stats = fx.collector.gc(MAX_AGE).expect("outer gc run");

    assert_eq!(stats.deleted_doc_gc_count, 1);
    let nested = nested.lock();
    assert_eq!(nested.len(), 1);
    assert!(matches!(nested[0], GcError::AlreadyRunning));
}

#[test]
fn back_to_back_runs_are_idempotent() {
    let fx = fixture();
    for path in ["/a", "/b"] {
        fx.store.create(deleted_doc(path, 100));
    }
    let high = rev(60_000);
    let mut main = deleted_doc("/x", 100);
    main.add_previous_range(high, Range::new(rev(50_000), 0));
    fx.store
        .create(NodeDocument::previous("/x", high, 0, SplitDocType::DefaultLeaf, 100));
    fx.store.create(main);

    let first = fx.collector.gc(MAX_AGE).expect("first run");
    assert_eq!(first.deleted_doc_gc_count, 3);
    assert_eq!(first.split_doc_gc_count, 1);

    let second = fx.collector.gc(MAX_AGE).expect("second run");
    assert_eq!(second.deleted_doc_gc_count, 0);
    assert_eq!(second.deleted_leaf_doc_gc_count, 0);
    assert_eq!(second.split_doc_gc_count, 0);
    assert_eq!(second.intermediate_split_doc_gc_count, 0);
}

#[test]
fn malformed_candidate_ids_are_skipped() {
    let fx = fixture();
    let mut junk = NodeDocument::with_id("junk/id", "/junk", 100);
    junk.mark_deleted(rev(150_000));
    fx.store.create(junk);
    fx.store.create(deleted_doc("/good", 100));

    let stats = fx.collector.gc(MAX_AGE).expect("gc run");

    assert_eq!(stats.deleted_doc_gc_count, 1);
    assert!(fx.store.contains("junk/id"));
    assert!(!fx.store.contains("1:/good"));
}

#[test]
fn orphaned_split_documents_are_reclaimed() {
    let fx = fixture();
    // owner is gone: slices are garbage
    for (ts, split_type) in [
        (60_000, SplitDocType::DefaultLeaf),
        (70_000, SplitDocType::DefaultLeaf),
        (80_000, SplitDocType::CommitRootOnly),
    ] {
        fx.store
            .create(NodeDocument::previous("/gone", rev(ts), 0, split_type, 100));
    }
    fx.store.create(NodeDocument::previous(
        "/gone",
        rev(90_000),
        1,
        SplitDocType::Intermediate,
        100,
    ));
    // owner still present: its slice must stay
    let mut owner = NodeDocument::new("/live", 300);
    owner.mark_exists(rev(100_000));
    let kept = NodeDocument::previous("/live", rev(95_000), 0, SplitDocType::DefaultLeaf, 100);
    let kept_id = kept.id().to_string();
    fx.store.create(kept);
    fx.store.create(owner);

    let stats = fx.collector.gc(MAX_AGE).expect("gc run");

    assert_eq!(stats.deleted_doc_gc_count, 0);
    assert_eq!(stats.split_doc_gc_count, 3);
    assert_eq!(stats.intermediate_split_doc_gc_count, 1);
    assert!(fx.store.contains(&kept_id));
    assert!(fx.store.contains("1:/live"));
}

#[test]
fn cutoff_follows_the_clock() {
    let fx = fixture();
    fx.store.create(deleted_doc("/fresh", 250));

    let stats = fx.collector.gc(MAX_AGE).expect("first run");
    assert_eq!(stats.deleted_doc_gc_count, 0);

    fx.clock.advance(100_000);
    let stats = fx.collector.gc(MAX_AGE).expect("second run");
    assert_eq!(stats.deleted_doc_gc_count, 1);
    assert!(fx.store.is_empty());
}

#[test]
fn eager_leaf_flush_keeps_collecting() {
    let fx = fixture();
    for i in 0..455 {
        fx.store.create(deleted_doc(&format!("/leaf{i}"), 100));
    }

    let stats = fx.collector.gc(MAX_AGE).expect("gc run");

    assert_eq!(stats.deleted_doc_gc_count, 455);
    assert_eq!(stats.deleted_leaf_doc_gc_count, 455);
    assert!(fx.store.is_empty());
}

#[test]
fn stats_serialize_for_reporting() {
    let fx = fixture();
    fx.store.create(deleted_doc("/a", 100));

    let stats = fx.collector.gc(MAX_AGE).expect("gc run");
    let json = serde_json::to_value(&stats).expect("serialize stats");

    assert_eq!(json["deleted_doc_gc_count"], 1);
    assert_eq!(json["canceled"], false);
    assert!(json["run_elapsed"].is_object());
}
