//! Revision garbage collection: a single-flight job that collects
//! possibly deleted main documents, verifies them against the head
//! revision, deletes them in conditional batches, and hands split
//! documents to the store's native cleanup.

mod deleted;
mod phases;
mod stats;
mod support;

pub use stats::VersionGcStats;
pub use support::{DefaultGcSupport, HeadRevisionSource, VersionGcSupport};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::checkpoint::Checkpoints;
use crate::clock::Clock;
use crate::document::SplitDocType;
use crate::store::DocumentStore;
use crate::types::{GcError, Result, RevisionVector};

use deleted::{DeletedDocsGc, PROGRESS_BATCH_SIZE};
use phases::{GcPhase, GcPhases};

/// Split document types the collector may reclaim directly.
const GC_TYPES: [SplitDocType; 2] = [SplitDocType::DefaultLeaf, SplitDocType::CommitRootOnly];

const DEFAULT_OVERFLOW_TO_DISK_THRESHOLD: usize = 100_000;

/// Garbage collector for old revisions and deleted nodes. At most one
/// run is active per collector; a second [`gc`](Self::gc) call fails
/// fast with [`GcError::AlreadyRunning`].
pub struct VersionGarbageCollector {
    store: Arc<dyn DocumentStore>,
    gc_support: Arc<dyn VersionGcSupport>,
    checkpoints: Arc<dyn Checkpoints>,
    clock: Arc<dyn Clock>,
    head: Arc<dyn HeadRevisionSource>,
    overflow_to_disk_threshold: AtomicUsize,
    scratch_dir: PathBuf,
    running: Mutex<Option<Arc<AtomicBool>>>,
}

impl VersionGarbageCollector {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        gc_support: Arc<dyn VersionGcSupport>,
        checkpoints: Arc<dyn Checkpoints>,
        clock: Arc<dyn Clock>,
        head: Arc<dyn HeadRevisionSource>,
    ) -> Self {
        Self {
            store,
            gc_support,
            checkpoints,
            clock,
            head,
            overflow_to_disk_threshold: AtomicUsize::new(DEFAULT_OVERFLOW_TO_DISK_THRESHOLD),
            scratch_dir: std::env::temp_dir(),
            running: Mutex::new(None),
        }
    }

    /// Directs external-sort spill files to the given scratch directory.
    pub fn with_scratch_dir(mut self, scratch_dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = scratch_dir.into();
        self
    }

    /// In-memory element count above which candidate id sets spill to
    /// disk. Takes effect for subsequent runs.
    pub fn set_overflow_to_disk_threshold(&self, threshold: usize) {
        self.overflow_to_disk_threshold
            .store(threshold, Ordering::Relaxed);
    }

    /// Collects garbage left by revisions older than `max_revision_age`.
    pub fn gc(&self, max_revision_age: Duration) -> Result<VersionGcStats> {
        let cancel = Arc::new(AtomicBool::new(false));
        {
            let mut slot = self.running.lock();
            if slot.is_some() {
                return Err(GcError::AlreadyRunning);
            }
            *slot = Some(Arc::clone(&cancel));
        }
        let _slot = SlotGuard {
            slot: &self.running,
        };
        let job = GcJob {
            collector: self,
            max_revision_age_millis: max_revision_age.as_millis() as i64,
            cancel: &cancel,
        };
        job.run()
    }

    /// Asks the active run, if any, to stop at the next batch boundary.
    /// Idempotent and non-blocking.
    pub fn cancel(&self) {
        if let Some(cancel) = self.running.lock().as_ref() {
            info!("gc.cancel.requested");
            cancel.store(true, Ordering::Relaxed);
        }
    }
}

/// Clears the single-slot job reference on every exit path.
struct SlotGuard<'a> {
    slot: &'a Mutex<Option<Arc<AtomicBool>>>,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

struct GcJob<'a> {
    collector: &'a VersionGarbageCollector,
    max_revision_age_millis: i64,
    cancel: &'a AtomicBool,
}

impl GcJob<'_> {
    fn run(&self) -> Result<VersionGcStats> {
        let mut phases = GcPhases::new();
        let mut stats = VersionGcStats::default();
        let oldest_rev_ts =
            self.collector.clock.now_millis() - self.max_revision_age_millis;
        let head_revision = self.collector.head.head_revision();

        info!(cutoff_ms = oldest_rev_ts, "gc.run.start");

        // A checkpoint older than the cutoff demands retention of
        // revisions this run would reclaim.
        if let Some(checkpoint) = self.collector.checkpoints.oldest_revision_to_keep() {
            if checkpoint.timestamp_ms() < oldest_rev_ts {
                warn!(
                    checkpoint = %checkpoint.to_readable_string(),
                    cutoff_ms = oldest_rev_ts,
                    "gc.run.ignored_checkpoint"
                );
                stats.ignored_gc_due_to_checkpoint = true;
                self.finalize(&mut phases, &mut stats);
                return Ok(stats);
            }
        }

        self.collect_deleted_documents(&mut phases, &mut stats, &head_revision, oldest_rev_ts)?;
        self.collect_split_documents(&mut phases, &mut stats, oldest_rev_ts)?;

        self.finalize(&mut phases, &mut stats);
        info!(
            deleted = stats.deleted_doc_gc_count,
            deleted_leaf = stats.deleted_leaf_doc_gc_count,
            split = stats.split_doc_gc_count,
            intermediate_split = stats.intermediate_split_doc_gc_count,
            canceled = stats.canceled,
            elapsed_ms = stats.run_elapsed.as_millis() as u64,
            "gc.run.completed"
        );
        Ok(stats)
    }

    fn collect_deleted_documents(
        &self,
        phases: &mut GcPhases,
        stats: &mut VersionGcStats,
        head_revision: &RevisionVector,
        oldest_rev_ts: i64,
    ) -> Result<()> {
        let threshold = self
            .collector
            .overflow_to_disk_threshold
            .load(Ordering::Relaxed);
        let mut gc = DeletedDocsGc::new(
            self.collector.store.as_ref(),
            head_revision,
            self.cancel,
            threshold,
            self.collector.scratch_dir.clone(),
        );

        phases.start(GcPhase::Collecting);
        let mut docs_traversed = 0u64;
        {
            let cursor = self.collector.gc_support.possibly_deleted_docs(oldest_rev_ts)?;
            for doc in cursor {
                if self.cancel.load(Ordering::Relaxed) {
                    break;
                }
                let doc = doc?;
                docs_traversed += 1;
                if docs_traversed % PROGRESS_BATCH_SIZE as u64 == 0 {
                    info!(
                        traversed = docs_traversed,
                        garbage = gc.num_documents(),
                        "gc.collect.progress"
                    );
                }
                gc.possibly_deleted(&doc)?;
                if gc.has_leaf_batch() {
                    phases.start(GcPhase::Deleting);
                    gc.remove_leaf_documents(stats)?;
                    phases.stop(GcPhase::Deleting);
                }
            }
        }
        phases.stop(GcPhase::Collecting);

        if gc.num_documents() == 0 {
            return Ok(());
        }

        phases.start(GcPhase::Deleting);
        gc.remove_leaf_documents(stats)?;
        phases.stop(GcPhase::Deleting);

        phases.start(GcPhase::Sorting);
        gc.ensure_sorted();
        phases.stop(GcPhase::Sorting);

        phases.start(GcPhase::Deleting);
        gc.remove_documents(stats)?;
        phases.stop(GcPhase::Deleting);
        Ok(())
    }

    fn collect_split_documents(
        &self,
        phases: &mut GcPhases,
        stats: &mut VersionGcStats,
        oldest_rev_ts: i64,
    ) -> Result<()> {
        phases.start(GcPhase::SplitsCleanup);
        let result = self.collector.gc_support.delete_split_documents(
            &GC_TYPES,
            oldest_rev_ts,
            self.cancel,
            stats,
        );
        phases.stop(GcPhase::SplitsCleanup);
        result
    }

    fn finalize(&self, phases: &mut GcPhases, stats: &mut VersionGcStats) {
        phases.close();
        stats.canceled = self.cancel.load(Ordering::Relaxed);
        stats.collect_deleted_docs_elapsed = phases.elapsed(GcPhase::Collecting);
        stats.delete_deleted_docs_elapsed = phases.elapsed(GcPhase::Deleting);
        stats.sort_doc_ids_elapsed = phases.elapsed(GcPhase::Sorting);
        stats.collect_and_delete_split_docs_elapsed = phases.elapsed(GcPhase::SplitsCleanup);
        stats.run_elapsed = phases.overall_elapsed();
    }
}
