//! Buffers garbage candidates during a run and flushes them through
//! batched conditional deletes.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::document::{id, NodeDocument, NodeDocumentIdComparator};
use crate::sort::ExternalSort;
use crate::store::DocumentStore;
use crate::types::{Result, RevisionVector};

use super::stats::VersionGcStats;

/// Kept below typical store bulk-query in-clause limits so batches are
/// never re-partitioned downstream.
pub(crate) const DELETE_BATCH_SIZE: usize = 450;
pub(crate) const PROGRESS_BATCH_SIZE: usize = 10_000;

/// Per-run candidate buffers. Leaf candidates (no children, no previous
/// documents) stay in memory and flush eagerly; everything else goes
/// through external-memory sorted sets. Previous-document ids of mains
/// that turn out to be concurrently recreated land in the exclude set
/// and are never deleted.
pub(crate) struct DeletedDocsGc<'a> {
    store: &'a dyn DocumentStore,
    head_revision: &'a RevisionVector,
    cancel: &'a AtomicBool,
    leaf_ids: Vec<String>,
    doc_ids: ExternalSort<NodeDocumentIdComparator>,
    prev_doc_ids: ExternalSort<NodeDocumentIdComparator>,
    exclude: HashSet<String>,
}

impl<'a> DeletedDocsGc<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        head_revision: &'a RevisionVector,
        cancel: &'a AtomicBool,
        overflow_threshold: usize,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            head_revision,
            cancel,
            leaf_ids: Vec::new(),
            doc_ids: ExternalSort::new(
                overflow_threshold,
                NodeDocumentIdComparator,
                scratch_dir.clone(),
            ),
            prev_doc_ids: ExternalSort::new(
                overflow_threshold,
                NodeDocumentIdComparator,
                scratch_dir,
            ),
            exclude: HashSet::new(),
        }
    }

    /// Documents identified as garbage so far, previous documents not
    /// included.
    pub fn num_documents(&self) -> u64 {
        self.doc_ids.len() + self.leaf_ids.len() as u64
    }

    /// Feeds one candidate. Verifies the node is really gone at the head
    /// revision before buffering it; live nodes are dropped silently,
    /// candidates with an id the depth rule cannot parse are dropped
    /// with a warning.
    pub fn possibly_deleted(&mut self, doc: &NodeDocument) -> Result<()> {
        let gc_id = id::gc_id(doc.id(), doc.modified());
        if id::depth_from_id(&gc_id).is_none() {
            warn!(id = %gc_id, "gc.collect.invalid_id");
            return Ok(());
        }
        if doc.node_at_revision(self.head_revision).is_some() {
            return Ok(());
        }
        let mut previous = doc.previous_doc_ids(self.store).peekable();
        if !doc.has_children() && previous.peek().is_none() {
            self.leaf_ids.push(gc_id);
        } else {
            self.doc_ids.add(gc_id)?;
            for prev_id in previous {
                self.prev_doc_ids.add(prev_id?)?;
            }
        }
        Ok(())
    }

    pub fn has_leaf_batch(&self) -> bool {
        self.leaf_ids.len() >= DELETE_BATCH_SIZE
    }

    /// Drains the buffered leaf candidates through conditional deletes.
    pub fn remove_leaf_documents(&mut self, stats: &mut VersionGcStats) -> Result<()> {
        let total = self.num_documents();
        let leaf_ids = std::mem::take(&mut self.leaf_ids);
        let removed = remove_conditionally(
            self.store,
            self.cancel,
            &mut self.exclude,
            leaf_ids.into_iter().map(Ok),
            total,
            "leaf",
        )?;
        stats.deleted_leaf_doc_gc_count += removed;
        stats.deleted_doc_gc_count += removed;
        Ok(())
    }

    /// Finalizes both external sorts. Idempotent.
    pub fn ensure_sorted(&mut self) {
        self.doc_ids.sort();
        self.prev_doc_ids.sort();
    }

    /// Removes everything identified as garbage: any leaf remainder,
    /// then the non-leaf mains with conditional deletes, then their
    /// previous documents filtered by the exclude set.
    pub fn remove_documents(&mut self, stats: &mut VersionGcStats) -> Result<()> {
        self.remove_leaf_documents(stats)?;
        self.ensure_sorted();

        let total = self.doc_ids.len();
        stats.deleted_doc_gc_count += remove_conditionally(
            self.store,
            self.cancel,
            &mut self.exclude,
            self.doc_ids.iter()?,
            total,
            "other",
        )?;

        let total = self
            .prev_doc_ids
            .len()
            .saturating_sub(self.exclude.len() as u64);
        info!(previous = total, "gc.prev_delete.start");
        stats.split_doc_gc_count += remove_unconditionally(
            self.store,
            self.cancel,
            self.prev_doc_ids
                .iter()?
                .filter(|entry| match entry {
                    Ok(prev_id) => !self.exclude.contains(prev_id),
                    Err(_) => true,
                }),
            total,
        )?;
        Ok(())
    }

    /// Releases the external sorts and their spill files.
    pub fn close(&mut self) {
        self.doc_ids.close();
        self.prev_doc_ids.close();
    }
}

/// Deletes composite-tagged ids in batches, each entry guarded by an
/// equality condition on the observed `_modified`. A batch that removes
/// fewer entries than it carried means some nodes were recreated while
/// the collection ran; their previous-document ids are recorded in the
/// exclude set.
fn remove_conditionally<I>(
    store: &dyn DocumentStore,
    cancel: &AtomicBool,
    exclude: &mut HashSet<String>,
    ids: I,
    total: u64,
    label: &str,
) -> Result<usize>
where
    I: Iterator<Item = Result<String>>,
{
    info!(documents = total, label, "gc.delete.start");
    let mut ids = ids;
    let mut deleted = 0usize;
    let mut recreated = 0usize;
    let mut last_logged = 0usize;
    while !cancel.load(Ordering::Relaxed) {
        let mut chunk_len = 0usize;
        let mut batch: Vec<(String, i64)> = Vec::new();
        for entry in ids.by_ref().take(DELETE_BATCH_SIZE) {
            chunk_len += 1;
            let gc_id = entry?;
            let Some((doc_id, suffix)) = id::split_gc_id(&gc_id) else {
                warn!(id = %gc_id, "gc.delete.invalid_id");
                continue;
            };
            let modified = match suffix.parse::<i64>() {
                Ok(modified) => modified,
                Err(_) => {
                    warn!(doc = doc_id, suffix, "gc.delete.invalid_modified");
                    // -1 never matches a real _modified, so the row is skipped
                    -1
                }
            };
            batch.push((doc_id.to_string(), modified));
        }
        if chunk_len == 0 {
            break;
        }
        if batch.is_empty() {
            continue;
        }

        debug!(batch = batch.len(), label, "gc.delete.batch");
        let n_removed = store.remove_if_modified(&batch)?;

        if n_removed < batch.len() {
            // some nodes were recreated while the collection ran; find
            // the survivors and protect their previous documents
            for (doc_id, _) in &batch {
                if let Some(doc) = store.find(doc_id)? {
                    for prev_id in doc.previous_doc_ids(store) {
                        exclude.insert(prev_id?);
                    }
                }
            }
            recreated += batch.len() - n_removed;
        }

        deleted += n_removed;
        debug!(deleted, label, "gc.delete.batch_done");

        if deleted + recreated - last_logged >= PROGRESS_BATCH_SIZE {
            last_logged = deleted + recreated;
            let progress = last_logged as f64 * 100.0 / total.max(1) as f64;
            info!(deleted, progress_percent = progress, label, "gc.delete.progress");
        }
    }
    Ok(deleted)
}

/// Deletes previous documents by id, unconditionally, in batches.
fn remove_unconditionally<I>(
    store: &dyn DocumentStore,
    cancel: &AtomicBool,
    ids: I,
    total: u64,
) -> Result<usize>
where
    I: Iterator<Item = Result<String>>,
{
    let mut ids = ids;
    let mut deleted = 0usize;
    let mut last_logged = 0usize;
    while !cancel.load(Ordering::Relaxed) {
        let batch: Vec<String> = ids
            .by_ref()
            .take(DELETE_BATCH_SIZE)
            .collect::<Result<_>>()?;
        if batch.is_empty() {
            break;
        }
        debug!(batch = batch.len(), "gc.prev_delete.batch");
        deleted += store.remove(&batch)?;

        if deleted - last_logged >= PROGRESS_BATCH_SIZE {
            last_logged = deleted;
            let progress = last_logged as f64 * 100.0 / total.max(1) as f64;
            info!(deleted, progress_percent = progress, "gc.prev_delete.progress");
        }
    }
    Ok(deleted)
}

impl Drop for DeletedDocsGc<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
