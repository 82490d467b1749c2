use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::document::{id, NodeDocument, SplitDocType};
use crate::store::{DocumentCursor, DocumentStore};
use crate::types::{Result, RevisionVector};

use super::deleted::DELETE_BATCH_SIZE;
use super::stats::VersionGcStats;

/// Supplies the head revision vector captured at run start.
pub trait HeadRevisionSource: Send + Sync {
    fn head_revision(&self) -> RevisionVector;
}

/// A fixed head, convenient for embedding and tests.
impl HeadRevisionSource for RevisionVector {
    fn head_revision(&self) -> RevisionVector {
        self.clone()
    }
}

/// Store-side support operations for revision garbage collection:
/// the candidate index query and the native split-document cleanup.
pub trait VersionGcSupport: Send + Sync {
    /// Streams main documents modified before the cutoff (millis) that
    /// may represent deleted nodes. False positives are fine; the
    /// collector resolves each candidate against the head revision.
    fn possibly_deleted_docs(&self, oldest_rev_ts_millis: i64) -> Result<DocumentCursor<'_>>;

    /// Reclaims split documents of the given types older than the
    /// cutoff, updating `split_doc_gc_count` and
    /// `intermediate_split_doc_gc_count` in place. Blocking; honors the
    /// cancel flag best-effort at batch boundaries.
    fn delete_split_documents(
        &self,
        gc_types: &[SplitDocType],
        oldest_rev_ts_millis: i64,
        cancel: &AtomicBool,
        stats: &mut VersionGcStats,
    ) -> Result<()>;
}

/// Support implementation over the plain store contract: filters a
/// modified-below-cutoff query for candidates and for reclaimable split
/// documents. Split cleanup only reclaims orphans, split documents whose
/// owning document is gone, so previous documents of live nodes are
/// never touched. Intermediate split documents are reclaimed the same
/// way, counted separately.
pub struct DefaultGcSupport<S> {
    store: Arc<S>,
}

impl<S: DocumentStore> DefaultGcSupport<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: DocumentStore> VersionGcSupport for DefaultGcSupport<S> {
    fn possibly_deleted_docs(&self, oldest_rev_ts_millis: i64) -> Result<DocumentCursor<'_>> {
        let cursor = self
            .store
            .query_modified_before(millis_to_secs(oldest_rev_ts_millis))?;
        Ok(Box::new(cursor.filter(|doc| match doc {
            Ok(doc) => !doc.is_split_document() && doc.was_deleted_once(),
            Err(_) => true,
        })))
    }

    fn delete_split_documents(
        &self,
        gc_types: &[SplitDocType],
        oldest_rev_ts_millis: i64,
        cancel: &AtomicBool,
        stats: &mut VersionGcStats,
    ) -> Result<()> {
        let mut garbage: Vec<String> = Vec::new();
        let mut intermediate: Vec<String> = Vec::new();
        {
            let cursor = self
                .store
                .query_modified_before(millis_to_secs(oldest_rev_ts_millis))?;
            for doc in cursor {
                if cancel.load(Ordering::Relaxed) {
                    return Ok(());
                }
                let doc = doc?;
                let split_type = match doc.split_type() {
                    Some(split_type) => split_type,
                    None => continue,
                };
                if split_type != SplitDocType::Intermediate && !gc_types.contains(&split_type) {
                    continue;
                }
                if !self.is_orphan(&doc)? {
                    continue;
                }
                if split_type == SplitDocType::Intermediate {
                    intermediate.push(doc.id().to_string());
                } else {
                    garbage.push(doc.id().to_string());
                }
            }
        }

        info!(
            split_docs = garbage.len(),
            intermediate = intermediate.len(),
            "gc.splits.start"
        );
        stats.split_doc_gc_count += remove_batched(self.store.as_ref(), cancel, &garbage)?;
        stats.intermediate_split_doc_gc_count +=
            remove_batched(self.store.as_ref(), cancel, &intermediate)?;
        Ok(())
    }
}

impl<S: DocumentStore> DefaultGcSupport<S> {
    /// A split document is reclaimable only once the document owning it
    /// is gone; a live owner may still reference the slice.
    fn is_orphan(&self, doc: &NodeDocument) -> Result<bool> {
        match id::owner_id_for_previous_path(doc.path()) {
            Some(owner_id) => Ok(self.store.find(&owner_id)?.is_none()),
            None => Ok(false),
        }
    }
}

fn remove_batched(store: &dyn DocumentStore, cancel: &AtomicBool, ids: &[String]) -> Result<usize> {
    let mut removed = 0;
    for batch in ids.chunks(DELETE_BATCH_SIZE) {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        debug!(batch = batch.len(), "gc.splits.batch");
        removed += store.remove(batch)?;
    }
    Ok(removed)
}

fn millis_to_secs(millis: i64) -> i64 {
    millis / 1000
}
