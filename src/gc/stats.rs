use std::time::Duration;

use serde::Serialize;

/// Outcome of one collection run.
///
/// `deleted_doc_gc_count` covers every main document removed, of which
/// `deleted_leaf_doc_gc_count` went through the fast leaf path.
/// `split_doc_gc_count` covers split documents reclaimed both through the
/// previous-document chain of deleted mains and through the store's own
/// split cleanup; the two sources cannot double-count because the chain
/// removal runs first.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VersionGcStats {
    pub ignored_gc_due_to_checkpoint: bool,
    pub canceled: bool,
    pub deleted_doc_gc_count: usize,
    pub deleted_leaf_doc_gc_count: usize,
    pub split_doc_gc_count: usize,
    pub intermediate_split_doc_gc_count: usize,
    pub collect_deleted_docs_elapsed: Duration,
    pub delete_deleted_docs_elapsed: Duration,
    pub sort_doc_ids_elapsed: Duration,
    pub collect_and_delete_split_docs_elapsed: Duration,
    pub run_elapsed: Duration,
}
