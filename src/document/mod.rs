//! Node documents and their previous (split) documents.
//!
//! A main document is the authoritative record of a node. Its `_deleted`
//! map carries the tombstone history per revision; its previous-range map
//! points at split documents holding older revisions. Resolution against a
//! revision vector decides whether the node exists at that head.

pub mod id;

use std::collections::BTreeMap;

use crate::store::DocumentStore;
use crate::types::{Result, Revision, RevisionVector};

pub use id::NodeDocumentIdComparator;

/// Split document classes relevant to garbage collection.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SplitDocType {
    /// Plain history slice, directly garbage collectable.
    DefaultLeaf,
    /// Slice carrying only commit-root entries, directly collectable.
    CommitRootOnly,
    /// Aggregation node referencing deeper previous documents.
    Intermediate,
}

/// Descriptor of the revision range covered by one previous document.
/// The range's high revision is the key of the owning map; `height` 0
/// means the document is addressable straight from the main document.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Range {
    pub low: Revision,
    pub height: u32,
}

impl Range {
    pub fn new(low: Revision, height: u32) -> Self {
        Self { low, height }
    }
}

/// Minimal node state produced by revision resolution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DocumentNodeState {
    pub path: String,
    pub last_rev: Revision,
}

/// A document in the nodes collection: either a main document or one of
/// the previous documents split off from it.
#[derive(Clone, Debug)]
pub struct NodeDocument {
    doc_id: String,
    path: String,
    modified_secs: i64,
    has_children: bool,
    deleted: BTreeMap<Revision, bool>,
    prev_ranges: BTreeMap<Revision, Range>,
    split_type: Option<SplitDocType>,
}

impl NodeDocument {
    /// Creates a main document for the given absolute path.
    pub fn new(path: impl Into<String>, modified_secs: i64) -> Self {
        let path = path.into();
        Self {
            doc_id: id::id_from_path(&path),
            path,
            modified_secs,
            has_children: false,
            deleted: BTreeMap::new(),
            prev_ranges: BTreeMap::new(),
            split_type: None,
        }
    }

    /// Creates a document with an externally supplied id. Stores migrated
    /// from older deployments can hold ids that do not follow the depth
    /// encoding; the collector skips such documents instead of touching
    /// them.
    pub fn with_id(doc_id: impl Into<String>, path: impl Into<String>, modified_secs: i64) -> Self {
        Self {
            doc_id: doc_id.into(),
            path: path.into(),
            modified_secs,
            has_children: false,
            deleted: BTreeMap::new(),
            prev_ranges: BTreeMap::new(),
            split_type: None,
        }
    }

    /// Creates a previous document for a slice of `main_path`'s history.
    /// Its id is derived the same way readers derive it.
    pub fn previous(
        main_path: &str,
        high: Revision,
        height: u32,
        split_type: SplitDocType,
        modified_secs: i64,
    ) -> Self {
        let path = id::previous_path_for(main_path, &high, height);
        let doc_id = id::id_from_path(&path);
        Self {
            doc_id,
            path,
            modified_secs,
            has_children: false,
            deleted: BTreeMap::new(),
            prev_ranges: BTreeMap::new(),
            split_type: Some(split_type),
        }
    }

    pub fn id(&self) -> &str {
        &self.doc_id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `_modified` in seconds since the epoch.
    pub fn modified(&self) -> i64 {
        self.modified_secs
    }

    pub fn set_modified(&mut self, modified_secs: i64) {
        self.modified_secs = modified_secs;
    }

    pub fn has_children(&self) -> bool {
        self.has_children
    }

    pub fn set_has_children(&mut self, has_children: bool) {
        self.has_children = has_children;
    }

    pub fn split_type(&self) -> Option<SplitDocType> {
        self.split_type
    }

    pub fn is_split_document(&self) -> bool {
        self.split_type.is_some()
    }

    /// Records that the node exists as of `revision`.
    pub fn mark_exists(&mut self, revision: Revision) {
        self.deleted.insert(revision, false);
    }

    /// Records a tombstone as of `revision`.
    pub fn mark_deleted(&mut self, revision: Revision) {
        self.deleted.insert(revision, true);
    }

    /// True if any revision ever tombstoned this node. Index queries use
    /// this as the cheap "possibly deleted" signal; resolution against
    /// the head revision is the authoritative check.
    pub fn was_deleted_once(&self) -> bool {
        self.deleted.values().any(|deleted| *deleted)
    }

    pub fn add_previous_range(&mut self, high: Revision, range: Range) {
        self.prev_ranges.insert(high, range);
    }

    pub fn previous_ranges(&self) -> &BTreeMap<Revision, Range> {
        &self.prev_ranges
    }

    /// Resolves the node at the given head revision. Returns `None` when
    /// the node has no visible state or its newest visible entry is a
    /// tombstone.
    pub fn node_at_revision(&self, head: &RevisionVector) -> Option<DocumentNodeState> {
        let (revision, deleted) = self
            .deleted
            .iter()
            .filter(|(revision, _)| head.is_visible(revision))
            .max_by(|(a, _), (b, _)| a.cmp(b))?;
        if *deleted {
            return None;
        }
        Some(DocumentNodeState {
            path: self.path.clone(),
            last_rev: *revision,
        })
    }

    /// Enumerates the ids of all previous documents belonging to this
    /// document. When every range sits at height 0 the ids are derived
    /// without touching the store; otherwise the chain is walked with
    /// `find`, streaming one id at a time.
    pub fn previous_doc_ids<'a>(&'a self, store: &'a dyn DocumentStore) -> PreviousDocIds<'a> {
        let inner = if self.prev_ranges.is_empty() {
            PrevIdsInner::Empty
        } else if self.prev_ranges.values().all(|range| range.height == 0) {
            PrevIdsInner::Derived {
                path: &self.path,
                ranges: self.prev_ranges.iter(),
            }
        } else {
            let pending = self
                .prev_ranges
                .iter()
                .map(|(high, range)| id::previous_id_for(&self.path, high, range.height))
                .collect();
            PrevIdsInner::Fetched { store, pending }
        };
        PreviousDocIds { inner }
    }
}

/// Streaming enumeration of previous-document ids; see
/// [`NodeDocument::previous_doc_ids`].
pub struct PreviousDocIds<'a> {
    inner: PrevIdsInner<'a>,
}

enum PrevIdsInner<'a> {
    Empty,
    Derived {
        path: &'a str,
        ranges: std::collections::btree_map::Iter<'a, Revision, Range>,
    },
    Fetched {
        store: &'a dyn DocumentStore,
        pending: Vec<String>,
    },
}

impl Iterator for PreviousDocIds<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            PrevIdsInner::Empty => None,
            PrevIdsInner::Derived { path, ranges } => ranges
                .next()
                .map(|(high, range)| Ok(id::previous_id_for(path, high, range.height))),
            PrevIdsInner::Fetched { store, pending } => {
                while let Some(doc_id) = pending.pop() {
                    match store.find(&doc_id) {
                        Ok(Some(doc)) => {
                            // intermediate documents reference deeper slices
                            for (high, range) in doc.previous_ranges() {
                                pending.push(id::previous_id_for(doc.path(), high, range.height));
                            }
                            return Some(Ok(doc_id));
                        }
                        Ok(None) => continue,
                        Err(err) => return Some(Err(err)),
                    }
                }
                None
            }
        }
    }
}
