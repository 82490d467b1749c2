//! Revision garbage collector for a multi-version document store.
//!
//! Node state lives in one main document per node plus zero or more
//! previous (split) documents carrying historical revisions. The
//! collector removes documents of nodes deleted longer ago than a
//! configured age, together with their previous-document chains, while
//! staying safe against checkpoints, concurrent writers, and
//! cancellation.

#![forbid(unsafe_code)]

pub mod checkpoint;
pub mod clock;
pub mod document;
pub mod gc;
pub mod sort;
pub mod store;
pub mod types;

pub use crate::checkpoint::{CheckpointRegistry, Checkpoints};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::document::{
    DocumentNodeState, NodeDocument, NodeDocumentIdComparator, Range, SplitDocType,
};
pub use crate::gc::{
    DefaultGcSupport, HeadRevisionSource, VersionGarbageCollector, VersionGcStats,
    VersionGcSupport,
};
pub use crate::sort::{ExternalSort, IdComparator};
pub use crate::store::{DocumentCursor, DocumentStore, MemoryDocumentStore};
pub use crate::types::{GcError, Result, Revision, RevisionVector};
