//! Document-store contract consumed by the garbage collector, plus an
//! in-memory reference implementation used by the test suite.

pub mod memory;

pub use memory::MemoryDocumentStore;

use crate::document::NodeDocument;
use crate::types::Result;

/// Forward-only cursor over documents in the nodes collection. Dropping
/// the cursor releases whatever the store holds for it.
pub type DocumentCursor<'a> = Box<dyn Iterator<Item = Result<NodeDocument>> + 'a>;

/// Operations the collector needs from the nodes collection of a
/// document store. Implementations may parallelize internally; the
/// collector only relies on `remove_if_modified` being atomic per entry.
pub trait DocumentStore: Send + Sync {
    /// Streams every document whose `_modified` (seconds) lies below the
    /// cutoff, in unspecified order. Stores may return false positives;
    /// the collector re-verifies each candidate.
    fn query_modified_before(&self, cutoff_secs: i64) -> Result<DocumentCursor<'_>>;

    /// Point lookup by document id.
    fn find(&self, id: &str) -> Result<Option<NodeDocument>>;

    /// Removes each entry only if its current `_modified` equals the
    /// recorded value. Each entry's check-and-delete is atomic; the
    /// batch as a whole is not transactional. Returns the number of
    /// documents removed.
    fn remove_if_modified(&self, batch: &[(String, i64)]) -> Result<usize>;

    /// Unconditional bulk delete. Returns the number of documents that
    /// existed and were removed.
    fn remove(&self, ids: &[String]) -> Result<usize>;
}
