use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::document::NodeDocument;
use crate::store::{DocumentCursor, DocumentStore};
use crate::types::Result;

/// Callback invoked at the start of every conditional remove; see
/// [`MemoryDocumentStore::set_remove_hook`].
pub type RemoveHook = Box<dyn FnMut(&MemoryDocumentStore, u64) + Send>;

/// In-memory nodes collection. Backs the test suite and serves as the
/// reference semantics for `remove_if_modified`: the modified check and
/// the delete happen under one write lock, entry by entry.
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: RwLock<BTreeMap<String, NodeDocument>>,
    find_calls: AtomicU64,
    conditional_remove_calls: AtomicU64,
    remove_hook: Mutex<Option<RemoveHook>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a document.
    pub fn create(&self, doc: NodeDocument) {
        self.docs.write().insert(doc.id().to_string(), doc);
    }

    /// Bumps a document's `_modified`, simulating a concurrent writer.
    /// Returns false when the document does not exist.
    pub fn set_modified(&self, id: &str, modified_secs: i64) -> bool {
        match self.docs.write().get_mut(id) {
            Some(doc) => {
                doc.set_modified(modified_secs);
                true
            }
            None => false,
        }
    }

    /// Reads a document without counting as a `find` call.
    pub fn peek(&self, id: &str) -> Option<NodeDocument> {
        self.docs.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.docs.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    /// Number of `find` calls issued through the store contract.
    pub fn find_calls(&self) -> u64 {
        self.find_calls.load(Ordering::Relaxed)
    }

    /// Installs a hook invoked at the start of every conditional remove
    /// with the 1-based invocation count. Tests use this to interleave
    /// writes or cancellation with a running collection.
    pub fn set_remove_hook(&self, hook: RemoveHook) {
        *self.remove_hook.lock() = Some(hook);
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn query_modified_before(&self, cutoff_secs: i64) -> Result<DocumentCursor<'_>> {
        let matches: Vec<NodeDocument> = self
            .docs
            .read()
            .values()
            .filter(|doc| doc.modified() < cutoff_secs)
            .cloned()
            .collect();
        Ok(Box::new(matches.into_iter().map(Ok)))
    }

    fn find(&self, id: &str) -> Result<Option<NodeDocument>> {
        self.find_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.docs.read().get(id).cloned())
    }

    fn remove_if_modified(&self, batch: &[(String, i64)]) -> Result<usize> {
        let call = self.conditional_remove_calls.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(hook) = self.remove_hook.lock().as_mut() {
            hook(self, call);
        }
        let mut docs = self.docs.write();
        let mut removed = 0;
        for (id, modified) in batch {
            if docs.get(id).is_some_and(|doc| doc.modified() == *modified) {
                docs.remove(id);
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn remove(&self, ids: &[String]) -> Result<usize> {
        let mut docs = self.docs.write();
        let mut removed = 0;
        for id in ids {
            if docs.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditional_remove_checks_modified() {
        let store = MemoryDocumentStore::new();
        store.create(NodeDocument::new("/a", 100));
        store.create(NodeDocument::new("/b", 100));

        let batch = vec![
            ("1:/a".to_string(), 100),
            ("1:/b".to_string(), 99),
            ("1:/missing".to_string(), 1),
        ];
        assert_eq!(store.remove_if_modified(&batch).unwrap(), 1);
        assert!(!store.contains("1:/a"));
        assert!(store.contains("1:/b"));
    }

    #[test]
    fn query_filters_on_modified() {
        let store = MemoryDocumentStore::new();
        store.create(NodeDocument::new("/old", 10));
        store.create(NodeDocument::new("/new", 500));

        let cursor = store.query_modified_before(100).unwrap();
        let ids: Vec<String> = cursor.map(|doc| doc.unwrap().id().to_string()).collect();
        assert_eq!(ids, vec!["1:/old".to_string()]);
    }

    #[test]
    fn remove_counts_existing_only() {
        let store = MemoryDocumentStore::new();
        store.create(NodeDocument::new("/a", 1));
        let ids = vec!["1:/a".to_string(), "1:/gone".to_string()];
        assert_eq!(store.remove(&ids).unwrap(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn hook_runs_before_each_conditional_remove() {
        let store = MemoryDocumentStore::new();
        store.create(NodeDocument::new("/a", 100));
        store.set_remove_hook(Box::new(|store, call| {
            if call == 1 {
                store.set_modified("1:/a", 777);
            }
        }));
        let batch = vec![("1:/a".to_string(), 100)];
        assert_eq!(store.remove_if_modified(&batch).unwrap(), 0);
        assert!(store.contains("1:/a"));
    }
}
