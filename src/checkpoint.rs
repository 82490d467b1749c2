use parking_lot::Mutex;

use crate::types::Revision;

/// Read side of the checkpoint registry. A checkpoint is a
/// client-registered revision the store must retain; collection is
/// blocked while the oldest checkpoint predates the collection cutoff.
pub trait Checkpoints: Send + Sync {
    /// The oldest revision any registered checkpoint still needs, or
    /// `None` when no checkpoint is registered.
    fn oldest_revision_to_keep(&self) -> Option<Revision>;
}

/// Minimal in-memory checkpoint registry.
#[derive(Debug, Default)]
pub struct CheckpointRegistry {
    revisions: Mutex<Vec<Revision>>,
}

impl CheckpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, revision: Revision) {
        self.revisions.lock().push(revision);
    }

    /// Releases one registration of the given revision.
    pub fn release(&self, revision: &Revision) {
        let mut revisions = self.revisions.lock();
        if let Some(index) = revisions.iter().position(|r| r == revision) {
            revisions.swap_remove(index);
        }
    }
}

impl Checkpoints for CheckpointRegistry {
    fn oldest_revision_to_keep(&self) -> Option<Revision> {
        self.revisions
            .lock()
            .iter()
            .min_by_key(|revision| revision.timestamp_ms())
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_checkpoint_wins() {
        let registry = CheckpointRegistry::new();
        assert_eq!(registry.oldest_revision_to_keep(), None);

        let old = Revision::new(10, 0, 1);
        let new = Revision::new(90, 0, 1);
        registry.register(new);
        registry.register(old);
        assert_eq!(registry.oldest_revision_to_keep(), Some(old));

        registry.release(&old);
        assert_eq!(registry.oldest_revision_to_keep(), Some(new));
    }
}
