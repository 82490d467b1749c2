use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Error type for revision garbage collection.
#[derive(Debug, Error)]
pub enum GcError {
    /// A second collection run was started while one is active.
    #[error("revision garbage collection is already running")]
    AlreadyRunning,
    /// The document store failed a read or write.
    #[error("document store: {0}")]
    Store(String),
    /// Spill or merge I/O in the external sort failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GcError>;

/// Identifier of the cluster node that issued a revision.
pub type ClusterId = u32;

/// A revision issued by a cluster node: a millisecond timestamp plus a
/// counter to disambiguate revisions created within the same millisecond.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Revision {
    timestamp_ms: i64,
    counter: u32,
    cluster_id: ClusterId,
}

impl Revision {
    pub fn new(timestamp_ms: i64, counter: u32, cluster_id: ClusterId) -> Self {
        Self {
            timestamp_ms,
            counter,
            cluster_id,
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    /// Compares two revisions from the same cluster node by age.
    /// Callers must not use this across cluster ids; revisions from
    /// different nodes are not totally ordered in time.
    pub fn compare_same_cluster(&self, other: &Revision) -> Ordering {
        self.timestamp_ms
            .cmp(&other.timestamp_ms)
            .then(self.counter.cmp(&other.counter))
    }

    /// Human-readable rendering used in log output.
    pub fn to_readable_string(&self) -> String {
        format!(
            "revision {} (t {} ms, counter {}, cluster {})",
            self, self.timestamp_ms, self.counter, self.cluster_id
        )
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "r{:x}-{:x}-{:x}",
            self.timestamp_ms, self.counter, self.cluster_id
        )
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp_ms
            .cmp(&other.timestamp_ms)
            .then(self.counter.cmp(&other.counter))
            .then(self.cluster_id.cmp(&other.cluster_id))
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The set of newest revisions known per cluster node. A revision is
/// visible at the vector if the vector carries an entry for its cluster
/// that is at least as new.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RevisionVector {
    revisions: BTreeMap<ClusterId, Revision>,
}

impl RevisionVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the entry for the revision's cluster if the given revision
    /// is newer than the one currently held.
    pub fn update(&mut self, revision: Revision) {
        let entry = self.revisions.entry(revision.cluster_id());
        let current = entry.or_insert(revision);
        if current.compare_same_cluster(&revision) == Ordering::Less {
            *current = revision;
        }
    }

    pub fn revision(&self, cluster_id: ClusterId) -> Option<&Revision> {
        self.revisions.get(&cluster_id)
    }

    pub fn is_visible(&self, revision: &Revision) -> bool {
        match self.revisions.get(&revision.cluster_id()) {
            Some(head) => revision.compare_same_cluster(head) != Ordering::Greater,
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Revision> {
        self.revisions.values()
    }
}

impl FromIterator<Revision> for RevisionVector {
    fn from_iter<T: IntoIterator<Item = Revision>>(iter: T) -> Self {
        let mut vector = RevisionVector::new();
        for revision in iter {
            vector.update(revision);
        }
        vector
    }
}

impl fmt::Display for RevisionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for revision in self.revisions.values() {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{revision}")?;
            first = false;
        }
        Ok(())
    }
}
