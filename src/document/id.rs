//! Identifier helpers for node documents.
//!
//! A document id encodes the depth of its path: `"<depth>:<path>"`, where
//! depth is the number of path segments. The depth prefix lets the store
//! cluster documents by tree level and gives the garbage collector a cheap
//! validity check for candidate ids.

use std::cmp::Ordering;

use crate::sort::IdComparator;
use crate::types::Revision;

/// Returns the number of segments of an absolute path (`"/"` has depth 0).
pub fn path_depth(path: &str) -> u32 {
    if path == "/" {
        return 0;
    }
    path.split('/').skip(1).filter(|s| !s.is_empty()).count() as u32
}

/// Builds the document id for an absolute path.
pub fn id_from_path(path: &str) -> String {
    format!("{}:{}", path_depth(path), path)
}

/// Parses the depth prefix of a document id. Returns `None` when the id
/// does not follow the `"<depth>:<path>"` form.
pub fn depth_from_id(id: &str) -> Option<u32> {
    let (prefix, path) = id.split_once(':')?;
    if path.is_empty() || prefix.is_empty() {
        return None;
    }
    prefix.parse().ok()
}

/// Returns the path portion of a document id.
pub fn path_from_id(id: &str) -> Option<&str> {
    depth_from_id(id)?;
    id.split_once(':').map(|(_, path)| path)
}

/// Derives the path of a previous document from its main document's
/// path, the high revision of the covered range, and the split height.
pub fn previous_path_for(path: &str, revision: &Revision, height: u32) -> String {
    if path == "/" {
        format!("/p/{revision}/{height}")
    } else {
        format!("{path}/p/{revision}/{height}")
    }
}

/// Derives the id of a previous document. The derivation is purely
/// syntactic; no store read is required.
pub fn previous_id_for(path: &str, revision: &Revision, height: u32) -> String {
    id_from_path(&previous_path_for(path, revision, height))
}

/// Derives the id of the document owning a previous document, given the
/// previous document's path (`"<owner>/p/<revision>/<height>"`). Returns
/// `None` for paths that do not follow the previous-path form.
pub fn owner_id_for_previous_path(path: &str) -> Option<String> {
    let segments: Vec<&str> = path.split('/').skip(1).collect();
    let n = segments.len();
    if n < 3 || segments[n - 3] != "p" {
        return None;
    }
    let owner = &segments[..n - 3];
    let owner_path = if owner.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", owner.join("/"))
    };
    Some(id_from_path(&owner_path))
}

/// Tags a candidate document id with the `_modified` value observed at
/// collection time. The suffix is split off again with
/// [`split_gc_id`] when the conditional delete is issued.
pub fn gc_id(id: &str, modified: i64) -> String {
    let tagged = format!("{id}/{modified}");
    debug_assert_eq!(
        split_gc_id(&tagged).map(|(head, _)| head),
        Some(id),
        "modified suffix must split off cleanly"
    );
    tagged
}

/// Splits a composite GC id into document id and `_modified` suffix.
/// The suffix is everything after the last `'/'`; it is returned raw so
/// the caller decides how to treat a non-numeric value.
pub fn split_gc_id(gc_id: &str) -> Option<(&str, &str)> {
    gc_id.rsplit_once('/')
}

/// Total order over document ids used by the external sorts: deeper
/// documents first, ties broken by the full id. Ids without a parsable
/// depth prefix sort after all well-formed ids.
#[derive(Clone, Copy, Debug, Default)]
pub struct NodeDocumentIdComparator;

impl IdComparator for NodeDocumentIdComparator {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        match (depth_from_id(a), depth_from_id(b)) {
            (Some(da), Some(db)) => db.cmp(&da).then_with(|| a.cmp(b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.cmp(b),
        }
    }
}
