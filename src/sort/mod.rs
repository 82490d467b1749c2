//! External-memory sort for document id strings.
//!
//! Ids are buffered in memory and spilled to sorted runs on disk once the
//! buffer grows past the configured threshold. Reading the sorted result
//! merges the runs and the remaining buffer through a min-heap, yielding a
//! lazy single-pass sequence.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::types::Result;

/// Total, deterministic order over id strings. Injected into
/// [`ExternalSort`] so callers choose the on-disk ordering.
pub trait IdComparator: Send + Sync {
    fn compare(&self, a: &str, b: &str) -> Ordering;
}

/// Append-only id collection that sorts without holding every element in
/// memory. Spill runs live in the scratch directory and are removed on
/// [`close`](ExternalSort::close) or drop.
pub struct ExternalSort<C> {
    cmp: Arc<C>,
    overflow_threshold: usize,
    scratch_dir: PathBuf,
    buffer: Vec<String>,
    runs: Vec<NamedTempFile>,
    total: u64,
    sorted: bool,
}

impl<C: IdComparator> ExternalSort<C> {
    pub fn new(overflow_threshold: usize, cmp: C, scratch_dir: PathBuf) -> Self {
        Self {
            cmp: Arc::new(cmp),
            overflow_threshold,
            scratch_dir,
            buffer: Vec::new(),
            runs: Vec::new(),
            total: 0,
            sorted: false,
        }
    }

    /// Appends an id. Spills the buffer to a sorted run once it exceeds
    /// the overflow threshold.
    pub fn add(&mut self, id: String) -> Result<()> {
        self.buffer.push(id);
        self.total += 1;
        self.sorted = false;
        if self.buffer.len() > self.overflow_threshold {
            self.spill()?;
        }
        Ok(())
    }

    /// Number of ids appended so far, including spilled ones.
    pub fn len(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Finalizes the in-memory tail. Idempotent.
    pub fn sort(&mut self) {
        if !self.sorted {
            let cmp = Arc::clone(&self.cmp);
            self.buffer.sort_by(|a, b| cmp.compare(a, b));
            self.sorted = true;
        }
    }

    /// Returns a lazy, single-pass ascending sequence over all appended
    /// ids. Sorts the in-memory tail first if needed.
    pub fn iter(&mut self) -> Result<SortedIds<'_, C>> {
        self.sort();
        for run in &mut self.runs {
            run.as_file_mut().seek(SeekFrom::Start(0))?;
        }
        let cmp = Arc::clone(&self.cmp);
        let mut readers: Vec<BufReader<&File>> = self
            .runs
            .iter()
            .map(|run| BufReader::new(run.as_file()))
            .collect();
        let memory_source = readers.len();
        let mut heap = BinaryHeap::new();
        for (source, reader) in readers.iter_mut().enumerate() {
            if let Some(id) = read_record(reader)? {
                heap.push(HeapEntry {
                    id,
                    source,
                    cmp: Arc::clone(&cmp),
                });
            }
        }
        let mut memory = self.buffer.iter();
        if let Some(id) = memory.next() {
            heap.push(HeapEntry {
                id: id.clone(),
                source: memory_source,
                cmp: Arc::clone(&cmp),
            });
        }
        Ok(SortedIds {
            readers,
            memory,
            memory_source,
            heap,
            cmp,
        })
    }

    /// Releases the spill files. Close-time errors are logged, not
    /// surfaced; the collection is unusable afterwards.
    pub fn close(&mut self) {
        self.buffer.clear();
        for run in self.runs.drain(..) {
            if let Err(err) = run.close() {
                warn!(error = %err, "sort.close.failed");
            }
        }
    }

    fn spill(&mut self) -> Result<()> {
        let cmp = Arc::clone(&self.cmp);
        self.buffer.sort_by(|a, b| cmp.compare(a, b));
        let mut run = NamedTempFile::new_in(&self.scratch_dir)?;
        {
            let mut writer = BufWriter::new(run.as_file_mut());
            for id in &self.buffer {
                write_record(&mut writer, id)?;
            }
            writer.flush()?;
        }
        debug!(
            ids = self.buffer.len(),
            runs = self.runs.len() + 1,
            "sort.spill"
        );
        self.buffer.clear();
        self.runs.push(run);
        Ok(())
    }
}

impl<C> Drop for ExternalSort<C> {
    fn drop(&mut self) {
        for run in self.runs.drain(..) {
            if let Err(err) = run.close() {
                warn!(error = %err, "sort.close.failed");
            }
        }
    }
}

/// Lazy merge of the spill runs and the sorted in-memory tail.
pub struct SortedIds<'a, C> {
    readers: Vec<BufReader<&'a File>>,
    memory: std::slice::Iter<'a, String>,
    memory_source: usize,
    heap: BinaryHeap<HeapEntry<C>>,
    cmp: Arc<C>,
}

impl<C: IdComparator> Iterator for SortedIds<'_, C> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.heap.pop()?;
        let refill = if entry.source == self.memory_source {
            Ok(self.memory.next().cloned())
        } else {
            read_record(&mut self.readers[entry.source])
        };
        match refill {
            Ok(Some(id)) => self.heap.push(HeapEntry {
                id,
                source: entry.source,
                cmp: Arc::clone(&self.cmp),
            }),
            Ok(None) => {}
            Err(err) => return Some(Err(err)),
        }
        Some(Ok(entry.id))
    }
}

struct HeapEntry<C> {
    id: String,
    source: usize,
    cmp: Arc<C>,
}

impl<C: IdComparator> PartialEq for HeapEntry<C> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<C: IdComparator> Eq for HeapEntry<C> {}

impl<C: IdComparator> PartialOrd for HeapEntry<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C: IdComparator> Ord for HeapEntry<C> {
    // Reversed so the max-heap pops the smallest id; equal ids pop the
    // lowest source first, which keeps the merge deterministic.
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp
            .compare(&self.id, &other.id)
            .then(self.source.cmp(&other.source))
            .reverse()
    }
}

fn write_record<W: Write>(writer: &mut W, id: &str) -> Result<()> {
    let bytes = id.as_bytes();
    writer.write_all(&(bytes.len() as u32).to_be_bytes())?;
    writer.write_all(bytes)?;
    Ok(())
}

fn read_record<R: Read>(reader: &mut R) -> Result<Option<String>> {
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let mut bytes = vec![0u8; u32::from_be_bytes(len) as usize];
    reader.read_exact(&mut bytes)?;
    let id = String::from_utf8(bytes)
        .map_err(|err| std::io::Error::new(ErrorKind::InvalidData, err))?;
    Ok(Some(id))
}
