//! The key-value capability the table layer is written against.
//!
//! Any ordered store that can answer point reads, apply a list of puts and
//! deletes atomically, and return a bounded slice of a key range in ascending
//! order can back Tabula. Streaming iteration is built on top of the slice
//! primitive by [`RangeIter`], which resumes just past the last key it
//! returned. Each slice is read under the store's own consistency rules, so a
//! long scan is read-consistent per chunk but not isolated from concurrent
//! writes.

use std::{collections::VecDeque, ops::Bound};

use crate::error::Result;

/// Default number of entries fetched per [`KvStore::scan_chunk`] call.
pub const DEFAULT_SCAN_CHUNK: usize = 256;

/// A key-value pair.
pub type Entry = (Vec<u8>, Vec<u8>);

/// One mutation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite `key`.
    Put {
        /// Key to write.
        key: Vec<u8>,
        /// Value to store.
        value: Vec<u8>,
    },
    /// Remove `key` if present.
    Delete {
        /// Key to remove.
        key: Vec<u8>,
    },
}

impl BatchOp {
    /// Creates a put.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOp::Put { key: key.into(), value: value.into() }
    }

    /// Creates a delete.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOp::Delete { key: key.into() }
    }

    /// Returns the key this operation touches.
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// A key range with optional bounds on either side.
///
/// Mirrors the `gte`/`gt`/`lte`/`lt` options of an ordered iterator. Setting a
/// lower bound replaces any previous lower bound, likewise for upper bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRange {
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    keys_only: bool,
}

impl Default for ScanRange {
    fn default() -> Self {
        Self::all()
    }
}

impl ScanRange {
    /// The whole key space.
    pub fn all() -> Self {
        Self { lower: Bound::Unbounded, upper: Bound::Unbounded, keys_only: false }
    }

    /// Every key starting with `prefix`.
    pub fn prefix(prefix: &[u8]) -> Self {
        let upper = match prefix_successor(prefix) {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        Self { lower: Bound::Included(prefix.to_vec()), upper, keys_only: false }
    }

    /// Inclusive lower bound.
    #[must_use]
    pub fn gte(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.lower = Bound::Included(key.into());
        self
    }

    /// Exclusive lower bound.
    #[must_use]
    pub fn gt(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.lower = Bound::Excluded(key.into());
        self
    }

    /// Inclusive upper bound.
    #[must_use]
    pub fn lte(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.upper = Bound::Included(key.into());
        self
    }

    /// Exclusive upper bound.
    #[must_use]
    pub fn lt(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.upper = Bound::Excluded(key.into());
        self
    }

    /// Skip values: entries come back with an empty value.
    #[must_use]
    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    /// Returns true when only keys were requested.
    pub fn is_keys_only(&self) -> bool {
        self.keys_only
    }

    /// Lower bound as borrowed bytes.
    pub fn lower(&self) -> Bound<&[u8]> {
        as_slice_bound(&self.lower)
    }

    /// Upper bound as borrowed bytes.
    pub fn upper(&self) -> Bound<&[u8]> {
        as_slice_bound(&self.upper)
    }

    /// Returns true if `key` falls inside the range.
    pub fn contains(&self, key: &[u8]) -> bool {
        let above = match self.lower() {
            Bound::Included(lower) => key >= lower,
            Bound::Excluded(lower) => key > lower,
            Bound::Unbounded => true,
        };
        let below = match self.upper() {
            Bound::Included(upper) => key <= upper,
            Bound::Excluded(upper) => key < upper,
            Bound::Unbounded => true,
        };
        above && below
    }

    /// Returns true if no key can satisfy both bounds.
    pub fn is_empty(&self) -> bool {
        match (self.lower(), self.upper()) {
            (Bound::Included(lower), Bound::Included(upper)) => lower > upper,
            (Bound::Included(lower), Bound::Excluded(upper))
            | (Bound::Excluded(lower), Bound::Included(upper))
            | (Bound::Excluded(lower), Bound::Excluded(upper)) => lower >= upper,
            _ => false,
        }
    }

    /// The same range, restricted to keys strictly greater than `key`.
    ///
    /// Keeps the original lower bound if it is already past `key`.
    #[must_use]
    pub fn resume_after(&self, key: &[u8]) -> ScanRange {
        let past_key = match self.lower() {
            Bound::Included(lower) => lower > key,
            Bound::Excluded(lower) => lower >= key,
            Bound::Unbounded => false,
        };
        let mut range = self.clone();
        if !past_key {
            range.lower = Bound::Excluded(key.to_vec());
        }
        range
    }
}

fn as_slice_bound(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(key) => Bound::Included(key.as_slice()),
        Bound::Excluded(key) => Bound::Excluded(key.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// Returns the smallest key greater than every key with `prefix`, or `None`
/// when the prefix is all `0xFF` (no such key exists).
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// An ordered key-value store with atomic batches.
///
/// Implementations must apply a [`batch`](KvStore::batch) so that no reader
/// observes part of it, and must return [`scan_chunk`](KvStore::scan_chunk)
/// results in ascending key order.
pub trait KvStore: Send + Sync {
    /// Reads a single key.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage fails.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Applies all operations atomically, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be applied; in that case none
    /// of its operations are visible.
    fn batch(&self, ops: Vec<BatchOp>) -> Result<()>;

    /// Returns up to `limit` entries of `range`, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage fails.
    fn scan_chunk(&self, range: &ScanRange, limit: usize) -> Result<Vec<Entry>>;

    /// Number of entries [`RangeIter`] fetches per chunk.
    fn chunk_size(&self) -> usize {
        DEFAULT_SCAN_CHUNK
    }

    /// Streams `range` in ascending key order.
    fn iter(&self, range: ScanRange) -> RangeIter<'_, Self>
    where
        Self: Sized,
    {
        RangeIter::new(self, range, self.chunk_size())
    }
}

/// Streaming ascending iterator over a [`ScanRange`].
///
/// Refills an internal buffer one chunk at a time; after the first chunk the
/// scan resumes from an exclusive bound just past the last key returned, so
/// entries are never duplicated even if the store changes between chunks.
pub struct RangeIter<'a, S: KvStore> {
    store: &'a S,
    range: ScanRange,
    /// Buffered entries awaiting consumption.
    buffer: VecDeque<Entry>,
    /// The last key returned, used to resume scanning after the buffer drains.
    last_key: Option<Vec<u8>>,
    /// True once the range has been fully consumed (or an error surfaced).
    exhausted: bool,
    chunk_size: usize,
}

impl<'a, S: KvStore> RangeIter<'a, S> {
    fn new(store: &'a S, range: ScanRange, chunk_size: usize) -> Self {
        Self {
            store,
            exhausted: range.is_empty(),
            range,
            buffer: VecDeque::new(),
            last_key: None,
            chunk_size: chunk_size.max(1),
        }
    }

    fn refill(&mut self) -> Result<()> {
        let range = match &self.last_key {
            Some(last) => self.range.resume_after(last),
            None => self.range.clone(),
        };
        if range.is_empty() {
            self.exhausted = true;
            return Ok(());
        }

        let chunk = self.store.scan_chunk(&range, self.chunk_size)?;
        if chunk.len() < self.chunk_size {
            self.exhausted = true;
        }
        self.buffer.extend(chunk);
        Ok(())
    }

    /// Returns the next entry, returning an explicit `Result`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails while refilling the buffer.
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.refill()?;
        }

        match self.buffer.pop_front() {
            Some((key, value)) => {
                self.last_key = Some(key.clone());
                Ok(Some((key, value)))
            },
            None => Ok(None),
        }
    }
}

impl<S: KvStore> Iterator for RangeIter<'_, S> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.exhausted = true;
                self.buffer.clear();
                Some(Err(e))
            },
        }
    }
}
