//! In-memory ordered substrate.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::{
    error::Result,
    kv::{BatchOp, DEFAULT_SCAN_CHUNK, Entry, KvStore, ScanRange},
};

/// In-memory ordered key-value store.
///
/// All data is stored in memory and lost when the store is dropped. A batch
/// is applied under a single write lock, so readers see all of it or none
/// of it. Also serves as the read path of [`LayeredKv`](crate::LayeredKv).
pub struct MemoryKv {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    chunk_size: usize,
}

impl MemoryKv {
    /// Create an empty store with the default scan chunk size.
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_SCAN_CHUNK)
    }

    /// Create an empty store fetching `chunk_size` entries per scan chunk.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self { map: RwLock::new(BTreeMap::new()), chunk_size: chunk_size.max(1) }
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Returns true if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Copies out every entry, ascending.
    pub fn entries(&self) -> Vec<Entry> {
        self.map.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub(crate) fn apply(&self, ops: impl IntoIterator<Item = BatchOp>) {
        let mut map = self.map.write();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key, value);
                },
                BatchOp::Delete { key } => {
                    map.remove(&key);
                },
            }
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        self.apply(ops);
        Ok(())
    }

    fn scan_chunk(&self, range: &ScanRange, limit: usize) -> Result<Vec<Entry>> {
        // BTreeMap::range panics on inverted bounds.
        if range.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let map = self.map.read();
        let keys_only = range.is_keys_only();
        let entries = map
            .range::<[u8], _>((range.lower(), range.upper()))
            .take(limit)
            .map(|(k, v)| (k.clone(), if keys_only { Vec::new() } else { v.clone() }))
            .collect();
        Ok(entries)
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}
