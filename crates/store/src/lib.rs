//! tabula-store: the ordered key-value substrate underneath Tabula.
//!
//! The table layer is written against the [`KvStore`] capability: point
//! `get`, an atomic multi-key `batch`, and ascending range iteration. Two
//! implementations are provided:
//!
//! - [`MemoryKv`]: an ordered in-memory map, used for tests and as the
//!   read path of the layered engine.
//! - [`LayeredKv`]: durable storage that buffers writes, flushes them into
//!   per-tenant layer-0 files behind a write-ahead log, and merges layers with
//!   size-tiered compaction.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              KvStore capability              │
//! │        (get, batch, iter / scan_chunk)       │
//! └───────────────┬─────────────────────────────┘
//!                 │
//! ┌───────────────▼─────────────────────────────┐
//! │  LayeredKv: memtable (MemoryKv) + pending    │
//! └───────────────┬─────────────────────────────┘
//!                 │ flush
//! ┌───────────────▼─────────────────────────────┐
//! │  WAL batch → layer-0 file per tenant         │
//! └───────────────┬─────────────────────────────┘
//!                 │ fan-in reached
//! ┌───────────────▼─────────────────────────────┐
//! │  CompactionScheduler (single-flight)         │
//! │  oldest N files at L → one file at L+1       │
//! └─────────────────────────────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod kv;
pub mod layers;
pub mod memory;

pub use error::{Error, Result};
pub use kv::{BatchOp, Entry, KvStore, RangeIter, ScanRange, prefix_successor};
pub use layers::{
    CompactionOutcome, FlushFailure, FlushReport, LayerFile, LayeredKv, Partitioner, Record,
    RecordMap, SinglePartition, Stamp, merge_newest_wins,
};
pub use memory::MemoryKv;
