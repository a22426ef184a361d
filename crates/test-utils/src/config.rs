//! Test configuration helpers.
//!
//! Provides sensible default configurations for tests, centralizing
//! magic values that would otherwise be scattered across test modules.

use std::time::Duration;

use tabula_types::config::{CompactionConfig, FlushConfig, QueryConfig, StoreConfig};

/// Returns a store configuration suitable for tests.
///
/// Uses small values for fast, predictable test execution:
/// - `scan_chunk_size`: 4 (so scans cross several chunks)
/// - `max_pending_ops`: 1 (every batch is flushed immediately)
/// - `sync_files`: false (no fsync on tmpfs)
/// - `fan_in`: 3, `merge_delay`: 0
#[must_use]
pub fn test_store_config() -> StoreConfig {
    StoreConfig {
        scan_chunk_size: 4,
        flush: FlushConfig { max_pending_ops: 1, sync_files: false },
        compaction: CompactionConfig {
            fan_in: 3,
            merge_delay: Duration::ZERO,
            max_layer: 8,
        },
    }
}

/// Returns a query configuration with a small join build limit.
#[must_use]
pub fn test_query_config() -> QueryConfig {
    QueryConfig { max_join_build_rows: 1_000 }
}
