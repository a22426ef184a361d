//! Size-tiered merging of layer files.
//!
//! When a tenant's layer holds at least `fan_in` files, the oldest `fan_in`
//! of them are merged into a single file one layer up. For every key the
//! record from the newest source wins, so the merged file is equivalent to
//! replaying its sources in stamp order. The merged file carries the newest
//! source's stamp and is fully written before any source is removed.

use std::{path::PathBuf, time::Instant};

use tabula_types::config::CompactionConfig;
use tracing::{debug, info};

use super::file::{
    LayerFile, Record, RecordMap, list_layer_files, read_layer_file, remove_if_exists,
    write_layer_file,
};
use crate::error::Result;

/// Result of one merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionOutcome {
    /// Tenant whose files were merged.
    pub tenant: String,
    /// Layer the sources were taken from.
    pub source_layer: u32,
    /// Number of files merged.
    pub merged_files: usize,
    /// Records in the output file.
    pub records: usize,
    /// The merged file, at `source_layer + 1`.
    pub output: LayerFile,
}

/// Merges record lists given newest first; the first record seen for a key
/// wins.
///
/// With `drop_tombstones`, deletions are omitted from the result. That is
/// only correct when no older data for the tenant exists outside `sources`.
pub fn merge_newest_wins<I>(sources: I, drop_tombstones: bool) -> RecordMap
where
    I: IntoIterator<Item = Vec<Record>>,
{
    let mut merged = RecordMap::new();
    for records in sources {
        for (key, value) in records {
            merged.entry(key).or_insert(value);
        }
    }
    if drop_tombstones {
        merged.retain(|_, value| value.is_some());
    }
    merged
}

/// Performs merges for one engine root.
pub(crate) struct Compactor {
    root: PathBuf,
    config: CompactionConfig,
    sync_files: bool,
}

impl Compactor {
    pub(crate) fn new(root: PathBuf, config: CompactionConfig, sync_files: bool) -> Self {
        Self { root, config, sync_files }
    }

    pub(crate) fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Returns true if `(tenant, layer)` currently holds enough files to merge.
    pub(crate) fn needs_compaction(&self, tenant: &str, layer: u32) -> Result<bool> {
        if layer >= self.config.max_layer {
            return Ok(false);
        }
        let count = list_layer_files(&self.root, tenant)?
            .into_iter()
            .filter(|file| file.layer == layer)
            .count();
        Ok(count >= self.config.fan_in)
    }

    /// Merges `(tenant, layer)` repeatedly until it holds fewer than `fan_in`
    /// files.
    ///
    /// Layers at or above `max_layer` are left alone.
    pub(crate) fn compact_layer(
        &self,
        tenant: &str,
        layer: u32,
    ) -> Result<Vec<CompactionOutcome>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.merge_once(tenant, layer)? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn merge_once(&self, tenant: &str, layer: u32) -> Result<Option<CompactionOutcome>> {
        if layer >= self.config.max_layer {
            return Ok(None);
        }

        let all_files = list_layer_files(&self.root, tenant)?;
        let mut candidates: Vec<&LayerFile> =
            all_files.iter().filter(|file| file.layer == layer).collect();
        if candidates.len() < self.config.fan_in {
            return Ok(None);
        }
        candidates.sort_by_key(|file| file.stamp);
        candidates.truncate(self.config.fan_in);

        let start = Instant::now();
        let Some(newest) = candidates.last().map(|file| file.stamp) else {
            return Ok(None);
        };

        // Deletions can be discarded once nothing older survives outside the merge.
        let older_elsewhere = all_files.iter().any(|file| {
            file.stamp < newest && !candidates.iter().any(|c| c.path == file.path)
        });

        let mut sources = Vec::with_capacity(candidates.len());
        for file in candidates.iter().rev() {
            sources.push(read_layer_file(&file.path)?);
        }
        let merged = merge_newest_wins(sources, !older_elsewhere);

        let output =
            write_layer_file(&self.root, tenant, newest, layer + 1, &merged, self.sync_files)?;

        for file in &candidates {
            if file.path != output.path {
                remove_if_exists(&file.path)?;
            }
        }

        info!(
            tenant,
            source_layer = layer,
            merged_files = candidates.len(),
            records = merged.len(),
            output = %output.path.display(),
            latency_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Layer compaction complete"
        );
        debug!(tenant, layer = layer + 1, stamp = %newest, "Wrote merged layer file");

        Ok(Some(CompactionOutcome {
            tenant: tenant.to_string(),
            source_layer: layer,
            merged_files: candidates.len(),
            records: merged.len(),
            output,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use tabula_test_utils::TestDir;

    use super::*;
    use crate::layers::stamp::Stamp;

    fn put(key: &str, value: &str) -> Record {
        (key.as_bytes().to_vec(), Some(value.as_bytes().to_vec()))
    }

    fn del(key: &str) -> Record {
        (key.as_bytes().to_vec(), None)
    }

    fn compactor(dir: &TestDir, fan_in: usize, max_layer: u32) -> Compactor {
        let config = CompactionConfig::builder()
            .fan_in(fan_in)
            .max_layer(max_layer)
            .merge_delay(Duration::ZERO)
            .build()
            .expect("valid compaction config");
        Compactor::new(dir.path().to_path_buf(), config, false)
    }

    fn write(dir: &TestDir, tenant: &str, seq: u64, layer: u32, records: Vec<Record>) {
        let map: RecordMap = records.into_iter().collect();
        write_layer_file(dir.path(), tenant, Stamp::new(1, seq), layer, &map, false).unwrap();
    }

    #[test]
    fn test_merge_newest_wins() {
        let newest = vec![put("a", "2"), del("c")];
        let oldest = vec![put("a", "1"), put("b", "3"), put("c", "4")];

        let kept = merge_newest_wins(vec![newest.clone(), oldest.clone()], false);
        assert_eq!(kept.get(b"a".as_slice()), Some(&Some(b"2".to_vec())));
        assert_eq!(kept.get(b"b".as_slice()), Some(&Some(b"3".to_vec())));
        assert_eq!(kept.get(b"c".as_slice()), Some(&None));

        let dropped = merge_newest_wins(vec![newest, oldest], true);
        assert!(!dropped.contains_key(b"c".as_slice()));
        assert_eq!(dropped.len(), 2);
    }

    #[test]
    fn test_compacts_oldest_files_one_layer_up() {
        let dir = TestDir::new();
        write(&dir, "t", 1, 0, vec![put("a", "1")]);
        write(&dir, "t", 2, 0, vec![put("a", "2")]);
        write(&dir, "t", 3, 0, vec![put("b", "3")]);
        write(&dir, "t", 4, 0, vec![put("a", "4")]);

        let compactor = compactor(&dir, 3, 4);
        assert!(compactor.needs_compaction("t", 0).unwrap());
        let outcomes = compactor.compact_layer("t", 0).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].merged_files, 3);
        assert_eq!(outcomes[0].output.stamp, Stamp::new(1, 3));

        let files = list_layer_files(dir.path(), "t").unwrap();
        let layout: Vec<(u32, u64)> = files.iter().map(|f| (f.layer, f.stamp.sequence)).collect();
        assert_eq!(layout, vec![(0, 4), (1, 3)]);
        assert_eq!(read_layer_file(&files[1].path).unwrap(), vec![put("a", "2"), put("b", "3")]);
    }

    #[test]
    fn test_tombstones_kept_while_older_data_remains() {
        let dir = TestDir::new();
        write(&dir, "t", 1, 1, vec![put("a", "old")]);
        write(&dir, "t", 2, 0, vec![put("b", "1")]);
        write(&dir, "t", 3, 0, vec![del("a")]);

        let outcomes = compactor(&dir, 2, 4).compact_layer("t", 0).unwrap();
        let merged = read_layer_file(&outcomes[0].output.path).unwrap();
        assert!(merged.contains(&del("a")));
    }

    #[test]
    fn test_max_layer_is_never_merged() {
        let dir = TestDir::new();
        for seq in 1..=4 {
            write(&dir, "t", seq, 2, vec![put("k", "v")]);
        }
        let compactor = compactor(&dir, 2, 2);
        assert!(!compactor.needs_compaction("t", 2).unwrap());
        assert!(compactor.compact_layer("t", 2).unwrap().is_empty());
        assert_eq!(list_layer_files(dir.path(), "t").unwrap().len(), 4);
    }

    #[test]
    fn test_loops_until_below_fan_in() {
        let dir = TestDir::new();
        for seq in 1..=5 {
            write(&dir, "t", seq, 0, vec![put("k", &seq.to_string())]);
        }
        let outcomes = compactor(&dir, 2, 8).compact_layer("t", 0).unwrap();
        assert_eq!(outcomes.len(), 2);
        let layer0 = list_layer_files(dir.path(), "t")
            .unwrap()
            .into_iter()
            .filter(|f| f.layer == 0)
            .count();
        assert_eq!(layer0, 1);
    }
}
