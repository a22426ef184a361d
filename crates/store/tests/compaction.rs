//! Flush and size-tiered compaction tests for the layered engine.
//!
//! Each test drives [`LayeredKv`] through its public API and inspects the
//! resulting layer files on disk.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use proptest::prelude::*;
use tabula_store::{
    BatchOp, KvStore, LayeredKv, Partitioner, ScanRange,
    layers::{DEFAULT_PARTITION, tenant_dir},
};
use tabula_test_utils::{TestDir, assert_eventually, strategies, test_store_config};
use tabula_types::config::{CompactionConfig, StoreConfig};

/// Partitions keys of the form `<tenant>/<rest>` by the part before `/`.
struct SlashPartition;

impl Partitioner for SlashPartition {
    fn partition(&self, key: &[u8]) -> String {
        let end = key.iter().position(|b| *b == b'/').unwrap_or(key.len());
        String::from_utf8_lossy(&key[..end]).into_owned()
    }
}

fn open(dir: &TestDir) -> LayeredKv {
    LayeredKv::open_with_partitioner(dir.path(), test_store_config(), Arc::new(SlashPartition))
        .expect("open layered store")
}

fn put(kv: &LayeredKv, key: &str, value: &str) {
    kv.batch(vec![BatchOp::put(key.as_bytes(), value.as_bytes())]).expect("batch");
}

fn layout(kv: &LayeredKv, tenant: &str) -> Vec<u32> {
    kv.layer_files(tenant).unwrap().into_iter().map(|f| f.layer).collect()
}

#[test]
fn test_three_flushes_merge_newest_wins() {
    let dir = TestDir::new();
    let kv = open(&dir);

    put(&kv, "t/a", "1");
    put(&kv, "t/a", "2");
    put(&kv, "t/b", "3");

    // No runtime: the merge ran inline during the third flush.
    let files = kv.layer_files("t").unwrap();
    assert_eq!(files.len(), 1, "sources should be deleted after the merge");
    assert_eq!(files[0].layer, 1);

    let contents = std::fs::read_to_string(&files[0].path).unwrap();
    let expected = format!(
        "{} {}\n{} {}\n",
        hex(b"t/a"),
        hex(b"2"),
        hex(b"t/b"),
        hex(b"3"),
    );
    assert_eq!(contents, expected);
}

#[test]
fn test_compaction_cascades_to_higher_layers() {
    let dir = TestDir::new();
    let kv = open(&dir);

    for i in 0..9 {
        put(&kv, "t/k", &i.to_string());
    }

    assert_eq!(layout(&kv, "t"), vec![2]);
    assert_eq!(kv.get(b"t/k").unwrap(), Some(b"8".to_vec()));
}

#[test]
fn test_tenants_compact_independently() {
    let dir = TestDir::new();
    let kv = open(&dir);

    for i in 0..3 {
        put(&kv, "acme/k", &i.to_string());
    }
    put(&kv, "globex/k", "x");

    assert_eq!(layout(&kv, "acme"), vec![1]);
    assert_eq!(layout(&kv, "globex"), vec![0]);
    assert!(tenant_dir(dir.path(), "acme").is_dir());
}

#[test]
fn test_one_batch_spanning_tenants_writes_one_file_each() {
    let dir = TestDir::new();
    let kv = open(&dir);

    kv.batch(vec![
        BatchOp::put(b"acme/a".to_vec(), b"1".to_vec()),
        BatchOp::put(b"globex/a".to_vec(), b"2".to_vec()),
        BatchOp::put(b"acme/b".to_vec(), b"3".to_vec()),
    ])
    .unwrap();

    let acme = kv.layer_files("acme").unwrap();
    let globex = kv.layer_files("globex").unwrap();
    assert_eq!(acme.len(), 1);
    assert_eq!(globex.len(), 1);
    assert_eq!(acme[0].stamp, globex[0].stamp, "one flush stamps every tenant alike");
    assert!(dir.file_names("wal").is_empty(), "WAL is removed after a complete flush");
}

#[test]
fn test_partial_flush_failure_retains_wal_for_failed_tenant() {
    let dir = TestDir::new();
    let kv = open(&dir);

    // A regular file where globex's layer directory should go.
    let blocked = tenant_dir(dir.path(), "globex");
    let blocked = blocked.strip_prefix(dir.path()).unwrap().to_path_buf();
    dir.block(&blocked);

    kv.batch(vec![
        BatchOp::put(b"acme/a".to_vec(), b"1".to_vec()),
        BatchOp::put(b"globex/a".to_vec(), b"2".to_vec()),
    ])
    .unwrap();

    assert_eq!(kv.layer_files("acme").unwrap().len(), 1, "healthy tenant still flushed");
    assert_eq!(kv.pending_len(), 1, "failed tenant stays pending");
    assert_eq!(kv.get(b"globex/a").unwrap(), Some(b"2".to_vec()), "still readable");

    let wal_files = dir.file_names("wal");
    assert_eq!(wal_files.len(), 1);
    let wal = std::fs::read_to_string(dir.join("wal").join(&wal_files[0])).unwrap();
    assert_eq!(wal.lines().count(), 1, "WAL shrunk to the failed tenant");
    assert!(wal.starts_with(&hex(b"globex")));

    // Once the directory can be created the retry succeeds and the WAL goes away.
    dir.unblock(&blocked);
    let report = kv.flush().unwrap();
    assert!(report.is_complete());
    assert_eq!(report.written.len(), 1);
    assert_eq!(kv.pending_len(), 0);
    assert!(dir.file_names("wal").is_empty());
}

#[test]
fn test_flush_report_lists_failures() {
    let dir = TestDir::new();
    let mut config = test_store_config();
    config.flush.max_pending_ops = 100;
    let kv =
        LayeredKv::open_with_partitioner(dir.path(), config, Arc::new(SlashPartition)).unwrap();

    let blocked = tenant_dir(dir.path(), "bad");
    dir.block(blocked.strip_prefix(dir.path()).unwrap());

    put(&kv, "good/a", "1");
    put(&kv, "bad/a", "2");
    put(&kv, "bad/b", "3");
    assert_eq!(kv.pending_len(), 3);

    let report = kv.flush().unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].tenant, "bad");
    assert_eq!(report.failed[0].records, 2);
    assert_eq!(report.written.len(), 1);
    assert_eq!(report.written[0].tenant, "good");
}

#[test]
fn test_empty_flush_is_a_no_op() {
    let dir = TestDir::new();
    let kv = open(&dir);
    let report = kv.flush().unwrap();
    assert_eq!(report.stamp, None);
    assert!(report.written.is_empty());
    assert!(kv.tenants().unwrap().is_empty());
}

#[test]
fn test_single_partition_by_default() {
    let dir = TestDir::new();
    let kv = LayeredKv::open(dir.path(), test_store_config()).unwrap();
    put(&kv, "x/1", "a");
    put(&kv, "y/1", "b");
    assert_eq!(kv.tenants().unwrap(), vec![DEFAULT_PARTITION.to_string()]);
}

#[test]
fn test_max_layer_stops_cascade() {
    let dir = TestDir::new();
    let mut config = test_store_config();
    config.compaction.max_layer = 1;
    let kv =
        LayeredKv::open_with_partitioner(dir.path(), config, Arc::new(SlashPartition)).unwrap();

    for i in 0..9 {
        put(&kv, "t/k", &i.to_string());
    }
    assert_eq!(layout(&kv, "t"), vec![1, 1, 1]);
}

#[test]
fn test_reopen_runs_due_merges() {
    let dir = TestDir::new();
    let mut config = test_store_config();
    config.compaction.fan_in = 2;
    {
        // Write files with compaction out of reach, then reopen with it enabled.
        let mut no_merge = config.clone();
        no_merge.compaction.fan_in = 100;
        let kv = LayeredKv::open_with_partitioner(dir.path(), no_merge, Arc::new(SlashPartition))
            .unwrap();
        for i in 0..4 {
            put(&kv, "t/k", &i.to_string());
        }
        assert_eq!(layout(&kv, "t"), vec![0, 0, 0, 0]);
    }

    let kv =
        LayeredKv::open_with_partitioner(dir.path(), config, Arc::new(SlashPartition)).unwrap();
    // Opening outside a runtime already ran the due merges inline.
    assert_eq!(layout(&kv, "t"), vec![2]);
    assert!(kv.compact().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_background_compaction_after_delay() {
    let dir = TestDir::new();
    let config = StoreConfig {
        compaction: CompactionConfig {
            fan_in: 3,
            merge_delay: Duration::from_millis(20),
            max_layer: 8,
        },
        ..test_store_config()
    };
    let kv = Arc::new(
        LayeredKv::open_with_partitioner(dir.path(), config, Arc::new(SlashPartition)).unwrap(),
    );

    put(&kv, "t/a", "1");
    put(&kv, "t/a", "2");
    put(&kv, "t/b", "3");

    let probe = Arc::clone(&kv);
    let merged = assert_eventually(Duration::from_secs(5), || {
        probe.layer_files("t").map(|files| files.len() == 1).unwrap_or(false)
    })
    .await;
    assert!(merged, "background merge should collapse three files into one");

    kv.wait_for_compactions().await;
    assert!(kv.compactions_idle());
    assert_eq!(layout(&kv, "t"), vec![1]);
    assert_eq!(kv.get(b"t/a").unwrap(), Some(b"2".to_vec()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_schedules_do_not_lose_files() {
    let dir = TestDir::new();
    let kv = Arc::new(open(&dir));

    let mut handles = Vec::new();
    for worker in 0..4 {
        let kv = Arc::clone(&kv);
        handles.push(tokio::task::spawn_blocking(move || {
            for i in 0..6 {
                put(&kv, "t/k", &format!("{worker}-{i}"));
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    kv.wait_for_compactions().await;

    // Every layer ends below fan-in once merges settle.
    let files = kv.layer_files("t").unwrap();
    let mut per_layer: BTreeMap<u32, usize> = BTreeMap::new();
    for file in &files {
        *per_layer.entry(file.layer).or_default() += 1;
    }
    assert!(per_layer.values().all(|count| *count < 3), "layout {per_layer:?}");

    // The reopened store agrees with memory.
    let live = kv.get(b"t/k").unwrap();
    drop(kv);
    let reopened = open(&dir);
    assert_eq!(reopened.get(b"t/k").unwrap(), live);
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Compacted on-disk state equals the in-memory state, regardless of how
    /// mutations were grouped into batches.
    #[test]
    fn prop_compaction_is_deterministic(batches in strategies::arb_kv_batches()) {
        let dir = TestDir::new();
        let mut expected: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        {
            let kv = LayeredKv::open(dir.path(), test_store_config()).unwrap();
            for batch in &batches {
                let ops = batch
                    .iter()
                    .map(|(key, value)| match value {
                        Some(value) => {
                            expected.insert(key.clone(), value.clone());
                            BatchOp::put(key.clone(), value.clone())
                        },
                        None => {
                            expected.remove(key);
                            BatchOp::delete(key.clone())
                        },
                    })
                    .collect();
                kv.batch(ops).unwrap();
            }
            kv.compact().unwrap();
        }

        let reopened = LayeredKv::open(dir.path(), test_store_config()).unwrap();
        let actual: BTreeMap<Vec<u8>, Vec<u8>> =
            reopened.iter(ScanRange::all()).map(|entry| entry.unwrap()).collect();
        prop_assert_eq!(actual, expected);
    }
}
