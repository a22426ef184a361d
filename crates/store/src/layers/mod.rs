//! Durable layered storage with size-tiered compaction.
//!
//! [`LayeredKv`] serves every read from an in-memory ordered map and makes
//! writes durable by flushing them into flat, per-tenant layer files:
//!
//! 1. `batch` applies mutations to the memtable and queues them as pending.
//! 2. Once `max_pending_ops` are pending, `flush` writes them to a WAL file,
//!    then to one layer-0 file per tenant, then removes the WAL.
//! 3. A tenant layer holding `fan_in` files is merged one layer up by the
//!    [`CompactionScheduler`](scheduler::CompactionScheduler).
//!
//! Opening a root replays every layer file and WAL in stamp order. Replay is
//! idempotent: a file merged but not yet removed, or a WAL whose layer files
//! were already written, yields the same final state.

mod compaction;
mod file;
mod scheduler;
mod stamp;
mod wal;

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

pub use compaction::{CompactionOutcome, merge_newest_wins};
pub use file::{LayerFile, Record, RecordMap, tenant_dir};
use parking_lot::Mutex;
use snafu::ResultExt;
pub use stamp::Stamp;
use tabula_types::config::StoreConfig;
use tracing::{debug, info, warn};

use self::{
    compaction::Compactor,
    file::{list_layer_files, list_tenants, read_layer_file, write_layer_file},
    scheduler::CompactionScheduler,
    stamp::StampClock,
    wal::{WalRecord, list_wal_files, read_wal, remove_wal, write_wal},
};
use crate::{
    error::{ConfigSnafu, IoSnafu, Result},
    kv::{BatchOp, Entry, KvStore, ScanRange},
    memory::MemoryKv,
};

/// Partition used by [`SinglePartition`].
pub const DEFAULT_PARTITION: &str = "_default";

/// Maps a key to the tenant whose layer files hold it.
pub trait Partitioner: Send + Sync {
    /// Returns the tenant (partition) owning `key`.
    fn partition(&self, key: &[u8]) -> String;
}

/// Puts every key in [`DEFAULT_PARTITION`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SinglePartition;

impl Partitioner for SinglePartition {
    fn partition(&self, _key: &[u8]) -> String {
        DEFAULT_PARTITION.to_string()
    }
}

/// A tenant whose layer-0 file could not be written during a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushFailure {
    /// The tenant.
    pub tenant: String,
    /// Number of distinct keys that stay pending.
    pub records: usize,
    /// Rendered cause.
    pub error: String,
}

/// Outcome of a [`LayeredKv::flush`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Stamp of the flushed batch; `None` when nothing was pending.
    pub stamp: Option<Stamp>,
    /// Layer-0 files written.
    pub written: Vec<LayerFile>,
    /// Tenants whose write failed; their mutations remain pending.
    pub failed: Vec<FlushFailure>,
}

impl FlushReport {
    /// Returns true if every tenant was written.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Default)]
struct Pending {
    ops: VecDeque<(String, BatchOp)>,
    /// WAL files whose records are all still in `ops`.
    retained_wals: Vec<PathBuf>,
}

/// Durable ordered key-value store backed by layer files.
///
/// # Durability
///
/// A mutation is visible as soon as `batch` returns and durable once a flush
/// has written it. With the default `max_pending_ops` of 1 every batch is
/// flushed before `batch` returns. Pending mutations are also flushed when
/// the store is dropped.
///
/// # Example
///
/// ```no_run
/// use tabula_store::{BatchOp, KvStore, LayeredKv};
/// use tabula_types::config::StoreConfig;
///
/// let kv = LayeredKv::open("/tmp/tabula", StoreConfig::default())?;
/// kv.batch(vec![BatchOp::put(b"k".to_vec(), b"v".to_vec())])?;
/// assert_eq!(kv.get(b"k")?, Some(b"v".to_vec()));
/// # Ok::<(), tabula_store::Error>(())
/// ```
pub struct LayeredKv {
    root: PathBuf,
    config: StoreConfig,
    memtable: MemoryKv,
    pending: Mutex<Pending>,
    /// Serializes flushes so WAL and layer-0 stamps follow pending order.
    flush_lock: Mutex<()>,
    clock: StampClock,
    partitioner: Arc<dyn Partitioner>,
    scheduler: Arc<CompactionScheduler>,
}

impl LayeredKv {
    /// Opens (or creates) a store at `root` with every key in one partition.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid configuration, `Error::Io` if
    /// the root cannot be prepared, or `Error::Corrupted` if a persisted file
    /// cannot be parsed.
    pub fn open(root: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        Self::open_with_partitioner(root, config, Arc::new(SinglePartition))
    }

    /// Opens (or creates) a store at `root`, grouping keys with `partitioner`.
    ///
    /// # Errors
    ///
    /// See [`LayeredKv::open`].
    pub fn open_with_partitioner(
        root: impl AsRef<Path>,
        config: StoreConfig,
        partitioner: Arc<dyn Partitioner>,
    ) -> Result<Self> {
        config.validate().context(ConfigSnafu)?;
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).context(IoSnafu { path: &root })?;

        let memtable = MemoryKv::with_chunk_size(config.scan_chunk_size);
        let (pending, floor) = recover(&root, &memtable)?;

        let compactor =
            Compactor::new(root.clone(), config.compaction.clone(), config.flush.sync_files);
        let kv = Self {
            root,
            memtable,
            pending: Mutex::new(pending),
            flush_lock: Mutex::new(()),
            clock: StampClock::new(floor),
            partitioner,
            scheduler: Arc::new(CompactionScheduler::new(compactor)),
            config,
        };
        kv.schedule_all_compactions()?;
        Ok(kv)
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Active configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Number of mutations not yet written to a layer file.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().ops.len()
    }

    /// Tenants that currently have a layer directory.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the tenants directory cannot be read.
    pub fn tenants(&self) -> Result<Vec<String>> {
        list_tenants(&self.root)
    }

    /// A tenant's layer files, sorted by layer then stamp.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the tenant directory cannot be read.
    pub fn layer_files(&self, tenant: &str) -> Result<Vec<LayerFile>> {
        list_layer_files(&self.root, tenant)
    }

    /// Writes every pending mutation to disk.
    ///
    /// The batch is logged to a WAL first. Then one layer-0 file is written per
    /// tenant; a tenant whose write fails is reported in
    /// [`FlushReport::failed`] without affecting the others, and its mutations
    /// stay pending (and logged) for the next flush.
    ///
    /// # Errors
    ///
    /// Returns an error only if the WAL cannot be written, in which case every
    /// mutation stays pending.
    pub fn flush(&self) -> Result<FlushReport> {
        let _flushing = self.flush_lock.lock();

        let (ops, retained_wals) = {
            let mut pending = self.pending.lock();
            (
                Vec::from(std::mem::take(&mut pending.ops)),
                std::mem::take(&mut pending.retained_wals),
            )
        };
        if ops.is_empty() {
            self.pending.lock().retained_wals.extend(retained_wals);
            return Ok(FlushReport::default());
        }

        let stamp = self.clock.next();
        let sync = self.config.flush.sync_files;
        let wal = match write_wal(&self.root, stamp, &wal_records(&ops), sync) {
            Ok(path) => path,
            Err(e) => {
                warn!(
                    stamp = %stamp,
                    ops = ops.len(),
                    error = %e,
                    "WAL write failed, keeping mutations pending"
                );
                self.requeue(ops, retained_wals);
                return Err(e);
            },
        };

        let mut report = FlushReport { stamp: Some(stamp), ..FlushReport::default() };
        for (tenant, records) in group_by_tenant(&ops) {
            match write_layer_file(&self.root, &tenant, stamp, 0, &records, sync) {
                Ok(file) => {
                    debug!(tenant, stamp = %stamp, records = records.len(), "Flushed layer-0 file");
                    report.written.push(file);
                },
                Err(e) => {
                    warn!(tenant, stamp = %stamp, error = %e, "Layer-0 write failed");
                    report.failed.push(FlushFailure {
                        tenant,
                        records: records.len(),
                        error: e.to_string(),
                    });
                },
            }
        }

        if report.is_complete() {
            for path in retained_wals.iter().chain(std::iter::once(&wal)) {
                if let Err(e) = remove_wal(path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove WAL");
                }
            }
        } else {
            self.retain_failed(stamp, ops, &report, wal, retained_wals);
        }

        info!(
            stamp = %stamp,
            written = report.written.len(),
            failed = report.failed.len(),
            "Flush complete"
        );

        for file in &report.written {
            self.schedule_if_needed(&file.tenant, 0);
        }
        Ok(report)
    }

    /// Runs every due merge for every tenant on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns the first merge error.
    pub fn compact(&self) -> Result<Vec<CompactionOutcome>> {
        let mut outcomes = Vec::new();
        for tenant in self.tenants()? {
            outcomes.extend(self.scheduler.compact_now(&tenant)?);
        }
        Ok(outcomes)
    }

    /// Waits until no background merge is scheduled or running.
    pub async fn wait_for_compactions(&self) {
        self.scheduler.wait_idle().await;
    }

    /// Returns true when no background merge is scheduled or running.
    pub fn compactions_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    fn schedule_all_compactions(&self) -> Result<()> {
        for tenant in self.tenants()? {
            let layers: HashSet<u32> =
                self.layer_files(&tenant)?.into_iter().map(|file| file.layer).collect();
            for layer in layers {
                self.schedule_if_needed(&tenant, layer);
            }
        }
        Ok(())
    }

    fn schedule_if_needed(&self, tenant: &str, layer: u32) {
        match self.scheduler.needs_compaction(tenant, layer) {
            Ok(true) => self.scheduler.schedule(tenant, layer),
            Ok(false) => {},
            Err(e) => warn!(tenant, layer, error = %e, "Failed to inspect layer files"),
        }
    }

    /// Puts `ops` back at the front of the queue, ahead of newer mutations.
    fn requeue(&self, ops: Vec<(String, BatchOp)>, retained_wals: Vec<PathBuf>) {
        let mut pending = self.pending.lock();
        let newer = std::mem::take(&mut pending.ops);
        pending.ops = ops.into();
        pending.ops.extend(newer);
        pending.retained_wals.extend(retained_wals);
    }

    /// Keeps only the failed tenants' mutations pending and shrinks the WAL to
    /// match. Earlier retained WALs are superseded: everything they logged was
    /// part of this flush.
    fn retain_failed(
        &self,
        stamp: Stamp,
        ops: Vec<(String, BatchOp)>,
        report: &FlushReport,
        wal: PathBuf,
        retained_wals: Vec<PathBuf>,
    ) {
        let failed: HashSet<&str> = report.failed.iter().map(|f| f.tenant.as_str()).collect();
        let kept: Vec<(String, BatchOp)> =
            ops.into_iter().filter(|(tenant, _)| failed.contains(tenant.as_str())).collect();

        let mut retained = vec![wal.clone()];
        match write_wal(&self.root, stamp, &wal_records(&kept), self.config.flush.sync_files) {
            Ok(_) => {
                for path in &retained_wals {
                    if let Err(e) = remove_wal(path) {
                        warn!(path = %path.display(), error = %e, "Failed to remove WAL");
                    }
                }
            },
            Err(e) => {
                // The full WAL still covers the kept mutations.
                warn!(path = %wal.display(), error = %e, "Failed to shrink WAL");
                retained.extend(retained_wals);
            },
        }

        warn!(
            tenants = ?failed,
            kept = kept.len(),
            wal = %wal.display(),
            "Partial flush, retaining WAL for failed tenants"
        );
        self.requeue(kept, retained);
    }
}

impl KvStore for LayeredKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.memtable.get(key)
    }

    fn batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let flush_due = {
            let mut pending = self.pending.lock();
            self.memtable.apply(ops.iter().cloned());
            for op in ops {
                let tenant = self.partitioner.partition(op.key());
                pending.ops.push_back((tenant, op));
            }
            pending.ops.len() >= self.config.flush.max_pending_ops
        };

        // The batch is already visible; a failed flush leaves it pending.
        if flush_due && let Err(e) = self.flush() {
            warn!(error = %e, "Flush after batch failed");
        }
        Ok(())
    }

    fn scan_chunk(&self, range: &ScanRange, limit: usize) -> Result<Vec<Entry>> {
        self.memtable.scan_chunk(range, limit)
    }

    fn chunk_size(&self) -> usize {
        self.memtable.chunk_size()
    }
}

impl Drop for LayeredKv {
    fn drop(&mut self) {
        if self.pending_len() == 0 {
            return;
        }
        match self.flush() {
            Ok(report) if !report.is_complete() => {
                warn!(failed = report.failed.len(), "Pending mutations left in WAL at close");
            },
            Ok(_) => {},
            Err(e) => warn!(error = %e, "Flush at close failed"),
        }
    }
}

fn wal_records(ops: &[(String, BatchOp)]) -> Vec<WalRecord> {
    ops.iter()
        .map(|(tenant, op)| match op {
            BatchOp::Put { key, value } => {
                WalRecord { tenant: tenant.clone(), key: key.clone(), value: Some(value.clone()) }
            },
            BatchOp::Delete { key } => {
                WalRecord { tenant: tenant.clone(), key: key.clone(), value: None }
            },
        })
        .collect()
}

/// Groups ops by tenant; a later op on the same key replaces an earlier one.
fn group_by_tenant(ops: &[(String, BatchOp)]) -> BTreeMap<String, RecordMap> {
    let mut grouped: BTreeMap<String, RecordMap> = BTreeMap::new();
    for (tenant, op) in ops {
        let records = grouped.entry(tenant.clone()).or_default();
        match op {
            BatchOp::Put { key, value } => records.insert(key.clone(), Some(value.clone())),
            BatchOp::Delete { key } => records.insert(key.clone(), None),
        };
    }
    grouped
}

enum Source {
    Layer(LayerFile),
    Wal(PathBuf),
}

/// Rebuilds the memtable from disk and returns the mutations still pending
/// plus the newest stamp seen.
///
/// A WAL record is pending again only if its tenant has no layer file at or
/// after the WAL's stamp; otherwise a flush already covered it.
fn recover(root: &Path, memtable: &MemoryKv) -> Result<(Pending, Stamp)> {
    let mut sources: Vec<(Stamp, u32, Source)> = Vec::new();
    let mut newest_layer: HashMap<String, Stamp> = HashMap::new();
    for tenant in list_tenants(root)? {
        for file in list_layer_files(root, &tenant)? {
            let newest = newest_layer.entry(tenant.clone()).or_default();
            *newest = (*newest).max(file.stamp);
            sources.push((file.stamp, file.layer, Source::Layer(file)));
        }
    }
    for wal in list_wal_files(root)? {
        sources.push((wal.stamp, u32::MAX, Source::Wal(wal.path)));
    }
    sources.sort_by_key(|(stamp, rank, _)| (*stamp, *rank));

    let mut pending = Pending::default();
    let mut floor = Stamp::default();
    let (mut layer_count, mut wal_count) = (0usize, 0usize);
    for (stamp, _, source) in sources {
        floor = floor.max(stamp);
        match source {
            Source::Layer(file) => {
                let ops = read_layer_file(&file.path)?.into_iter().map(record_op);
                memtable.apply(ops);
                layer_count += 1;
            },
            Source::Wal(path) => {
                let mut requeued = 0usize;
                for record in read_wal(&path)? {
                    let op = record_op((record.key, record.value));
                    memtable.apply(std::iter::once(op.clone()));
                    let flushed = newest_layer.get(&record.tenant).is_some_and(|n| *n >= stamp);
                    if !flushed {
                        pending.ops.push_back((record.tenant, op));
                        requeued += 1;
                    }
                }
                if requeued > 0 {
                    pending.retained_wals.push(path);
                } else if let Err(e) = remove_wal(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove flushed WAL");
                }
                wal_count += 1;
            },
        }
    }

    if layer_count + wal_count > 0 {
        info!(
            root = %root.display(),
            layer_files = layer_count,
            wal_files = wal_count,
            keys = memtable.len(),
            pending = pending.ops.len(),
            "Recovered layered store"
        );
    }
    Ok((pending, floor))
}

fn record_op((key, value): Record) -> BatchOp {
    match value {
        Some(value) => BatchOp::Put { key, value },
        None => BatchOp::Delete { key },
    }
}
