//! The table store: tables, rows, and indexes over one [`KvStore`].

use std::{collections::HashSet, sync::Arc, time::Instant};

use snafu::{OptionExt, ResultExt, ensure};
use tabula_store::KvStore;
use tabula_types::{
    IndexDefinition, Row, RowId, TableId, TableMetadata, TenantId, config::QueryConfig,
    merge_rows,
};
use tracing::{debug, info};

use crate::{
    error::{
        DuplicateIndexSnafu, Result, RowNotFoundSnafu, StorageSnafu, TableExistsSnafu,
        TableNotFoundSnafu,
    },
    indexes::IndexMaintainer,
    join::{JoinRequest, join},
    keys::{row_id_from_row_key, row_range},
    query::{SelectRequest, SelectResult, select},
    rows::RowStore,
};

/// Tenant-scoped tables with secondary indexes over a shared substrate.
///
/// Every mutation commits as a single substrate batch holding the row and its
/// index entries. There is no row-level locking: concurrent writers to the
/// same row must be serialized by the caller.
///
/// Generic over [`KvStore`] so the same code runs on
/// [`MemoryKv`](tabula_store::MemoryKv) in tests and
/// [`LayeredKv`](tabula_store::LayeredKv) on disk.
pub struct TableStore<K: KvStore> {
    kv: Arc<K>,
    config: QueryConfig,
}

impl<K: KvStore> TableStore<K> {
    /// Creates a table store with the default query limits.
    pub fn new(kv: Arc<K>) -> Self {
        Self::with_config(kv, QueryConfig::default())
    }

    /// Creates a table store with explicit query limits.
    pub fn with_config(kv: Arc<K>, config: QueryConfig) -> Self {
        Self { kv, config }
    }

    /// The underlying substrate.
    pub fn kv(&self) -> &Arc<K> {
        &self.kv
    }

    /// Query limits in effect.
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Creates a table with the given index definitions.
    ///
    /// # Errors
    ///
    /// Returns `TableError::TableExists` if the table already has metadata.
    /// Returns `TableError::DuplicateIndex` if two definitions share a name.
    /// Returns `TableError::Storage` or `TableError::Codec` on substrate or
    /// serialization failure.
    pub fn create_table(
        &self,
        tenant: &TenantId,
        table: &TableId,
        metadata: TableMetadata,
    ) -> Result<()> {
        let existing = RowStore::get_metadata(self.kv.as_ref(), tenant, table)?;
        ensure!(
            existing.is_none(),
            TableExistsSnafu { tenant: tenant.clone(), table: table.clone() }
        );

        let mut names = HashSet::new();
        for index in &metadata.indexes {
            ensure!(
                names.insert(index.name.as_str()),
                DuplicateIndexSnafu { table: table.clone(), index: index.name.clone() }
            );
        }

        let op = RowStore::put_metadata_op(tenant, table, &metadata)?;
        self.kv.batch(vec![op]).context(StorageSnafu)?;
        info!(tenant = %tenant, table = %table, indexes = metadata.indexes.len(), "Created table");
        Ok(())
    }

    /// Returns a table's metadata.
    ///
    /// # Errors
    ///
    /// Returns `TableError::TableNotFound` if the table does not exist.
    pub fn table_metadata(&self, tenant: &TenantId, table: &TableId) -> Result<TableMetadata> {
        RowStore::get_metadata(self.kv.as_ref(), tenant, table)?
            .context(TableNotFoundSnafu { tenant: tenant.clone(), table: table.clone() })
    }

    /// Adds an index to an existing table and backfills entries for every row.
    ///
    /// The metadata update and all backfilled entries commit in one batch.
    /// Returns the number of entries written.
    ///
    /// # Errors
    ///
    /// Returns `TableError::TableNotFound` if the table does not exist.
    /// Returns `TableError::DuplicateIndex` if the name is taken.
    /// Returns `TableError::Storage` or `TableError::Codec` on substrate or
    /// serialization failure.
    pub fn create_index(
        &self,
        tenant: &TenantId,
        table: &TableId,
        index: IndexDefinition,
    ) -> Result<usize> {
        let start = Instant::now();
        let metadata = self.table_metadata(tenant, table)?;
        ensure!(
            metadata.index(&index.name).is_none(),
            DuplicateIndexSnafu { table: table.clone(), index: index.name.clone() }
        );

        let mut ops = Vec::new();
        for entry in self.kv.iter(row_range(tenant, table)) {
            let (key, value) = entry.context(StorageSnafu)?;
            let Some(row_id) = row_id_from_row_key(&key) else { continue };
            let row = RowStore::decode_row(&value)?;
            ops.extend(IndexMaintainer::backfill(tenant, table, &row_id, &index, &row));
        }
        let backfilled = ops.len();

        let name = index.name.clone();
        let metadata = metadata.with_index(index);
        ops.push(RowStore::put_metadata_op(tenant, table, &metadata)?);
        self.kv.batch(ops).context(StorageSnafu)?;

        info!(
            tenant = %tenant,
            table = %table,
            index = %name,
            backfilled,
            latency_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Created index"
        );
        Ok(backfilled)
    }

    /// Returns a row, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `TableError::Storage` or `TableError::Codec` on substrate or
    /// decoding failure.
    pub fn get_row(
        &self,
        tenant: &TenantId,
        table: &TableId,
        row_id: &RowId,
    ) -> Result<Option<Row>> {
        RowStore::get_row(self.kv.as_ref(), tenant, table, row_id)
    }

    /// Writes a row, replacing any previous payload, and maintains indexes.
    ///
    /// # Errors
    ///
    /// Returns `TableError::TableNotFound` if the table does not exist.
    /// Returns `TableError::Storage` or `TableError::Codec` on substrate or
    /// serialization failure.
    pub fn put_row(
        &self,
        tenant: &TenantId,
        table: &TableId,
        row_id: &RowId,
        row: Row,
    ) -> Result<()> {
        let metadata = self.table_metadata(tenant, table)?;
        let old = RowStore::get_row(self.kv.as_ref(), tenant, table, row_id)?;
        self.commit(tenant, table, row_id, &metadata, old.as_ref(), Some(&row))?;
        Ok(())
    }

    /// Shallow-merges `patch` into an existing row and maintains indexes.
    ///
    /// Patch fields overwrite, other fields are preserved. The row and every
    /// changed index entry commit in one batch. Returns the merged row.
    ///
    /// # Errors
    ///
    /// Returns `TableError::TableNotFound` if the table does not exist.
    /// Returns `TableError::RowNotFound` if the row does not exist.
    /// Returns `TableError::Storage` or `TableError::Codec` on substrate or
    /// serialization failure. A failed batch leaves row and indexes unchanged.
    pub fn update_row(
        &self,
        tenant: &TenantId,
        table: &TableId,
        row_id: &RowId,
        patch: &Row,
    ) -> Result<Row> {
        let metadata = self.table_metadata(tenant, table)?;
        let old = self.existing_row(tenant, table, row_id)?;
        let new = merge_rows(&old, patch);
        self.commit(tenant, table, row_id, &metadata, Some(&old), Some(&new))?;
        Ok(new)
    }

    /// Removes a row and its index entries. Returns the removed row.
    ///
    /// # Errors
    ///
    /// Returns `TableError::TableNotFound` if the table does not exist.
    /// Returns `TableError::RowNotFound` if the row does not exist.
    /// Returns `TableError::Storage` or `TableError::Codec` on substrate or
    /// decoding failure.
    pub fn delete_row(&self, tenant: &TenantId, table: &TableId, row_id: &RowId) -> Result<Row> {
        let metadata = self.table_metadata(tenant, table)?;
        let old = self.existing_row(tenant, table, row_id)?;
        self.commit(tenant, table, row_id, &metadata, Some(&old), None)?;
        Ok(old)
    }

    /// Runs a filtered, paginated select. See [`crate::query`].
    ///
    /// # Errors
    ///
    /// Returns `TableError::TableNotFound` if the table does not exist.
    /// Returns `TableError::IndexNotFound` if the named index is not defined.
    /// Returns `TableError::InvalidCursor` if `after` lies outside the range.
    /// Returns `TableError::Storage` or `TableError::Codec` on substrate or
    /// decoding failure.
    pub fn select_rows(&self, request: &SelectRequest) -> Result<SelectResult> {
        let metadata = self.table_metadata(&request.tenant, &request.table)?;
        select(self.kv.as_ref(), &metadata, request)
    }

    /// Runs an equality inner join. See [`crate::join`].
    ///
    /// # Errors
    ///
    /// Returns `TableError::TableNotFound` if either table does not exist.
    /// Returns `TableError::JoinBuildTooLarge` if the filtered right side has
    /// more joinable rows than `max_join_build_rows`.
    /// Returns `TableError::Storage` or `TableError::Codec` on substrate or
    /// decoding failure.
    pub fn join_tables(&self, request: &JoinRequest) -> Result<Vec<Row>> {
        self.table_metadata(&request.tenant, &request.left_table)?;
        self.table_metadata(&request.tenant, &request.right_table)?;
        join(self.kv.as_ref(), request, self.config.max_join_build_rows)
    }

    fn existing_row(&self, tenant: &TenantId, table: &TableId, row_id: &RowId) -> Result<Row> {
        RowStore::get_row(self.kv.as_ref(), tenant, table, row_id)?.context(RowNotFoundSnafu {
            tenant: tenant.clone(),
            table: table.clone(),
            row_id: row_id.clone(),
        })
    }

    /// Commits a row transition and its index diff as one batch.
    fn commit(
        &self,
        tenant: &TenantId,
        table: &TableId,
        row_id: &RowId,
        metadata: &TableMetadata,
        old: Option<&Row>,
        new: Option<&Row>,
    ) -> Result<()> {
        let mut ops = IndexMaintainer::diff(tenant, table, row_id, &metadata.indexes, old, new);
        let index_ops = ops.len();
        ops.push(match new {
            Some(row) => RowStore::put_row_op(tenant, table, row_id, row)?,
            None => RowStore::delete_row_op(tenant, table, row_id),
        });
        self.kv.batch(ops).context(StorageSnafu)?;
        debug!(
            tenant = %tenant,
            table = %table,
            row_id = %row_id,
            index_ops,
            deleted = new.is_none(),
            "Committed row"
        );
        Ok(())
    }
}
