//! Secondary index maintenance.
//!
//! Every index definition holds at most one entry per row, keyed by the
//! row's current composite over the index fields. Writers compute the entry
//! diff between a row's old and new state and commit it in the same batch as
//! the row itself, so readers never see a row and its entries disagree.

use tabula_store::BatchOp;
use tabula_types::{IndexDefinition, Row, RowId, TableId, TenantId};

use crate::keys::{composite_key, index_key};

/// Computes index entry changes for row writes.
pub struct IndexMaintainer;

impl IndexMaintainer {
    /// Stages the index operations that move `row_id` from `old` to `new`.
    ///
    /// `old = None` is an insert, `new = None` a delete. Definitions whose
    /// composite did not change produce no operations. An empty composite has
    /// no entry, so it is neither deleted nor written.
    pub fn diff(
        tenant: &TenantId,
        table: &TableId,
        row_id: &RowId,
        indexes: &[IndexDefinition],
        old: Option<&Row>,
        new: Option<&Row>,
    ) -> Vec<BatchOp> {
        let mut ops = Vec::new();
        for index in indexes {
            let old_key = old.and_then(|row| composite_key(row, &index.fields));
            let new_key = new.and_then(|row| composite_key(row, &index.fields));
            if old_key == new_key {
                continue;
            }
            if let Some(old_key) = old_key {
                ops.push(BatchOp::delete(index_key(tenant, table, &index.name, &old_key, row_id)));
            }
            if let Some(new_key) = new_key {
                ops.push(BatchOp::put(
                    index_key(tenant, table, &index.name, &new_key, row_id),
                    Vec::new(),
                ));
            }
        }
        ops
    }

    /// Stages the entry for one row under a newly created index.
    pub fn backfill(
        tenant: &TenantId,
        table: &TableId,
        row_id: &RowId,
        index: &IndexDefinition,
        row: &Row,
    ) -> Option<BatchOp> {
        composite_key(row, &index.fields).map(|composite| {
            BatchOp::put(index_key(tenant, table, &index.name, &composite, row_id), Vec::new())
        })
    }
}
