//! Equality inner join between two tables of one tenant.
//!
//! The right table is scanned first and materialized as a hash table from its
//! join value to the matching rows; the left table is then streamed and probed.
//! Output rows are namespaced as `"{table}.{column}"`, plus `"{table}.rowId"`
//! for each side. Join values match under the same equality as `=` filters;
//! a value that is missing, `Null`, or NaN never matches.

use std::{collections::HashMap, time::Instant};

use snafu::ResultExt;
use tabula_store::KvStore;
use tabula_types::{FieldValue, Filter, Row, RowId, TableId, TenantId, field};
use tracing::debug;

use crate::{
    error::{JoinBuildTooLargeSnafu, Result, StorageSnafu},
    filter::matches_all,
    keys::{encode_field_values, row_id_from_row_key, row_range},
    rows::RowStore,
};

/// Row cap used when a join request does not set one.
pub const DEFAULT_JOIN_LIMIT: usize = 100;

/// Column suffix carrying each side's row id in joined rows.
pub const ROW_ID_COLUMN: &str = "rowId";

/// `left.left_key = right.right_key`, each side filtered independently.
#[derive(Debug, Clone, bon::Builder)]
pub struct JoinRequest {
    #[builder(into)]
    pub tenant: TenantId,
    #[builder(into)]
    pub left_table: TableId,
    #[builder(into)]
    pub right_table: TableId,
    #[builder(into)]
    pub left_key: String,
    #[builder(into)]
    pub right_key: String,
    #[builder(default)]
    pub where_left: Vec<Filter>,
    #[builder(default)]
    pub where_right: Vec<Filter>,
    #[builder(default = DEFAULT_JOIN_LIMIT)]
    pub limit: usize,
}

/// Hash key for a join value.
///
/// Two keys are equal exactly when [`FieldValue::compare`] says the values
/// are equal, so `Int(1)` joins `Float(1.0)`.
fn join_value(value: &FieldValue) -> Option<Vec<u8>> {
    match value {
        FieldValue::Null => None,
        FieldValue::Float(f) if f.is_nan() => None,
        value => Some(encode_field_values(std::slice::from_ref(value))),
    }
}

/// Streams one table's rows that pass `filters`.
fn scan_table<K, F>(
    kv: &K,
    tenant: &TenantId,
    table: &TableId,
    filters: &[Filter],
    mut visit: F,
) -> Result<()>
where
    K: KvStore,
    F: FnMut(RowId, Row) -> Result<bool>,
{
    for entry in kv.iter(row_range(tenant, table)) {
        let (key, value) = entry.context(StorageSnafu)?;
        let Some(row_id) = row_id_from_row_key(&key) else { continue };
        let row = RowStore::decode_row(&value)?;
        if matches_all(&row, filters) && !visit(row_id, row)? {
            break;
        }
    }
    Ok(())
}

fn namespace(out: &mut Row, table: &TableId, row_id: &RowId, row: &Row) {
    for (column, value) in row {
        out.insert(format!("{table}.{column}"), value.clone());
    }
    out.insert(format!("{table}.{ROW_ID_COLUMN}"), FieldValue::from(row_id.as_str()));
}

/// Runs `request`; both tables are known to exist.
pub(crate) fn join<K: KvStore>(
    kv: &K,
    request: &JoinRequest,
    max_build_rows: usize,
) -> Result<Vec<Row>> {
    let start = Instant::now();
    if request.limit == 0 {
        return Ok(Vec::new());
    }

    let mut build: HashMap<Vec<u8>, Vec<(RowId, Row)>> = HashMap::new();
    let mut build_rows = 0usize;
    scan_table(kv, &request.tenant, &request.right_table, &request.where_right, |row_id, row| {
        let Some(key) = join_value(field(&row, &request.right_key)) else {
            return Ok(true);
        };
        build_rows += 1;
        if build_rows > max_build_rows {
            return JoinBuildTooLargeSnafu {
                table: request.right_table.clone(),
                limit: max_build_rows,
            }
            .fail();
        }
        build.entry(key).or_default().push((row_id, row));
        Ok(true)
    })?;

    let mut output = Vec::new();
    let mut probed = 0usize;
    scan_table(kv, &request.tenant, &request.left_table, &request.where_left, |row_id, row| {
        probed += 1;
        let Some(key) = join_value(field(&row, &request.left_key)) else {
            return Ok(true);
        };
        let Some(matches) = build.get(&key) else {
            return Ok(true);
        };
        for (right_id, right_row) in matches {
            let mut joined = Row::new();
            namespace(&mut joined, &request.left_table, &row_id, &row);
            namespace(&mut joined, &request.right_table, right_id, right_row);
            output.push(joined);
            if output.len() == request.limit {
                return Ok(false);
            }
        }
        Ok(true)
    })?;

    debug!(
        tenant = %request.tenant,
        left = %request.left_table,
        right = %request.right_table,
        build_rows,
        probed,
        returned = output.len(),
        latency_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Join complete"
    );

    Ok(output)
}
