//! Filtered, paginated scans over a table or one of its indexes.
//!
//! A select streams its range in ascending key order, hydrates each row,
//! applies the filters, and stops once `limit` rows matched. Scans are
//! read-consistent per substrate chunk but not isolated from concurrent
//! writers.
//!
//! # Pagination
//!
//! When a page comes back full, [`SelectResult::next_cursor`] holds the raw
//! key of the last entry scanned; passing it as the next request's `after`
//! resumes strictly past that key. A short page has no cursor. Chaining pages
//! this way visits every matching row exactly once.
//!
//! # Ordering
//!
//! Rows come back in scan order: by row id, or by composite then row id for
//! an index scan. An `order_by` the scan does not already satisfy is applied
//! by a stable sort of the collected page only. With cursors this is not a
//! global order.

use std::{fmt, time::Instant};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::ResultExt;
use tabula_store::{KvStore, ScanRange};
use tabula_types::{
    FieldValue, Filter, IndexDefinition, OrderBy, Row, RowId, TableId, TableMetadata, TenantId,
    field,
};
use tracing::{debug, warn};

use crate::{
    error::{IndexNotFoundSnafu, InvalidCursorSnafu, Result, StorageSnafu},
    filter::matches_all,
    keys::{index_prefix_range, index_range, row_id_from_index_key, row_id_from_row_key, row_range},
    rows::RowStore,
};

/// Page size used when a request does not set one.
pub const DEFAULT_SELECT_LIMIT: usize = 100;

/// Opaque continuation point: the raw key of the last entry a page scanned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(Vec<u8>);

impl Cursor {
    /// Wraps a raw substrate key.
    pub fn from_key(key: impl Into<Vec<u8>>) -> Self {
        Self(key.into())
    }

    /// Returns the raw key.
    pub fn as_key(&self) -> &[u8] {
        &self.0
    }

    /// Encodes the cursor as URL-safe base64 without padding.
    pub fn to_token(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }

    /// Decodes a token produced by [`Cursor::to_token`].
    ///
    /// # Errors
    ///
    /// Returns `TableError::InvalidCursor` if the token is not valid base64 or
    /// is empty.
    pub fn from_token(token: &str) -> Result<Self> {
        let key = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| InvalidCursorSnafu { reason: e.to_string() }.build())?;
        if key.is_empty() {
            return InvalidCursorSnafu { reason: "empty cursor" }.fail();
        }
        Ok(Self(key))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_token())
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_token())
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Cursor::from_token(&token).map_err(serde::de::Error::custom)
    }
}

/// A select over one table.
#[derive(Debug, Clone, bon::Builder)]
pub struct SelectRequest {
    #[builder(into)]
    pub tenant: TenantId,
    #[builder(into)]
    pub table: TableId,
    /// Conjunctive predicates.
    #[builder(default)]
    pub filters: Vec<Filter>,
    /// Index to scan instead of the row range.
    #[builder(into)]
    pub index: Option<String>,
    /// Equality values for the index's leading fields, narrowing the scan.
    /// Ignored without `index`.
    #[builder(default)]
    pub index_prefix: Vec<FieldValue>,
    /// Resume strictly after this key.
    pub after: Option<Cursor>,
    #[builder(default = DEFAULT_SELECT_LIMIT)]
    pub limit: usize,
    pub order_by: Option<OrderBy>,
}

/// One page of a select.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectResult {
    /// Matching rows with their ids.
    pub rows: Vec<(RowId, Row)>,
    /// Present iff exactly `limit` rows were returned.
    pub next_cursor: Option<Cursor>,
}

/// Returns true when scanning `index` already yields rows ordered by `order_by`.
fn scan_satisfies(index: Option<&IndexDefinition>, order_by: &OrderBy) -> bool {
    !order_by.desc
        && index.is_some_and(|index| index.fields.first() == Some(&order_by.column))
}

fn sort_page(rows: &mut [(RowId, Row)], order_by: &OrderBy) {
    rows.sort_by(|(_, a), (_, b)| {
        let ordering = field(a, &order_by.column).sort_cmp(field(b, &order_by.column));
        if order_by.desc { ordering.reverse() } else { ordering }
    });
}

/// Runs `request` against a table whose metadata is already loaded.
pub(crate) fn select<K: KvStore>(
    kv: &K,
    metadata: &TableMetadata,
    request: &SelectRequest,
) -> Result<SelectResult> {
    let start = Instant::now();
    let SelectRequest { tenant, table, .. } = request;

    let index = match &request.index {
        Some(name) => Some(metadata.index(name).ok_or_else(|| {
            IndexNotFoundSnafu { table: table.clone(), index: name.clone() }.build()
        })?),
        None => None,
    };
    let mut range: ScanRange = match index {
        Some(index) if request.index_prefix.is_empty() => index_range(tenant, table, &index.name),
        Some(index) => index_prefix_range(tenant, table, &index.name, &request.index_prefix),
        None => row_range(tenant, table),
    };
    if let Some(cursor) = &request.after {
        if !range.contains(cursor.as_key()) {
            return InvalidCursorSnafu { reason: "cursor lies outside the scanned range" }.fail();
        }
        range = range.resume_after(cursor.as_key());
    }

    let mut rows = Vec::new();
    let mut last_key = None;
    let mut scanned = 0usize;
    if request.limit > 0 {
        for entry in kv.iter(range) {
            let (key, value) = entry.context(StorageSnafu)?;
            scanned += 1;
            let hydrated = match index {
                None => match row_id_from_row_key(&key) {
                    Some(row_id) => Some((row_id, RowStore::decode_row(&value)?)),
                    None => {
                        warn!(tenant = %tenant, table = %table, "Skipping undecodable row key");
                        None
                    },
                },
                Some(index) => match row_id_from_index_key(&key) {
                    Some(row_id) => RowStore::get_row(kv, tenant, table, &row_id)?
                        .map(|row| (row_id, row)),
                    None => {
                        warn!(
                            tenant = %tenant,
                            table = %table,
                            index = %index.name,
                            "Skipping undecodable index key"
                        );
                        None
                    },
                },
            };
            let Some((row_id, row)) = hydrated else { continue };
            if !matches_all(&row, &request.filters) {
                continue;
            }
            rows.push((row_id, row));
            last_key = Some(key);
            if rows.len() == request.limit {
                break;
            }
        }
    }

    let next_cursor =
        if rows.len() == request.limit { last_key.map(Cursor::from_key) } else { None };

    if let Some(order_by) = &request.order_by
        && !scan_satisfies(index, order_by)
    {
        sort_page(&mut rows, order_by);
    }

    debug!(
        tenant = %tenant,
        table = %table,
        index = request.index.as_deref().unwrap_or("-"),
        scanned,
        returned = rows.len(),
        has_more = next_cursor.is_some(),
        latency_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Select complete"
    );

    Ok(SelectResult { rows, next_cursor })
}
