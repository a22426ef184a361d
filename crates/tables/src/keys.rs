//! Key layout for table metadata, rows, and index entries.
//!
//! Every key starts with the tenant and table ids, followed by a kind byte:
//!
//! ```text
//! metadata: {tenant}{table}01
//! row:      {tenant}{table}02{row_id}
//! index:    {tenant}{table}03{index_name}{composite}{row_id}
//! ```
//!
//! Each `{...}` component is escaped (`00` becomes `00 FF`) and terminated by
//! `00 01`. A component can therefore hold any byte without running into the
//! next one, and escaped components sort exactly like their raw bytes. A table
//! range or index range is a plain prefix scan that never crosses into another
//! tenant, table, or index.
//!
//! The composite is the concatenation of the row's index field values, each in
//! a tagged, order-preserving encoding (see [`push_field_value`]).

use tabula_store::{Partitioner, ScanRange};
use tabula_types::{FieldValue, Row, RowId, TableId, TenantId, field};

const ESCAPE: u8 = 0x00;
const ESCAPED_NUL: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;

const KIND_METADATA: u8 = 0x01;
const KIND_ROW: u8 = 0x02;
const KIND_INDEX: u8 = 0x03;

const TAG_NULL: u8 = 0x01;
const TAG_BOOL: u8 = 0x02;
const TAG_NUMBER: u8 = 0x03;
const TAG_TEXT: u8 = 0x04;

/// Partition name for keys that do not start with a tenant component.
pub const UNSCOPED_PARTITION: &str = "_unscoped";

/// Decoded index entry key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKey {
    /// Owning tenant.
    pub tenant: TenantId,
    /// Owning table.
    pub table: TableId,
    /// Index name.
    pub index: String,
    /// Encoded composite of the row's index field values.
    pub composite: Vec<u8>,
    /// Row the entry points at.
    pub row_id: RowId,
}

// ============================================================================
// Component encoding
// ============================================================================

/// Appends `raw` escaped, without the terminator.
fn push_escaped(out: &mut Vec<u8>, raw: &[u8]) {
    for &byte in raw {
        out.push(byte);
        if byte == ESCAPE {
            out.push(ESCAPED_NUL);
        }
    }
}

/// Appends `raw` as one escaped, terminated component.
pub fn push_component(out: &mut Vec<u8>, raw: &[u8]) {
    push_escaped(out, raw);
    out.push(ESCAPE);
    out.push(TERMINATOR);
}

/// Reads one component starting at `*pos`, advancing past its terminator.
fn read_component(key: &[u8], pos: &mut usize) -> Option<Vec<u8>> {
    let mut raw = Vec::new();
    loop {
        let byte = *key.get(*pos)?;
        *pos += 1;
        if byte != ESCAPE {
            raw.push(byte);
            continue;
        }
        match *key.get(*pos)? {
            ESCAPED_NUL => {
                raw.push(ESCAPE);
                *pos += 1;
            },
            TERMINATOR => {
                *pos += 1;
                return Some(raw);
            },
            _ => return None,
        }
    }
}

fn read_string(key: &[u8], pos: &mut usize) -> Option<String> {
    String::from_utf8(read_component(key, pos)?).ok()
}

/// Appends the order-preserving encoding of one field value.
///
/// Byte order matches [`FieldValue::sort_cmp`]: `Null < Bool < numbers <
/// Text`. Integers and floats share one numeric encoding, so `Int(1)` and
/// `Float(1.0)` encode identically. A number is written as its nearest `f64`
/// (sign-magnitude bit flip, `-0.0` folded into `0.0`, every NaN folded into
/// one NaN that sorts above `+inf`) followed by the sign-flipped integer
/// residual that float rounding lost.
pub fn push_field_value(out: &mut Vec<u8>, value: &FieldValue) {
    match value {
        FieldValue::Null => out.push(TAG_NULL),
        FieldValue::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*b));
        },
        FieldValue::Int(_) | FieldValue::Float(_) => {
            if let Some((approx, residual)) = value.numeric_parts() {
                out.push(TAG_NUMBER);
                push_ordered_f64(out, approx);
                out.extend_from_slice(&((residual as u64) ^ (1 << 63)).to_be_bytes());
            }
        },
        FieldValue::Text(s) => {
            out.push(TAG_TEXT);
            push_component(out, s.as_bytes());
        },
    }
}

fn push_ordered_f64(out: &mut Vec<u8>, f: f64) {
    let f = if f.is_nan() {
        f64::NAN
    } else if f == 0.0 {
        0.0
    } else {
        f
    };
    let bits = f.to_bits();
    let ordered = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
    out.extend_from_slice(&ordered.to_be_bytes());
}

/// Encodes `values` back to back.
pub fn encode_field_values(values: &[FieldValue]) -> Vec<u8> {
    let mut out = Vec::new();
    for value in values {
        push_field_value(&mut out, value);
    }
    out
}

/// Returns the composite key of `row` over `fields`, or `None` when every
/// field is empty (missing, `Null`, or `""`).
///
/// Missing fields encode as `Null` so the composite always holds one value per
/// field.
pub fn composite_key(row: &Row, fields: &[String]) -> Option<Vec<u8>> {
    if fields.iter().all(|column| field(row, column).is_empty()) {
        return None;
    }
    let mut out = Vec::new();
    for column in fields {
        push_field_value(&mut out, field(row, column));
    }
    Some(out)
}

// ============================================================================
// Key builders
// ============================================================================

fn table_prefix(tenant: &TenantId, table: &TableId, kind: u8) -> Vec<u8> {
    let mut key = Vec::with_capacity(tenant.as_str().len() + table.as_str().len() + 8);
    push_component(&mut key, tenant.as_str().as_bytes());
    push_component(&mut key, table.as_str().as_bytes());
    key.push(kind);
    key
}

fn index_prefix(tenant: &TenantId, table: &TableId, index: &str) -> Vec<u8> {
    let mut key = table_prefix(tenant, table, KIND_INDEX);
    push_component(&mut key, index.as_bytes());
    key
}

/// Key holding a table's metadata record.
pub fn metadata_key(tenant: &TenantId, table: &TableId) -> Vec<u8> {
    table_prefix(tenant, table, KIND_METADATA)
}

/// Key holding one row's payload.
pub fn row_key(tenant: &TenantId, table: &TableId, row_id: &RowId) -> Vec<u8> {
    let mut key = table_prefix(tenant, table, KIND_ROW);
    push_component(&mut key, row_id.as_str().as_bytes());
    key
}

/// Range covering every row of a table, ordered by row id.
pub fn row_range(tenant: &TenantId, table: &TableId) -> ScanRange {
    ScanRange::prefix(&table_prefix(tenant, table, KIND_ROW))
}

/// Key of one index entry.
///
/// `composite` is the output of [`composite_key`].
pub fn index_key(
    tenant: &TenantId,
    table: &TableId,
    index: &str,
    composite: &[u8],
    row_id: &RowId,
) -> Vec<u8> {
    let mut key = index_prefix(tenant, table, index);
    push_component(&mut key, composite);
    push_component(&mut key, row_id.as_str().as_bytes());
    key
}

/// Range covering every entry of one index, ordered by composite then row id.
pub fn index_range(tenant: &TenantId, table: &TableId, index: &str) -> ScanRange {
    ScanRange::prefix(&index_prefix(tenant, table, index))
}

/// Range covering the entries whose leading index fields equal `values`.
///
/// With no values this is [`index_range`].
pub fn index_prefix_range(
    tenant: &TenantId,
    table: &TableId,
    index: &str,
    values: &[FieldValue],
) -> ScanRange {
    let mut prefix = index_prefix(tenant, table, index);
    // The composite component is left open so longer composites still match.
    push_escaped(&mut prefix, &encode_field_values(values));
    ScanRange::prefix(&prefix)
}

// ============================================================================
// Key decoders
// ============================================================================

/// Returns the tenant a key belongs to.
pub fn tenant_of_key(key: &[u8]) -> Option<TenantId> {
    let mut pos = 0;
    read_string(key, &mut pos).map(TenantId::new)
}

/// Extracts the row id from a row key.
pub fn row_id_from_row_key(key: &[u8]) -> Option<RowId> {
    let mut pos = 0;
    read_component(key, &mut pos)?;
    read_component(key, &mut pos)?;
    if *key.get(pos)? != KIND_ROW {
        return None;
    }
    pos += 1;
    let row_id = read_string(key, &mut pos)?;
    (pos == key.len()).then(|| RowId::new(row_id))
}

/// Decodes an index entry key into its components.
pub fn decode_index_key(key: &[u8]) -> Option<IndexKey> {
    let mut pos = 0;
    let tenant = read_string(key, &mut pos)?;
    let table = read_string(key, &mut pos)?;
    if *key.get(pos)? != KIND_INDEX {
        return None;
    }
    pos += 1;
    let index = read_string(key, &mut pos)?;
    let composite = read_component(key, &mut pos)?;
    let row_id = read_string(key, &mut pos)?;
    (pos == key.len()).then(|| IndexKey {
        tenant: TenantId::new(tenant),
        table: TableId::new(table),
        index,
        composite,
        row_id: RowId::new(row_id),
    })
}

/// Extracts the row id an index entry points at.
pub fn row_id_from_index_key(key: &[u8]) -> Option<RowId> {
    decode_index_key(key).map(|decoded| decoded.row_id)
}

/// Routes keys to per-tenant layer files by their leading tenant component.
#[derive(Debug, Clone, Copy, Default)]
pub struct TenantPartitioner;

impl Partitioner for TenantPartitioner {
    fn partition(&self, key: &[u8]) -> String {
        match tenant_of_key(key) {
            Some(tenant) => tenant.as_str().to_string(),
            None => UNSCOPED_PARTITION.to_string(),
        }
    }
}
