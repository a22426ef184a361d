//! Core type definitions for Tabula.
//!
//! - Identifier types (TenantId, TableId, RowId)
//! - Row payloads and field values
//! - Table metadata
//! - Filter and ordering descriptions used by scans and joins

use std::{cmp::Ordering, collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

// ============================================================================
// Identifier Types
// ============================================================================

/// Generates a newtype wrapper around `String` for type-safe identifiers.
///
/// Each generated type provides:
/// - Standard derives: Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord
/// - Serde with `#[serde(transparent)]` for wire format compatibility
/// - `From<&str>` and `From<String>` conversions
/// - `Display` as the raw identifier (it is used verbatim in joined column names)
/// - `new()` constructor and `as_str()` accessor
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from a raw string.
            #[inline]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the raw identifier.
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            #[inline]
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            #[inline]
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

define_id!(
    /// Top-level scope isolating one customer's tables.
    ///
    /// Every stored key is prefixed by the tenant, so no scan can observe
    /// another tenant's data.
    TenantId
);

define_id!(
    /// Table identifier, unique within a tenant.
    TableId
);

define_id!(
    /// Row identifier, unique within a table. Rows sort by this value.
    RowId
);

// ============================================================================
// Field Values
// ============================================================================

/// A single column value in a row payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Explicit absence of a value. Missing columns read as `Null`.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 text.
    Text(String),
}

/// Shared `Null` used when a column is absent from a row.
pub static NULL: FieldValue = FieldValue::Null;

impl FieldValue {
    /// Returns true for values that do not contribute to an index key:
    /// `Null` and the empty string.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Compares two values of compatible types.
    ///
    /// Integers and floats compare exactly by numeric value, so `Int(1)`
    /// equals `Float(1.0)` and `i64::MAX` is below `Float(2^63)`. Values of
    /// unrelated types (and NaN) are incomparable and yield `None`.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::Null, FieldValue::Null) => Some(Ordering::Equal),
            (FieldValue::Bool(a), FieldValue::Bool(b)) => Some(a.cmp(b)),
            (FieldValue::Int(a), FieldValue::Int(b)) => Some(a.cmp(b)),
            (FieldValue::Text(a), FieldValue::Text(b)) => Some(a.cmp(b)),
            (a, b) => {
                let ((a_approx, a_residual), (b_approx, b_residual)) =
                    (a.numeric_parts()?, b.numeric_parts()?);
                match a_approx.partial_cmp(&b_approx)? {
                    Ordering::Equal => Some(a_residual.cmp(&b_residual)),
                    ordering => Some(ordering),
                }
            },
        }
    }

    /// Splits a number into its nearest `f64` and the integer remainder.
    ///
    /// Ordering numbers by `(approx, residual)` is their exact numeric order.
    /// Floats always have a zero residual; integers beyond 2^53 carry the
    /// rounding error. Returns `None` for non-numbers.
    pub fn numeric_parts(&self) -> Option<(f64, i64)> {
        match self {
            FieldValue::Int(i) => {
                let approx = *i as f64;
                // |i - approx| is at most 2^10, so the residual always fits.
                Some((approx, (i128::from(*i) - approx as i128) as i64))
            },
            FieldValue::Float(f) => Some((*f, 0)),
            _ => None,
        }
    }

    /// Returns true for a NaN float.
    pub fn is_nan(&self) -> bool {
        matches!(self, FieldValue::Float(f) if f.is_nan())
    }

    /// Total order used for sorting result pages.
    ///
    /// Values are ranked by type first: `Null < Bool < numbers < Text`.
    /// Numbers use [`FieldValue::compare`], with every NaN equal to every
    /// other NaN and above all other numbers.
    pub fn sort_cmp(&self, other: &FieldValue) -> Ordering {
        self.type_rank().cmp(&other.type_rank()).then_with(|| {
            match (self.is_nan(), other.is_nan()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
            }
        })
    }

    fn type_rank(&self) -> u8 {
        match self {
            FieldValue::Null => 0,
            FieldValue::Bool(_) => 1,
            FieldValue::Int(_) | FieldValue::Float(_) => 2,
            FieldValue::Text(_) => 3,
        }
    }

    /// Converts a JSON scalar into a field value.
    ///
    /// Returns `None` for arrays, objects, and numbers that fit neither
    /// `i64` nor `f64`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(FieldValue::Null),
            serde_json::Value::Bool(b) => Some(FieldValue::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(FieldValue::Int(i)),
                None => n.as_f64().map(FieldValue::Float),
            },
            serde_json::Value::String(s) => Some(FieldValue::Text(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    /// Converts this value into a JSON scalar.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
            FieldValue::Int(i) => serde_json::Value::from(*i),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("null"),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Float(x) => write!(f, "{x}"),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// A row payload: a flat map of column name to value.
pub type Row = BTreeMap<String, FieldValue>;

/// Returns a row's value for `column`, reading missing columns as `Null`.
pub fn field<'a>(row: &'a Row, column: &str) -> &'a FieldValue {
    row.get(column).unwrap_or(&NULL)
}

/// Shallow-merges `patch` into `base`: patch fields overwrite, the rest are kept.
pub fn merge_rows(base: &Row, patch: &Row) -> Row {
    let mut merged = base.clone();
    for (column, value) in patch {
        merged.insert(column.clone(), value.clone());
    }
    merged
}

// ============================================================================
// Table Metadata
// ============================================================================

/// A secondary index over an ordered list of columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Index name, unique within the table.
    pub name: String,
    /// Columns whose values form the composite key, in order.
    pub fields: Vec<String>,
}

impl IndexDefinition {
    /// Creates an index definition.
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { name: name.into(), fields: fields.into_iter().map(Into::into).collect() }
    }
}

/// Per-table metadata, stored under the table's metadata key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Index definitions, in declaration order.
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
}

impl TableMetadata {
    /// Creates metadata with the given indexes.
    pub fn new(indexes: Vec<IndexDefinition>) -> Self {
        Self { indexes }
    }

    /// Adds an index definition.
    #[must_use]
    pub fn with_index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    /// Looks up an index by name.
    pub fn index(&self, name: &str) -> Option<&IndexDefinition> {
        self.indexes.iter().find(|index| index.name == name)
    }
}

// ============================================================================
// Query Descriptions
// ============================================================================

/// Comparison applied to one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterOp {
    /// `=`
    Eq(FieldValue),
    /// `!=`
    NotEq(FieldValue),
    /// `>`
    Gt(FieldValue),
    /// `>=`
    Gte(FieldValue),
    /// `<`
    Lt(FieldValue),
    /// `<=`
    Lte(FieldValue),
    /// Column equals any listed value.
    In(Vec<FieldValue>),
    /// Column equals none of the listed values.
    NotIn(Vec<FieldValue>),
}

/// A predicate on a single column. A filter list is a conjunction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Column the predicate reads.
    pub column: String,
    /// Comparison and operand(s).
    pub op: FilterOp,
}

impl Filter {
    /// Creates a filter.
    pub fn new(column: impl Into<String>, op: FilterOp) -> Self {
        Self { column: column.into(), op }
    }

    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(column, FilterOp::Eq(value.into()))
    }

    /// `column != value`
    pub fn not_eq(column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(column, FilterOp::NotEq(value.into()))
    }

    /// `column > value`
    pub fn gt(column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(column, FilterOp::Gt(value.into()))
    }

    /// `column >= value`
    pub fn gte(column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(column, FilterOp::Gte(value.into()))
    }

    /// `column < value`
    pub fn lt(column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(column, FilterOp::Lt(value.into()))
    }

    /// `column <= value`
    pub fn lte(column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(column, FilterOp::Lte(value.into()))
    }

    /// `column in (values)`
    pub fn is_in<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FieldValue>,
    {
        Self::new(column, FilterOp::In(values.into_iter().map(Into::into).collect()))
    }

    /// `column not in (values)`
    pub fn not_in<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FieldValue>,
    {
        Self::new(column, FilterOp::NotIn(values.into_iter().map(Into::into).collect()))
    }
}

/// Requested ordering of a result page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Column to sort by.
    pub column: String,
    /// Sort descending instead of ascending.
    #[serde(default)]
    pub desc: bool,
}

impl OrderBy {
    /// Ascending order on `column`.
    pub fn asc(column: impl Into<String>) -> Self {
        Self { column: column.into(), desc: false }
    }

    /// Descending order on `column`.
    pub fn desc(column: impl Into<String>) -> Self {
        Self { column: column.into(), desc: true }
    }
}
