//! Proptest strategies for Tabula domain types.
//!
//! Reusable generators for property-based testing across crates. Strategies produce
//! well-formed rows, filters, and key-value mutations while exploring edge cases
//! (empty strings, nulls, separator bytes) through random variation.
//!
//! # Usage
//!
//! ```no_run
//! use tabula_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(rows in strategies::arb_rows(1..20)) {
//!         // test invariant with randomly generated rows
//!     }
//! }
//! ```

use std::ops::Range;

use proptest::prelude::*;
use tabula_types::{FieldValue, Filter, FilterOp, Row};

/// Column names used by generated rows. Kept small so filters and indexes
/// regularly hit populated columns.
pub const COLUMNS: [&str; 4] = ["status", "region", "score", "flag"];

/// Generates an identifier matching `[a-z][a-z0-9]{0,7}`.
pub fn arb_ident() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,7}"
}

/// Generates a text value from a small vocabulary, including the empty string
/// and a value containing a NUL byte.
pub fn arb_text() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        String::new(),
        "pending".to_string(),
        "shipped".to_string(),
        "eu".to_string(),
        "us".to_string(),
        "a\u{0}b".to_string(),
    ])
}

/// Generates any [`FieldValue`] variant.
///
/// Integers and integral floats share a narrow range so `Int(n)` and
/// `Float(n.0)` pairs come up often; NaN and fractional floats are included.
pub fn arb_field_value() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        Just(FieldValue::Null),
        any::<bool>().prop_map(FieldValue::Bool),
        (-10i64..10).prop_map(FieldValue::Int),
        (-10i64..10).prop_map(|i| FieldValue::Float(i as f64)),
        (-10.0f64..10.0).prop_map(FieldValue::Float),
        Just(FieldValue::Float(f64::NAN)),
        arb_text().prop_map(FieldValue::Text),
    ]
}

/// Generates a row over [`COLUMNS`]; each column may be absent.
pub fn arb_row() -> impl Strategy<Value = Row> {
    proptest::collection::vec(proptest::option::of(arb_field_value()), COLUMNS.len()).prop_map(
        |values| {
            COLUMNS
                .iter()
                .zip(values)
                .filter_map(|(column, value)| value.map(|v| ((*column).to_string(), v)))
                .collect()
        },
    )
}

/// Generates `count` rows keyed by distinct row ids `r000`, `r001`, ...
pub fn arb_rows(count: Range<usize>) -> impl Strategy<Value = Vec<(String, Row)>> {
    proptest::collection::vec(arb_row(), count).prop_map(|rows| {
        rows.into_iter().enumerate().map(|(i, row)| (format!("r{i:03}"), row)).collect()
    })
}

/// Generates a single-column filter over [`COLUMNS`].
pub fn arb_filter() -> impl Strategy<Value = Filter> {
    let column = prop::sample::select(COLUMNS.to_vec()).prop_map(str::to_string);
    let op = prop_oneof![
        arb_field_value().prop_map(FilterOp::Eq),
        arb_field_value().prop_map(FilterOp::NotEq),
        arb_field_value().prop_map(FilterOp::Gt),
        arb_field_value().prop_map(FilterOp::Gte),
        arb_field_value().prop_map(FilterOp::Lt),
        arb_field_value().prop_map(FilterOp::Lte),
        proptest::collection::vec(arb_field_value(), 0..4).prop_map(FilterOp::In),
        proptest::collection::vec(arb_field_value(), 0..4).prop_map(FilterOp::NotIn),
    ];
    (column, op).prop_map(|(column, op)| Filter { column, op })
}

/// Generates a key of 1-6 bytes drawn from a small alphabet that includes the
/// escape bytes `0x00`, `0x01`, and `0xFF`.
pub fn arb_kv_key() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(
        prop::sample::select(vec![0x00u8, 0x01, b'a', b'b', b'c', 0xFF]),
        1..6,
    )
}

/// Generates a value of 0-15 random bytes.
pub fn arb_kv_value() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..16)
}

/// Generates a key-value mutation: `Some(value)` is a put, `None` a delete.
pub fn arb_kv_mutation() -> impl Strategy<Value = (Vec<u8>, Option<Vec<u8>>)> {
    (arb_kv_key(), prop_oneof![3 => arb_kv_value().prop_map(Some), 1 => Just(None)])
}

/// Generates 1-8 batches of 1-6 mutations each.
pub fn arb_kv_batches() -> impl Strategy<Value = Vec<Vec<(Vec<u8>, Option<Vec<u8>>)>>> {
    proptest::collection::vec(proptest::collection::vec(arb_kv_mutation(), 1..6), 1..8)
}
