//! Table, index, select, and join behavior over the in-memory substrate.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

use std::sync::Arc;

use tabula_store::{KvStore, MemoryKv};
use tabula_tables::{
    Cursor, JoinRequest, SelectRequest, TableError, TableStore,
    keys::{decode_index_key, index_range},
};
use tabula_test_utils::test_query_config;
use tabula_types::{
    FieldValue, Filter, IndexDefinition, OrderBy, Row, RowId, TableId, TableMetadata, TenantId,
    config::QueryConfig,
};

fn row(fields: &[(&str, FieldValue)]) -> Row {
    fields.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
}

fn text(value: &str) -> FieldValue {
    FieldValue::from(value)
}

fn ids(rows: &[(RowId, Row)]) -> Vec<&str> {
    rows.iter().map(|(id, _)| id.as_str()).collect()
}

fn acme() -> TenantId {
    TenantId::new("acme")
}

fn orders() -> TableId {
    TableId::new("orders")
}

fn store() -> TableStore<MemoryKv> {
    TableStore::with_config(Arc::new(MemoryKv::new()), test_query_config())
}

fn orders_store() -> TableStore<MemoryKv> {
    let store = store();
    let metadata =
        TableMetadata::default().with_index(IndexDefinition::new("byStatus", ["status"]));
    store.create_table(&acme(), &orders(), metadata).unwrap();
    store
}

fn select_by_status(store: &TableStore<MemoryKv>, status: &str) -> Vec<String> {
    let page = store
        .select_rows(
            &SelectRequest::builder()
                .tenant(acme())
                .table(orders())
                .index("byStatus")
                .index_prefix(vec![text(status)])
                .build(),
        )
        .unwrap();
    page.rows.into_iter().map(|(id, _)| id.as_str().to_string()).collect()
}

fn index_entries(store: &TableStore<MemoryKv>, index: &str) -> Vec<String> {
    store
        .kv()
        .iter(index_range(&acme(), &orders(), index))
        .map(|entry| decode_index_key(&entry.unwrap().0).unwrap().row_id.as_str().to_string())
        .collect()
}

// ============================================
// Mutations
// ============================================

#[test]
fn test_update_moves_row_between_index_values() {
    let store = orders_store();
    store.put_row(&acme(), &orders(), &"o-1".into(), row(&[("status", text("pending"))])).unwrap();
    assert_eq!(select_by_status(&store, "pending"), vec!["o-1"]);

    let updated = store
        .update_row(&acme(), &orders(), &"o-1".into(), &row(&[("status", text("shipped"))]))
        .unwrap();
    assert_eq!(updated, row(&[("status", text("shipped"))]));

    assert!(select_by_status(&store, "pending").is_empty());
    assert_eq!(select_by_status(&store, "shipped"), vec!["o-1"]);
    assert_eq!(index_entries(&store, "byStatus"), vec!["o-1"], "no stale entry remains");
}

#[test]
fn test_update_merges_patch_shallowly() {
    let store = orders_store();
    let original = row(&[("status", text("pending")), ("total", FieldValue::Int(10))]);
    store.put_row(&acme(), &orders(), &"o-1".into(), original).unwrap();

    let merged = store
        .update_row(&acme(), &orders(), &"o-1".into(), &row(&[("total", FieldValue::Int(12))]))
        .unwrap();
    assert_eq!(merged, row(&[("status", text("pending")), ("total", FieldValue::Int(12))]));
    assert_eq!(store.get_row(&acme(), &orders(), &"o-1".into()).unwrap(), Some(merged));
}

#[test]
fn test_update_missing_table_or_row() {
    let store = store();
    let err = store.update_row(&acme(), &orders(), &"o-1".into(), &Row::new()).unwrap_err();
    assert!(matches!(err, TableError::TableNotFound { .. }), "{err}");

    let store = orders_store();
    let err = store.update_row(&acme(), &orders(), &"o-1".into(), &Row::new()).unwrap_err();
    assert!(matches!(err, TableError::RowNotFound { .. }), "{err}");
    assert!(store.get_row(&acme(), &orders(), &"o-1".into()).unwrap().is_none());
}

#[test]
fn test_clearing_index_field_removes_entry() {
    let store = orders_store();
    store.put_row(&acme(), &orders(), &"o-1".into(), row(&[("status", text("pending"))])).unwrap();
    store.update_row(&acme(), &orders(), &"o-1".into(), &row(&[("status", text(""))])).unwrap();
    assert!(index_entries(&store, "byStatus").is_empty());

    store
        .update_row(&acme(), &orders(), &"o-1".into(), &row(&[("status", FieldValue::Null)]))
        .unwrap();
    assert!(index_entries(&store, "byStatus").is_empty());
}

#[test]
fn test_delete_row_removes_row_and_entries() {
    let store = orders_store();
    store.put_row(&acme(), &orders(), &"o-1".into(), row(&[("status", text("pending"))])).unwrap();

    let removed = store.delete_row(&acme(), &orders(), &"o-1".into()).unwrap();
    assert_eq!(removed, row(&[("status", text("pending"))]));
    assert!(store.get_row(&acme(), &orders(), &"o-1".into()).unwrap().is_none());
    assert!(index_entries(&store, "byStatus").is_empty());

    let err = store.delete_row(&acme(), &orders(), &"o-1".into()).unwrap_err();
    assert!(matches!(err, TableError::RowNotFound { .. }));
}

#[test]
fn test_put_row_replaces_payload() {
    let store = orders_store();
    let id: RowId = "o-1".into();
    let first = row(&[("status", text("a")), ("x", text("1"))]);
    store.put_row(&acme(), &orders(), &id, first).unwrap();
    store.put_row(&acme(), &orders(), &id, row(&[("status", text("b"))])).unwrap();

    let stored = store.get_row(&acme(), &orders(), &id).unwrap();
    assert_eq!(stored, Some(row(&[("status", text("b"))])));
    assert_eq!(select_by_status(&store, "b"), vec!["o-1"]);
    assert!(select_by_status(&store, "a").is_empty());
}

#[test]
fn test_table_creation_errors() {
    let store = orders_store();
    let err = store.create_table(&acme(), &orders(), TableMetadata::default()).unwrap_err();
    assert!(matches!(err, TableError::TableExists { .. }));

    let metadata = TableMetadata::new(vec![
        IndexDefinition::new("byX", ["x"]),
        IndexDefinition::new("byX", ["y"]),
    ]);
    let err = store.create_table(&acme(), &"dupes".into(), metadata).unwrap_err();
    assert!(matches!(err, TableError::DuplicateIndex { .. }));

    let err = store.put_row(&acme(), &"missing".into(), &"r".into(), Row::new()).unwrap_err();
    assert!(matches!(err, TableError::TableNotFound { .. }));
}

#[test]
fn test_create_index_backfills_existing_rows() {
    let store = orders_store();
    for (id, region) in [("o-1", "eu"), ("o-2", ""), ("o-3", "us")] {
        store.put_row(&acme(), &orders(), &id.into(), row(&[("region", text(region))])).unwrap();
    }

    let written = store
        .create_index(&acme(), &orders(), IndexDefinition::new("byRegion", ["region"]))
        .unwrap();
    assert_eq!(written, 2, "the empty region is not indexed");
    assert_eq!(index_entries(&store, "byRegion"), vec!["o-1", "o-3"]);
    assert!(store.table_metadata(&acme(), &orders()).unwrap().index("byRegion").is_some());

    let err = store
        .create_index(&acme(), &orders(), IndexDefinition::new("byRegion", ["other"]))
        .unwrap_err();
    assert!(matches!(err, TableError::DuplicateIndex { .. }));
}

#[test]
fn test_tenants_are_isolated() {
    let store = orders_store();
    let globex = TenantId::new("globex");
    store.create_table(&globex, &orders(), TableMetadata::default()).unwrap();
    store.put_row(&acme(), &orders(), &"o-1".into(), row(&[("status", text("a"))])).unwrap();
    store.put_row(&globex, &orders(), &"o-9".into(), row(&[("status", text("a"))])).unwrap();

    let page = store
        .select_rows(&SelectRequest::builder().tenant(globex).table(orders()).build())
        .unwrap();
    assert_eq!(ids(&page.rows), vec!["o-9"]);
}

// ============================================
// Select
// ============================================

fn scored_store(count: usize) -> TableStore<MemoryKv> {
    let store = orders_store();
    for i in 0..count {
        let status = if i % 2 == 0 { "pending" } else { "shipped" };
        let score = FieldValue::Int((i * 7 % 5) as i64);
        let fields = row(&[("status", text(status)), ("score", score)]);
        store.put_row(&acme(), &orders(), &format!("r{i}").into(), fields).unwrap();
    }
    store
}

#[test]
fn test_select_filters_and_limits() {
    let store = scored_store(6);
    let page = store
        .select_rows(
            &SelectRequest::builder()
                .tenant(acme())
                .table(orders())
                .filters(vec![Filter::eq("status", "pending"), Filter::gte("score", 1i64)])
                .limit(10)
                .build(),
        )
        .unwrap();
    // r0 score 0, r2 score 4, r4 score 3
    assert_eq!(ids(&page.rows), vec!["r2", "r4"]);
    assert!(page.next_cursor.is_none());
}

#[test]
fn test_cursor_pages_through_table() {
    let store = scored_store(5);
    let mut after: Option<Cursor> = None;
    let mut pages = Vec::new();
    loop {
        let page = store
            .select_rows(
                &SelectRequest::builder()
                    .tenant(acme())
                    .table(orders())
                    .maybe_after(after.take())
                    .limit(2)
                    .build(),
            )
            .unwrap();
        pages.push(ids(&page.rows).into_iter().map(str::to_string).collect::<Vec<_>>());
        match page.next_cursor {
            Some(cursor) => after = Some(Cursor::from_token(&cursor.to_token()).unwrap()),
            None => break,
        }
    }
    assert_eq!(pages, vec![vec!["r0", "r1"], vec!["r2", "r3"], vec!["r4"]]);
}

#[test]
fn test_full_last_page_yields_trailing_empty_page() {
    let store = scored_store(4);
    let request = |after| {
        SelectRequest::builder()
            .tenant(acme())
            .table(orders())
            .maybe_after(after)
            .limit(2)
            .build()
    };
    let first = store.select_rows(&request(None)).unwrap();
    let second = store.select_rows(&request(first.next_cursor)).unwrap();
    assert_eq!(ids(&second.rows), vec!["r2", "r3"]);
    let third = store.select_rows(&request(second.next_cursor)).unwrap();
    assert!(third.rows.is_empty());
    assert!(third.next_cursor.is_none());
}

#[test]
fn test_cursor_outside_range_is_rejected() {
    let store = scored_store(3);
    let index_page = store
        .select_rows(
            &SelectRequest::builder()
                .tenant(acme())
                .table(orders())
                .index("byStatus")
                .limit(1)
                .build(),
        )
        .unwrap();
    let cursor = index_page.next_cursor.expect("full page has a cursor");

    let err = store
        .select_rows(
            &SelectRequest::builder().tenant(acme()).table(orders()).after(cursor).build(),
        )
        .unwrap_err();
    assert!(matches!(err, TableError::InvalidCursor { .. }), "{err}");
}

#[test]
fn test_index_scan_orders_by_composite_then_row_id() {
    let store = scored_store(4);
    let page = store
        .select_rows(
            &SelectRequest::builder().tenant(acme()).table(orders()).index("byStatus").build(),
        )
        .unwrap();
    assert_eq!(ids(&page.rows), vec!["r0", "r2", "r1", "r3"]);
}

#[test]
fn test_order_by_sorts_page_stably() {
    let store = scored_store(6);
    // scores: r0 0, r1 2, r2 4, r3 1, r4 3, r5 0
    let page = store
        .select_rows(
            &SelectRequest::builder()
                .tenant(acme())
                .table(orders())
                .order_by(OrderBy::desc("score"))
                .build(),
        )
        .unwrap();
    assert_eq!(ids(&page.rows), vec!["r2", "r4", "r1", "r3", "r0", "r5"]);
}

#[test]
fn test_order_by_matching_index_keeps_scan_order() {
    let store = scored_store(4);
    let page = store
        .select_rows(
            &SelectRequest::builder()
                .tenant(acme())
                .table(orders())
                .index("byStatus")
                .order_by(OrderBy::asc("status"))
                .build(),
        )
        .unwrap();
    assert_eq!(ids(&page.rows), vec!["r0", "r2", "r1", "r3"]);
}

fn mixed_numbers_store() -> TableStore<MemoryKv> {
    let store = store();
    let metadata = TableMetadata::default().with_index(IndexDefinition::new("byX", ["x"]));
    store.create_table(&acme(), &orders(), metadata).unwrap();
    let values = [
        ("a", FieldValue::Int(5)),
        ("b", FieldValue::Float(1.5)),
        ("c", FieldValue::Int(1)),
        ("d", FieldValue::Float(-2.0)),
        ("e", FieldValue::Float(1.0)),
    ];
    for (id, x) in values {
        store.put_row(&acme(), &orders(), &id.into(), row(&[("x", x)])).unwrap();
    }
    store
}

#[test]
fn test_index_scan_orders_ints_and_floats_numerically() {
    let store = mixed_numbers_store();
    let page = store
        .select_rows(
            &SelectRequest::builder()
                .tenant(acme())
                .table(orders())
                .index("byX")
                .order_by(OrderBy::asc("x"))
                .build(),
        )
        .unwrap();
    // c (Int 1) and e (Float 1.0) share a composite, so row id breaks the tie.
    assert_eq!(ids(&page.rows), vec!["d", "c", "e", "b", "a"]);
}

#[test]
fn test_index_prefix_matches_equal_numbers_of_either_type() {
    let store = mixed_numbers_store();
    for wanted in [FieldValue::Float(1.0), FieldValue::Int(1)] {
        let page = store
            .select_rows(
                &SelectRequest::builder()
                    .tenant(acme())
                    .table(orders())
                    .index("byX")
                    .index_prefix(vec![wanted.clone()])
                    .build(),
            )
            .unwrap();
        assert_eq!(ids(&page.rows), vec!["c", "e"], "prefix {wanted:?}");

        let filtered = store
            .select_rows(
                &SelectRequest::builder()
                    .tenant(acme())
                    .table(orders())
                    .filters(vec![Filter::eq("x", wanted.clone())])
                    .build(),
            )
            .unwrap();
        assert_eq!(ids(&filtered.rows), vec!["c", "e"], "filter {wanted:?}");
    }
}

#[test]
fn test_order_by_puts_nan_after_numbers() {
    let store = store();
    store.create_table(&acme(), &orders(), TableMetadata::default()).unwrap();
    for i in 0..200i64 {
        let x = if i % 3 == 0 { FieldValue::Float(f64::NAN) } else { FieldValue::Int(500 - i) };
        store.put_row(&acme(), &orders(), &format!("r{i:03}").into(), row(&[("x", x)])).unwrap();
    }
    let select = |order_by: OrderBy| {
        store
            .select_rows(
                &SelectRequest::builder()
                    .tenant(acme())
                    .table(orders())
                    .limit(200)
                    .order_by(order_by)
                    .build(),
            )
            .unwrap()
            .rows
    };

    let ascending = select(OrderBy::asc("x"));
    let values: Vec<&FieldValue> = ascending.iter().map(|(_, r)| &r["x"]).collect();
    let nans = values.iter().filter(|v| v.is_nan()).count();
    assert_eq!(nans, 67);
    assert!(values[..200 - nans].iter().all(|v| !v.is_nan()), "NaN sorts last");
    assert!(
        values[..200 - nans].windows(2).all(|w| w[0].sort_cmp(w[1]).is_le()),
        "numbers ascending"
    );

    let descending = select(OrderBy::desc("x"));
    assert!(descending[..nans].iter().all(|(_, r)| r["x"].is_nan()), "NaN sorts first");
    let numbers: Vec<i64> = descending[nans..]
        .iter()
        .map(|(_, r)| match r["x"] {
            FieldValue::Int(i) => i,
            ref other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert!(numbers.windows(2).all(|w| w[0] > w[1]));
}

#[test]
fn test_join_matches_int_and_float_keys() {
    let store = store();
    for table in ["orders", "customers"] {
        store.create_table(&acme(), &table.into(), TableMetadata::default()).unwrap();
    }
    let customer = row(&[("id", FieldValue::Int(1)), ("name", text("Ada"))]);
    store.put_row(&acme(), &"customers".into(), &"c1".into(), customer).unwrap();
    let order = row(&[("customerId", FieldValue::Float(1.0))]);
    store.put_row(&acme(), &orders(), &"o1".into(), order).unwrap();
    let other = row(&[("customerId", FieldValue::Float(1.5))]);
    store.put_row(&acme(), &orders(), &"o2".into(), other).unwrap();

    let matched = store
        .select_rows(
            &SelectRequest::builder()
                .tenant(acme())
                .table(orders())
                .filters(vec![Filter::eq("customerId", 1i64)])
                .build(),
        )
        .unwrap();
    assert_eq!(ids(&matched.rows), vec!["o1"]);

    let rows = store.join_tables(&join_request(100)).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["orders.rowId"], text("o1"));
    assert_eq!(rows[0]["customers.name"], text("Ada"));
}

#[test]
fn test_select_errors() {
    let store = orders_store();
    let err = store
        .select_rows(&SelectRequest::builder().tenant(acme()).table(orders()).index("nope").build())
        .unwrap_err();
    assert!(matches!(err, TableError::IndexNotFound { .. }));

    let err = store
        .select_rows(&SelectRequest::builder().tenant(acme()).table("missing").build())
        .unwrap_err();
    assert!(matches!(err, TableError::TableNotFound { .. }));

    let empty = store
        .select_rows(&SelectRequest::builder().tenant(acme()).table(orders()).build())
        .unwrap();
    assert!(empty.rows.is_empty(), "no rows is not an error");
}

// ============================================
// Join
// ============================================

fn join_store(config: QueryConfig) -> TableStore<MemoryKv> {
    let store = TableStore::with_config(Arc::new(MemoryKv::new()), config);
    for table in ["orders", "customers"] {
        store.create_table(&acme(), &table.into(), TableMetadata::default()).unwrap();
    }
    for (id, name) in [("c1", "Ada"), ("c2", "Grace")] {
        let fields = row(&[("id", text(id)), ("name", text(name))]);
        store.put_row(&acme(), &"customers".into(), &id.into(), fields).unwrap();
    }
    for (id, customer) in [("o1", "c1"), ("o2", "c1"), ("o3", "c2"), ("o4", "c9")] {
        let fields = row(&[("customerId", text(customer))]);
        store.put_row(&acme(), &orders(), &id.into(), fields).unwrap();
    }
    store.put_row(&acme(), &orders(), &"o5".into(), Row::new()).unwrap();
    store
}

fn join_request(limit: usize) -> JoinRequest {
    JoinRequest::builder()
        .tenant(acme())
        .left_table(orders())
        .right_table("customers")
        .left_key("customerId")
        .right_key("id")
        .limit(limit)
        .build()
}

#[test]
fn test_join_limit_one_returns_namespaced_row() {
    let store = join_store(test_query_config());
    let rows = store.join_tables(&join_request(1)).unwrap();
    assert_eq!(rows.len(), 1);
    let joined = &rows[0];
    assert_eq!(joined.get("orders.rowId"), Some(&text("o1")));
    assert_eq!(joined.get("customers.rowId"), Some(&text("c1")));
    assert_eq!(joined.get("orders.customerId"), joined.get("customers.id"));
    assert_eq!(joined.get("customers.name"), Some(&text("Ada")));
}

#[test]
fn test_join_emits_one_row_per_match() {
    let store = join_store(test_query_config());
    let rows = store.join_tables(&join_request(100)).unwrap();
    let pairs: Vec<(String, String)> = rows
        .iter()
        .map(|r| (r["orders.rowId"].to_string(), r["customers.rowId"].to_string()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("o1".to_string(), "c1".to_string()),
            ("o2".to_string(), "c1".to_string()),
            ("o3".to_string(), "c2".to_string()),
        ]
    );
}

#[test]
fn test_join_applies_side_filters() {
    let store = join_store(test_query_config());
    let request = JoinRequest::builder()
        .tenant(acme())
        .left_table(orders())
        .right_table("customers")
        .left_key("customerId")
        .right_key("id")
        .where_right(vec![Filter::eq("name", "Grace")])
        .where_left(vec![Filter::not_eq("customerId", "c9")])
        .build();
    let rows = store.join_tables(&request).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["orders.rowId"], text("o3"));
}

#[test]
fn test_join_build_side_is_bounded() {
    let config = QueryConfig::builder().max_join_build_rows(1).build().unwrap();
    let store = join_store(config);
    let err = store.join_tables(&join_request(10)).unwrap_err();
    assert!(matches!(err, TableError::JoinBuildTooLarge { limit: 1, .. }), "{err}");
}

#[test]
fn test_join_missing_table() {
    let store = join_store(test_query_config());
    let request = JoinRequest::builder()
        .tenant(acme())
        .left_table(orders())
        .right_table("nope")
        .left_key("customerId")
        .right_key("id")
        .build();
    assert!(matches!(store.join_tables(&request), Err(TableError::TableNotFound { .. })));
}
