//! Fuzz target for table key decoding.
//!
//! Decoders must never panic on arbitrary bytes, and keys built from
//! arbitrary components must decode back to the same components.

#![no_main]

use libfuzzer_sys::fuzz_target;

use tabula_tables::keys::{
    decode_index_key, encode_field_values, index_key, row_id_from_row_key, row_key,
    tenant_of_key,
};
use tabula_types::{FieldValue, RowId, TableId, TenantId};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let selector = data[0] % 3;
    let payload = &data[1..];

    match selector {
        0 => fuzz_decode_arbitrary(payload),
        1 => fuzz_row_key(payload),
        _ => fuzz_index_key(payload),
    }
});

fn fuzz_decode_arbitrary(data: &[u8]) {
    let _ = tenant_of_key(data);
    let _ = row_id_from_row_key(data);
    let _ = decode_index_key(data);
}

/// Splits the payload into four strings on `|`, keeping NULs inside them.
fn components(data: &[u8]) -> Option<[String; 4]> {
    let text = std::str::from_utf8(data).ok()?;
    let mut parts = text.splitn(4, '|').map(str::to_string);
    Some([parts.next()?, parts.next()?, parts.next()?, parts.next()?])
}

fn fuzz_row_key(data: &[u8]) {
    let Some([tenant, table, row_id, _]) = components(data) else { return };
    let key = row_key(&TenantId::new(&tenant), &TableId::new(&table), &RowId::new(&row_id));

    assert_eq!(tenant_of_key(&key).as_ref().map(TenantId::as_str), Some(tenant.as_str()));
    assert_eq!(row_id_from_row_key(&key).as_ref().map(RowId::as_str), Some(row_id.as_str()));
    assert!(decode_index_key(&key).is_none(), "row key decoded as index key");
}

fn fuzz_index_key(data: &[u8]) {
    let Some([tenant, table, index, rest]) = components(data) else { return };
    let values: Vec<FieldValue> = rest
        .split(',')
        .map(|part| match part.parse::<i64>() {
            Ok(n) => FieldValue::Int(n),
            Err(_) => FieldValue::Text(part.to_string()),
        })
        .collect();
    let composite = encode_field_values(&values);
    let row_id = RowId::new(rest.clone());
    let (tenant_id, table_id) = (TenantId::new(&tenant), TableId::new(&table));
    let key = index_key(&tenant_id, &table_id, &index, &composite, &row_id);

    let decoded = decode_index_key(&key).expect("built index key decodes");
    assert_eq!(decoded.tenant.as_str(), tenant);
    assert_eq!(decoded.table.as_str(), table);
    assert_eq!(decoded.index, index);
    assert_eq!(decoded.composite, composite);
    assert_eq!(decoded.row_id, row_id);
}
