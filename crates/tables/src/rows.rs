//! Row and metadata records.
//!
//! Reads go straight to the substrate. Writes are only ever staged as
//! [`BatchOp`]s so they commit together with their index entries.

use snafu::ResultExt;
use tabula_store::{BatchOp, KvStore};
use tabula_types::{
    Row, RowId, TableId, TableMetadata, TenantId, decode, decode_json, encode, encode_json,
};

use crate::{
    error::{CodecSnafu, Result, StorageSnafu},
    keys::{metadata_key, row_key},
};

/// Row and metadata record access.
pub struct RowStore;

impl RowStore {
    /// Returns a row, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `TableError::Storage` if the read fails.
    /// Returns `TableError::Codec` if the stored payload cannot be decoded.
    pub fn get_row<K: KvStore>(
        kv: &K,
        tenant: &TenantId,
        table: &TableId,
        row_id: &RowId,
    ) -> Result<Option<Row>> {
        match kv.get(&row_key(tenant, table, row_id)).context(StorageSnafu)? {
            Some(bytes) => Ok(Some(Self::decode_row(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns a table's metadata, or `None` if the table does not exist.
    ///
    /// # Errors
    ///
    /// Returns `TableError::Storage` if the read fails.
    /// Returns `TableError::Codec` if the record is not valid metadata JSON.
    pub fn get_metadata<K: KvStore>(
        kv: &K,
        tenant: &TenantId,
        table: &TableId,
    ) -> Result<Option<TableMetadata>> {
        match kv.get(&metadata_key(tenant, table)).context(StorageSnafu)? {
            Some(bytes) => Ok(Some(decode_json(&bytes).context(CodecSnafu)?)),
            None => Ok(None),
        }
    }

    /// Decodes a stored row payload.
    ///
    /// # Errors
    ///
    /// Returns `TableError::Codec` if the payload is malformed.
    pub fn decode_row(bytes: &[u8]) -> Result<Row> {
        decode(bytes).context(CodecSnafu)
    }

    /// Stages a row write.
    ///
    /// # Errors
    ///
    /// Returns `TableError::Codec` if the row cannot be encoded.
    pub fn put_row_op(
        tenant: &TenantId,
        table: &TableId,
        row_id: &RowId,
        row: &Row,
    ) -> Result<BatchOp> {
        let payload = encode(row).context(CodecSnafu)?;
        Ok(BatchOp::put(row_key(tenant, table, row_id), payload))
    }

    /// Stages a row removal.
    pub fn delete_row_op(tenant: &TenantId, table: &TableId, row_id: &RowId) -> BatchOp {
        BatchOp::delete(row_key(tenant, table, row_id))
    }

    /// Stages a metadata write.
    ///
    /// # Errors
    ///
    /// Returns `TableError::Codec` if the metadata cannot be serialized.
    pub fn put_metadata_op(
        tenant: &TenantId,
        table: &TableId,
        metadata: &TableMetadata,
    ) -> Result<BatchOp> {
        let record = encode_json(metadata).context(CodecSnafu)?;
        Ok(BatchOp::put(metadata_key(tenant, table), record))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use tabula_store::MemoryKv;
    use tabula_types::{FieldValue, IndexDefinition};

    use super::*;

    #[test]
    fn test_row_write_then_read() {
        let kv = MemoryKv::new();
        let (tenant, table, row_id) = ("acme".into(), "orders".into(), "o-1".into());
        let row = Row::from([
            ("status".to_string(), FieldValue::from("pending")),
            ("total".to_string(), FieldValue::Float(12.5)),
        ]);

        assert!(RowStore::get_row(&kv, &tenant, &table, &row_id).unwrap().is_none());
        kv.batch(vec![RowStore::put_row_op(&tenant, &table, &row_id, &row).unwrap()]).unwrap();
        assert_eq!(RowStore::get_row(&kv, &tenant, &table, &row_id).unwrap(), Some(row));

        kv.batch(vec![RowStore::delete_row_op(&tenant, &table, &row_id)]).unwrap();
        assert!(RowStore::get_row(&kv, &tenant, &table, &row_id).unwrap().is_none());
    }

    #[test]
    fn test_metadata_is_a_json_text_record() {
        let kv = MemoryKv::new();
        let (tenant, table) = ("acme".into(), "orders".into());
        let metadata = TableMetadata::default()
            .with_index(IndexDefinition::new("byStatus", ["status"]));

        let op = RowStore::put_metadata_op(&tenant, &table, &metadata).unwrap();
        let BatchOp::Put { value, .. } = &op else { panic!("expected a put") };
        let text = std::str::from_utf8(value).unwrap();
        assert!(text.contains("\"byStatus\""));

        kv.batch(vec![op]).unwrap();
        assert_eq!(RowStore::get_metadata(&kv, &tenant, &table).unwrap(), Some(metadata));
    }

    #[test]
    fn test_corrupt_payload_is_a_codec_error() {
        let err = RowStore::decode_row(&[0xFF, 0xFF, 0xFF]).unwrap_err();
        assert!(matches!(err, crate::TableError::Codec { .. }));
    }
}
