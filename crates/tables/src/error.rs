//! Error types for table, index, query, and join operations.

use snafu::Snafu;
use tabula_types::{CodecError, RowId, TableId, TenantId};

/// Result type alias for table operations.
pub type Result<T> = std::result::Result<T, TableError>;

/// Errors returned by [`TableStore`](crate::TableStore) operations.
///
/// An empty scan or join result is never an error.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TableError {
    /// The table has no metadata record.
    #[snafu(display("Table '{table}' not found for tenant '{tenant}'"))]
    TableNotFound {
        tenant: TenantId,
        table: TableId,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// The row does not exist.
    #[snafu(display("Row '{row_id}' not found in table '{table}' for tenant '{tenant}'"))]
    RowNotFound {
        tenant: TenantId,
        table: TableId,
        row_id: RowId,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// `create_table` was called for a table that already exists.
    #[snafu(display("Table '{table}' already exists for tenant '{tenant}'"))]
    TableExists {
        tenant: TenantId,
        table: TableId,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// A select named an index the table does not define.
    #[snafu(display("Index '{index}' is not defined on table '{table}'"))]
    IndexNotFound {
        table: TableId,
        index: String,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// An index name is already taken on the table.
    #[snafu(display("Index '{index}' is already defined on table '{table}'"))]
    DuplicateIndex {
        table: TableId,
        index: String,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// A cursor token could not be decoded or lies outside the scanned range.
    #[snafu(display("Invalid cursor: {reason}"))]
    InvalidCursor {
        reason: String,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// The join's build side grew past `max_join_build_rows`.
    #[snafu(display("Join build side of table '{table}' exceeds {limit} rows"))]
    JoinBuildTooLarge {
        table: TableId,
        limit: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// The key-value substrate failed. Propagated unchanged, never retried.
    #[snafu(display("Storage error: {source}"))]
    Storage {
        source: tabula_store::Error,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// A row payload or metadata record could not be encoded or decoded.
    #[snafu(display("Codec error: {source}"))]
    Codec {
        source: CodecError,
        #[snafu(implicit)]
        location: snafu::Location,
    },
}
