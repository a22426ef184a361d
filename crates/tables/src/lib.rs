//! Tenant-scoped tables for Tabula.
//!
//! This crate sits on top of the [`KvStore`](tabula_store::KvStore)
//! capability and provides:
//!
//! - Escaped, order-preserving key layout for metadata, rows, and index entries
//! - Row and metadata records (postcard payloads, JSON metadata)
//! - Secondary indexes maintained atomically with every row write
//! - Filtered, cursor-paginated selects over a table or an index
//! - An equality inner join with a bounded in-memory build side
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tabula_store::MemoryKv;
//! use tabula_tables::{SelectRequest, TableStore};
//! use tabula_types::{FieldValue, IndexDefinition, Row, TableMetadata};
//!
//! # fn main() -> Result<(), tabula_tables::TableError> {
//! let store = TableStore::new(Arc::new(MemoryKv::new()));
//! let (tenant, table) = ("acme".into(), "orders".into());
//! let metadata =
//!     TableMetadata::default().with_index(IndexDefinition::new("byStatus", ["status"]));
//! store.create_table(&tenant, &table, metadata)?;
//!
//! let row = Row::from([("status".to_string(), FieldValue::from("pending"))]);
//! store.put_row(&tenant, &table, &"o-1".into(), row)?;
//!
//! let page = store.select_rows(
//!     &SelectRequest::builder()
//!         .tenant("acme")
//!         .table("orders")
//!         .index("byStatus")
//!         .index_prefix(vec![FieldValue::from("pending")])
//!         .limit(10)
//!         .build(),
//! )?;
//! assert_eq!(page.rows.len(), 1);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

mod error;
mod filter;
mod indexes;
pub mod join;
pub mod keys;
pub mod query;
mod rows;
mod store;

pub use error::{Result, TableError};
pub use filter::{matches, matches_all};
pub use indexes::IndexMaintainer;
pub use join::{DEFAULT_JOIN_LIMIT, JoinRequest, ROW_ID_COLUMN};
pub use keys::{IndexKey, TenantPartitioner};
pub use query::{Cursor, DEFAULT_SELECT_LIMIT, SelectRequest, SelectResult};
pub use rows::RowStore;
pub use store::TableStore;
