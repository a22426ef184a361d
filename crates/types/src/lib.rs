//! Core types, codec, and configuration for Tabula.
//!
//! This crate provides the foundational types shared by the store and the
//! table layer:
//! - Identifier newtypes (TenantId, TableId, RowId)
//! - Row payloads and field values
//! - Table metadata (index definitions)
//! - Query descriptions (filters, ordering)
//! - Postcard/JSON codec with snafu errors
//! - Validated configuration structs

#![deny(unsafe_code)]

pub mod codec;
pub mod config;
pub mod types;

pub use codec::{CodecError, decode, decode_json, encode, encode_json};
pub use types::*;
