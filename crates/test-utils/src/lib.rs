//! Shared test utilities for Tabula crates.
//!
//! This crate provides common test helpers to reduce boilerplate across test modules:
//!
//! - [`TestDir`] - Managed temporary directory with path and fault helpers
//! - [`assert_eventually`] - Poll a condition until it's true or timeout
//! - [`test_store_config`] - Fast, fsync-free persistence configuration
//! - [`test_query_config`] - Query configuration with a small join limit
//! - [`strategies`] - Proptest generators for rows, filters, and mutations

#![deny(unsafe_code)]
// Test utilities are allowed to use unwrap for simplicity
#![cfg_attr(test, allow(clippy::disallowed_methods))]

mod test_dir;
pub use test_dir::TestDir;

mod assertions;
pub use assertions::assert_eventually;

mod config;
pub use config::{test_query_config, test_store_config};

pub mod strategies;
