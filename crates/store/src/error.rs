//! Error types for the key-value substrate and persistence engine.

use std::{io, path::PathBuf};

use snafu::Snafu;
use tabula_types::config::ConfigError;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the substrate.
///
/// The table layer propagates these unchanged; it never retries them.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// I/O error while touching a layer, WAL, or directory.
    #[snafu(display("I/O error at {}: {source}", path.display()))]
    Io {
        /// File or directory being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// A persisted file holds a line that cannot be parsed.
    #[snafu(display("Corrupted file {} at line {line}: {reason}", path.display()))]
    Corrupted {
        /// The offending file.
        path: PathBuf,
        /// One-based line number.
        line: usize,
        /// Description of what was wrong.
        reason: String,
    },

    /// The engine was opened with an invalid configuration.
    #[snafu(display("Invalid store configuration: {source}"))]
    Config {
        /// The validation failure.
        source: ConfigError,
    },
}
