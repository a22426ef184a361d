//! Errors surfaced by the command line.

use std::path::PathBuf;

use snafu::Snafu;
use tabula_tables::TableError;
use tabula_types::config::ConfigError;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("Failed to read config file {}: {source}", path.display()))]
    ReadConfig { path: PathBuf, source: std::io::Error },

    #[snafu(display("Failed to parse config file {}: {source}", path.display()))]
    ConfigParse { path: PathBuf, source: toml::de::Error },

    #[snafu(display("{source}"))]
    InvalidConfig { source: ConfigError },

    #[snafu(display("Failed to open data directory {}: {source}", path.display()))]
    Open { path: PathBuf, source: tabula_store::Error },

    #[snafu(display("Storage error: {source}"))]
    Store { source: tabula_store::Error },

    #[snafu(display("{source}"))]
    Table { source: TableError },

    #[snafu(display("Invalid argument: {message}"))]
    Input { message: String },

    #[snafu(display("Failed to render output: {message}"))]
    Render { message: String },
}
