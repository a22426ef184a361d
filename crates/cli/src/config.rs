//! Command-line arguments and configuration loading.
//!
//! Every global flag has a `TABULA_*` environment fallback; flags win over
//! the environment. Engine settings come from an optional TOML file shaped
//! like [`TabulaConfig`].

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use snafu::ResultExt;
use tabula_types::config::TabulaConfig;

use crate::error::{ConfigParseSnafu, InvalidConfigSnafu, ReadConfigSnafu, RenderSnafu, Result};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
    /// JSON when stderr is not a terminal, text otherwise.
    Auto,
}

/// tabula: operate on a Tabula data directory.
#[derive(Debug, Parser)]
#[command(name = "tabula", about = "Embedded multi-tenant tabular store", version)]
pub struct Cli {
    /// Data directory holding tenant layer files and WALs.
    #[arg(long, env = "TABULA_DATA", global = true, default_value = "./tabula-data")]
    pub data: PathBuf,

    /// TOML configuration file.
    #[arg(long, env = "TABULA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Tenant every table command runs as.
    #[arg(long, env = "TABULA_TENANT", global = true, default_value = "default")]
    pub tenant: String,

    /// Log format written to stderr.
    #[arg(long, env = "TABULA_LOG_FORMAT", global = true, value_enum, default_value = "auto")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands. Results are printed to stdout as JSON.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a table, optionally with indexes.
    CreateTable {
        table: String,
        /// Index as `NAME=FIELD[,FIELD...]`; repeatable.
        #[arg(long = "index", value_name = "NAME=FIELDS")]
        indexes: Vec<String>,
    },
    /// Add an index to a table and backfill it.
    CreateIndex {
        table: String,
        name: String,
        /// Indexed fields, in order.
        #[arg(required = true, num_args = 1..)]
        fields: Vec<String>,
    },
    /// Write a row from a JSON object, replacing any previous payload.
    Put { table: String, row_id: String, json: String },
    /// Shallow-merge a JSON object into an existing row.
    Update { table: String, row_id: String, json: String },
    /// Delete a row.
    Delete { table: String, row_id: String },
    /// Read a row.
    Get { table: String, row_id: String },
    /// Filtered, paginated scan.
    Select {
        table: String,
        /// Index to scan.
        #[arg(long)]
        index: Option<String>,
        /// JSON array of equality values for the index's leading fields.
        #[arg(long, requires = "index")]
        prefix: Option<String>,
        /// JSON array of `{"column", "op", "value"}` filters.
        #[arg(long = "where")]
        filters: Option<String>,
        /// Cursor token from a previous page.
        #[arg(long)]
        after: Option<String>,
        #[arg(long, default_value_t = tabula_tables::DEFAULT_SELECT_LIMIT)]
        limit: usize,
        /// Column to sort the page by.
        #[arg(long)]
        order_by: Option<String>,
        /// Sort descending.
        #[arg(long, requires = "order_by")]
        desc: bool,
    },
    /// Equality inner join.
    Join {
        left: String,
        right: String,
        /// Join condition as `LEFT_KEY=RIGHT_KEY`.
        #[arg(long)]
        on: String,
        /// JSON filter array for the left table.
        #[arg(long)]
        where_left: Option<String>,
        /// JSON filter array for the right table.
        #[arg(long)]
        where_right: Option<String>,
        #[arg(long, default_value_t = tabula_tables::DEFAULT_JOIN_LIMIT)]
        limit: usize,
    },
    /// Write pending mutations to layer files.
    Flush,
    /// Merge every over-full layer now.
    Compact,
    /// Configuration helpers.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// `config` subcommands.
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ConfigAction {
    /// Print the JSON schema of the configuration file.
    Schema,
    /// Print a configuration file with every default filled in.
    Example,
}

/// Loads and validates the configuration file, or returns defaults.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid TOML for
/// [`TabulaConfig`], or fails validation.
pub fn load_config(path: Option<&Path>) -> Result<TabulaConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).context(ReadConfigSnafu { path })?;
            toml::from_str::<TabulaConfig>(&text).context(ConfigParseSnafu { path })?
        },
        None => TabulaConfig::default(),
    };
    config.validate().context(InvalidConfigSnafu)?;
    Ok(config)
}

/// JSON schema of [`TabulaConfig`].
pub fn config_schema() -> Result<String> {
    let schema = schemars::schema_for!(TabulaConfig);
    serde_json::to_string_pretty(&schema)
        .map_err(|e| RenderSnafu { message: e.to_string() }.build())
}

/// Default configuration rendered as TOML.
pub fn config_example() -> Result<String> {
    toml::to_string_pretty(&TabulaConfig::default())
        .map_err(|e| RenderSnafu { message: e.to_string() }.build())
}
