//! Tabula command line.
//!
//! Runs one table operation against a data directory and prints the result
//! to stdout as JSON. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Create a table with an index and write a row
//! tabula --data /tmp/tabula create-table orders --index byStatus=status
//! tabula --data /tmp/tabula put orders o-1 '{"status":"pending","total":3}'
//!
//! # Page through one index bucket
//! tabula --data /tmp/tabula select orders --index byStatus --prefix '["pending"]' --limit 10
//!
//! # Environment variables fill in global flags
//! TABULA_DATA=/tmp/tabula TABULA_TENANT=acme tabula get orders o-1
//! ```

mod commands;
mod config;
mod error;

use std::{io::IsTerminal, process::ExitCode};

use clap::Parser;
use commands::Session;
use config::{Cli, Command, ConfigAction, LogFormat};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // clap handles --help and --version
    let cli = Cli::parse();

    // Config helpers never touch the data directory.
    if let Command::Config { action } = cli.command {
        let rendered = match action {
            ConfigAction::Schema => config::config_schema(),
            ConfigAction::Example => config::config_example(),
        };
        return match rendered {
            Ok(text) => {
                print!("{text}");
                ExitCode::SUCCESS
            },
            Err(e) => fail(&e),
        };
    }

    init_logging(cli.log_format);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

async fn run(cli: &Cli) -> error::Result<()> {
    let config = config::load_config(cli.config.as_deref())?;
    tracing::debug!(
        data_dir = %cli.data.display(),
        tenant = %cli.tenant,
        "Opening data directory"
    );

    let session = Session::open(&cli.data, &cli.tenant, config)?;
    let outcome = session.execute(&cli.command);
    // Close before surfacing a command error.
    let closed = session.close().await;
    let value = outcome?;
    closed?;

    let text = serde_json::to_string_pretty(&value)
        .map_err(|e| error::RenderSnafu { message: e.to_string() }.build())?;
    println!("{text}");
    Ok(())
}

fn fail(error: &error::CliError) -> ExitCode {
    tracing::error!(error = %error, "Command failed");
    eprintln!("error: {error}");
    ExitCode::FAILURE
}

/// Initializes logging on stderr.
///
/// `RUST_LOG` overrides the default `warn` filter. `Auto` picks JSON when
/// stderr is not a terminal.
fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let use_json = match format {
        LogFormat::Json => true,
        LogFormat::Text => false,
        LogFormat::Auto => !std::io::stderr().is_terminal(),
    };

    if use_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
