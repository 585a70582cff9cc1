//! pgsourced — the pgsource daemon.
//!
//! Single binary that assembles:
//! - Resource store (redb)
//! - PostgreSQL pool (sqlx, lazily connected)
//! - Reconcile controller
//! - REST API
//!
//! # Usage
//!
//! ```text
//! pgsourced run --config /etc/pgsource/pgsource.toml
//! pgsourced render --name mypostgres --uid d049318d-72c6-45e3-b8be-b0d4a38e82ad --table orders
//! ```

mod daemon;
mod render;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,pgsourced=debug,pgsource=debug";

#[derive(Parser)]
#[command(name = "pgsourced", about = "PostgreSQL change-data-capture controller")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller and API server.
    Run {
        /// Path to pgsource.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// API port (overrides `api.port`).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides `data_dir`).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Print the DDL a pipeline would apply. Does not touch any database.
    Render {
        /// Pipeline name.
        #[arg(long)]
        name: String,

        /// Pipeline UID.
        #[arg(long)]
        uid: String,

        /// Tables to capture (repeatable).
        #[arg(long = "table")]
        tables: Vec<String>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
        } => daemon::run(config, port, data_dir).await,
        Command::Render { name, uid, tables } => {
            print!("{}", render::render_ddl(&name, &uid, &tables)?);
            Ok(())
        }
    }
}
