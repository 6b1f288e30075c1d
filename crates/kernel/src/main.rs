//! Quarry command-line tool.
//!
//! Compiles declarative query requests against a catalog, and optionally
//! runs them against PostgreSQL.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use quarry_kernel::cli;
use quarry_kernel::config::Config;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Catalog TOML file (defaults to QUARRY_CATALOG).
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a paged request and print its SQL.
    Compile {
        /// JSON request, `@path`, or `-` for stdin.
        request: String,
    },
    /// Compile an aggregate request and print its SQL.
    Aggregate {
        /// JSON request, `@path`, or `-` for stdin.
        request: String,
    },
    /// Print the contents of a pagination cursor.
    DecodeCursor { cursor: String },
    /// Execute a paged request against DATABASE_URL and print the connection.
    Run {
        /// JSON request, `@path`, or `-` for stdin.
        request: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        default_page_size = config.default_page_size,
        max_page_size = ?config.max_page_size,
        "configuration loaded"
    );

    let catalog = args.catalog.or_else(|| config.catalog_path.clone());
    let compiler = || -> Result<_> {
        let path = catalog
            .as_deref()
            .context("no catalog given; pass --catalog or set QUARRY_CATALOG")?;
        cli::load_compiler(path, config.paging_policy())
    };

    let output = match args.command {
        Command::Compile { request } => {
            cli::cmd_compile(&compiler()?, &cli::read_request(&request)?)?
        }
        Command::Aggregate { request } => {
            cli::cmd_aggregate(&compiler()?, &cli::read_request(&request)?)?
        }
        Command::DecodeCursor { cursor } => cli::cmd_decode_cursor(&cursor)?,
        Command::Run { request } => {
            cli::cmd_run(&config, compiler()?, &cli::read_request(&request)?).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,quarry_kernel=debug,sqlx=warn"));

    // Logs go to stderr so stdout stays valid JSON.
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
