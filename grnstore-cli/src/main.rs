//! grnstore command-line tool
//!
//! Operates on a local grnstore database file:
//! 1. Write, read, list and tombstone entities
//! 2. Inspect history, references and the folder tree
//! 3. Run repair passes (tree rebuild, reconciliation)
//!
//! Usage:
//!   grnstore --db store.db put -t 7 dashboard dash-1 --body dash.json --folder team-a
//!   grnstore --db store.db list -t 7 --folder team-a --subtree
//!
//! Output is JSON on stdout; logs go to stderr (`RUST_LOG` overrides the level).

use anyhow::Result;
use clap::Parser;
use grnstore_cli::{load_config, open_store, run, Command};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "grnstore")]
#[command(about = "Multi-tenant versioned entity store")]
struct Args {
    /// Path to the database file
    #[arg(short, long, default_value = "grnstore.db")]
    db: PathBuf,

    /// JSON file with store settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = load_config(args.config.as_deref())?;
    debug!(?config, db = %args.db.display(), "opening store");
    let store = open_store(&args.db, config)?;

    let output = run(&store, args.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
