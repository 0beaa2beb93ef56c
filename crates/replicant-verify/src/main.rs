//! CLI entry point for offline replica verification.
//!
//! Loads persisted member snapshots, compares each against the reference,
//! and writes a JSON report to stdout. Logs go to stderr.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use replicant_verify::offline::verify_dirs;
use replicant_verify::ConsistencyVerifier;

#[derive(Parser)]
#[command(name = "replicant-verify")]
#[command(about = "Verify that replica data directories match the master's")]
struct Cli {
    /// Data directory of the reference (master) store.
    #[arg(long)]
    reference: PathBuf,

    /// Data directories of the stores to check.
    #[arg(long, required = true, num_args = 1..)]
    other: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let report = verify_dirs(&ConsistencyVerifier::new(), &cli.reference, &cli.other)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
