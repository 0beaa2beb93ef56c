//! CLI entry point for running scenarios against a local cluster.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use replicant_cluster::config::{self, ClusterConfig};
use replicant_cluster::{Cluster, Scenario};

#[derive(Parser)]
#[command(name = "replicant-cluster")]
#[command(about = "Run a master and its slaves in-process and exercise replication")]
struct Cli {
    /// Config file prefix (default: replicant).
    #[arg(short, long, default_value = "replicant")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the cluster, run a scenario, verify, and shut down.
    Run {
        scenario: Scenario,

        /// Override the configured data directory.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Override the configured number of slaves.
        #[arg(long)]
        slaves: Option<usize>,

        /// Discard any existing cluster data first.
        #[arg(long)]
        fresh: bool,
    },
    /// Compare the persisted slave stores with the master's, offline.
    Verify {
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let mut cluster_config = config::load(&cli.config)?;

    match cli.command {
        Command::Run {
            scenario,
            data_dir,
            slaves,
            fresh,
        } => {
            apply_overrides(&mut cluster_config, data_dir, slaves);
            cluster_config.slaves = cluster_config.slaves.max(scenario.slaves_required());

            let mut cluster = Cluster::with_config(&cluster_config, fresh).await?;
            while cluster.slaves().len() < scenario.slaves_required() {
                cluster.join_slave().await?;
            }
            let report = scenario.run(&cluster).await?;
            cluster.verify_online()?;
            let dir = cluster_config.data_path();
            cluster.shutdown()?;
            let verification = Cluster::verify_offline(&dir)?;

            let output = serde_json::json!({
                "scenario": report,
                "verification": verification,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Verify { data_dir } => {
            apply_overrides(&mut cluster_config, data_dir, None);
            let report = Cluster::verify_offline(&cluster_config.data_path())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn apply_overrides(config: &mut ClusterConfig, data_dir: Option<PathBuf>, slaves: Option<usize>) {
    if let Some(dir) = data_dir {
        config.data_dir = dir.display().to_string();
    }
    if let Some(slaves) = slaves {
        config.slaves = slaves;
    }
}
