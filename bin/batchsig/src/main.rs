//! Batch-signature devnet runner
//!
//! Runs a set of in-process validators through the full block pipeline and
//! prints the latest batch with the signatures collected for it.
//!
//! Usage:
//!   batchsig devnet --powers 333,334,333 --blocks 100
//!   batchsig config > batching.toml

use std::path::PathBuf;

use batchsig_node::Devnet;
use batchsig_primitives::BatchingConfig;
use batchsig_store::BatchQuery;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Batch-signature devnet
#[derive(Debug, Parser)]
#[command(name = "batchsig")]
#[command(about = "Run the batch-signature module on an in-process devnet")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run an in-process validator set
    Devnet(DevnetArgs),
    /// Print the default configuration as TOML
    Config,
}

#[derive(Debug, clap::Args)]
struct DevnetArgs {
    /// Voting power of each validator
    #[arg(long, value_delimiter = ',', default_value = "333,334,333")]
    powers: Vec<u64>,

    /// Number of blocks to execute
    #[arg(long, short = 'n', default_value = "100")]
    blocks: u64,

    /// Data results posted per block
    #[arg(long, default_value = "1")]
    results_per_block: usize,

    /// Configuration file (`.toml` or `.json`)
    #[arg(long, env = "BATCHSIG_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    match Cli::parse().command {
        Command::Devnet(args) => run_devnet(args),
        Command::Config => {
            print!("{}", BatchingConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

fn run_devnet(args: DevnetArgs) -> eyre::Result<()> {
    if args.powers.is_empty() {
        eyre::bail!("at least one validator is required");
    }
    let config = match &args.config {
        Some(path) => BatchingConfig::load(path)?,
        None => BatchingConfig::default(),
    };

    info!(
        target: "batchsig::cli",
        validators = args.powers.len(),
        blocks = args.blocks,
        results_per_block = args.results_per_block,
        "Starting devnet"
    );

    let mut devnet = Devnet::new(config, &args.powers)?;
    let mut batches = 0u64;
    let mut signatures = 0usize;
    for _ in 0..args.blocks {
        let summary = devnet.run_block(args.results_per_block)?;
        if let Some(batch) = &summary.batch {
            batches += 1;
            info!(
                target: "batchsig::cli",
                height = summary.height,
                batch_number = batch.batch_number,
                batch_id = %batch.batch_id,
                "Batch created"
            );
        }
        signatures += summary.signatures_stored;
    }

    info!(target: "batchsig::cli", height = devnet.height(), batches, signatures, "Devnet finished");

    let node = devnet.node(0).ok_or_else(|| eyre::eyre!("devnet has no validators"))?;
    let latest = node.store().query_batch(BatchQuery::Latest)?;
    println!("{}", serde_json::to_string_pretty(&latest)?);
    Ok(())
}
