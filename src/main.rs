//! txlife - transaction lifecycle command line client
//!
//! Fetch anchors, look up signature statuses, explain program logs, and run a
//! full prepare/simulate/submit/confirm cycle with a memo transaction.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    signature::Signature,
    signer::{keypair::read_keypair_file, Signer},
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{error, info, warn};

use tx_lifecycle::{
    config::LifecycleConfig,
    endpoints,
    logs::render_frames,
    structured_logging::init_logging,
    transport::{RpcTransport, Transport},
    Durability, EnvelopeId, ExecutionError, LifecycleClient, LogInterpreter,
};

const MEMO_PROGRAM_ID: solana_sdk::pubkey::Pubkey =
    solana_sdk::pubkey!("MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr");

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "txlife.toml", env = "TXLIFE_CONFIG")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a fresh anchor
    Anchor {
        #[arg(long)]
        level: Durability,
    },

    /// Look up the status of a signature on the first tier
    Status { signature: String },

    /// Reconstruct the call tree of a log file (one line per log entry)
    Explain {
        #[arg(long)]
        file: PathBuf,

        /// Execution error reported alongside the logs
        #[arg(long)]
        error: Option<String>,
    },

    /// Send a memo transaction through the full lifecycle
    Memo {
        #[arg(long)]
        keypair: PathBuf,

        #[arg(long)]
        message: String,

        /// Stop after simulation
        #[arg(long)]
        simulate_only: bool,

        /// Durability to wait for; defaults to the configured confirmation target
        #[arg(long)]
        target: Option<Durability>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // explain is offline and works without a config file
    if let Command::Explain { file, error } = &args.command {
        init_logging(&Default::default(), args.verbose)?;
        return explain(file, error.as_deref()).await;
    }

    let config = load_config(&args.config)?;
    init_logging(&config.logging, args.verbose)?;
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if config.monitoring.enable_metrics {
        let metrics_port = config.monitoring.metrics_port;
        info!("Starting metrics server on port {}", metrics_port);
        tokio::spawn(async move {
            if let Err(e) = endpoints::endpoint_server(metrics_port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    match args.command {
        Command::Anchor { level } => anchor(&config, level).await,
        Command::Status { signature } => status(&config, &signature).await,
        Command::Memo {
            keypair,
            message,
            simulate_only,
            target,
        } => {
            let target = target.unwrap_or(config.confirmation.target);
            memo(&config, &keypair, &message, simulate_only, target).await
        }
        Command::Explain { .. } => Ok(()),
    }
}

fn load_config(path: &Path) -> Result<LifecycleConfig> {
    LifecycleConfig::from_file_with_env(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

async fn anchor(config: &LifecycleConfig, level: Durability) -> Result<()> {
    let client = LifecycleClient::from_config(config)?;
    let anchor = client.anchors().fetch(level).await?;

    println!("blockhash:      {}", anchor.value);
    println!("fetched at:     {}", anchor.fetched_at_height);
    println!("expiry height:  {}", anchor.expiry_height);
    println!(
        "window:         {} heights",
        anchor.remaining(anchor.fetched_at_height).unwrap_or(0)
    );
    Ok(())
}

async fn status(config: &LifecycleConfig, signature: &str) -> Result<()> {
    let signature = Signature::from_str(signature).context("Invalid signature")?;
    let tier = config
        .tiers
        .first()
        .context("No tiers configured")?;
    let transport = RpcTransport::new(tier);

    match transport
        .signature_status(&EnvelopeId::Signature(signature))
        .await?
    {
        Some(status) => {
            println!("level: {}", status.level);
            println!("slot:  {}", status.slot);
            match status.err {
                Some(err) => println!("err:   {}", err),
                None => println!("err:   none"),
            }
        }
        None => println!("not found on {}", transport.name()),
    }
    Ok(())
}

async fn explain(file: &Path, error: Option<&str>) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let lines: Vec<&str> = content.lines().filter(|line| !line.trim().is_empty()).collect();
    let err = error.map(ExecutionError::new);

    let frames = LogInterpreter::parse(&lines, err.as_ref());
    print!("{}", render_frames(&frames));
    Ok(())
}

async fn memo(
    config: &LifecycleConfig,
    keypair: &Path,
    message: &str,
    simulate_only: bool,
    target: Durability,
) -> Result<()> {
    let payer = read_keypair_file(keypair)
        .map_err(|e| anyhow::anyhow!("Failed to read keypair {}: {}", keypair.display(), e))?;
    let client = LifecycleClient::from_config(config)?;

    let instruction = Instruction {
        program_id: MEMO_PROGRAM_ID,
        accounts: vec![AccountMeta::new_readonly(payer.pubkey(), true)],
        data: message.as_bytes().to_vec(),
    };

    let (mut envelope, anchor) = client
        .prepare(vec![instruction], payer.pubkey(), config.transaction.anchor_level)
        .await?;
    info!(expiry_height = anchor.expiry_height, "Envelope prepared");
    envelope.sign(&payer)?;

    let simulation = client.simulate(&envelope, &config.simulation.options()).await?;
    print!("{}", render_frames(&simulation.explain()));
    if let Some(limit) = simulation.suggested_compute_limit(
        config.simulation.compute_margin_pct,
        1_000,
        1_400_000,
    ) {
        println!("suggested compute limit: {}", limit);
    }
    if let Some(err) = &simulation.err {
        warn!(error = %err, "Simulation failed, not submitting");
        anyhow::bail!("simulation failed: {}", err);
    }
    if simulate_only {
        return Ok(());
    }

    let status = client
        .submit_and_confirm(&envelope, target, &config.broadcast.policy())
        .await?;

    println!("signature: {}", envelope.id()?.signature());
    println!("level:     {}", status.level);
    println!("slot:      {}", status.slot);
    Ok(())
}
