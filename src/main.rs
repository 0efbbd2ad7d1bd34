use anyhow::{anyhow, Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audit_anchor::anchor::{
    run_periodic, AnchorScheduler, BatchManager, ChainAnchorer, GatewayChainAnchorer,
};
use audit_anchor::audit::{verify_proof, AuditLogger, Proof};
use audit_anchor::config::AppConfig;
use audit_anchor::database::{AuditStore, Database};

fn cli() -> Command {
    let actor = Arg::new("actor")
        .short('a')
        .long("actor")
        .value_name("ACTOR")
        .help("Actor whose records to inspect")
        .required(true);

    Command::new("audit-anchor")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Tamper-evident audit chains with periodic on-chain anchoring")
        .subcommand_required(true)
        .subcommand(Command::new("run").about("Run the anchor scheduler until interrupted"))
        .subcommand(Command::new("sweep").about("Run a single anchor sweep and print the report"))
        .subcommand(
            Command::new("verify-chain")
                .about("Verify an actor's hash chain")
                .arg(actor.clone())
                .arg(
                    Arg::new("limit")
                        .short('n')
                        .long("limit")
                        .value_name("N")
                        .help("Number of most recent entries to verify")
                        .value_parser(value_parser!(i64))
                        .default_value("1000"),
                ),
        )
        .subcommand(
            Command::new("prove")
                .about("Print the inclusion proof for an entry in a batch")
                .arg(actor.clone())
                .arg(
                    Arg::new("batch")
                        .short('b')
                        .long("batch")
                        .value_name("ID")
                        .required(true),
                )
                .arg(
                    Arg::new("entry")
                        .short('e')
                        .long("entry")
                        .value_name("HASH")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("verify-proof")
                .about("Verify a JSON inclusion proof offline")
                .arg(
                    Arg::new("root")
                        .short('r')
                        .long("root")
                        .value_name("HASH")
                        .required(true),
                )
                .arg(
                    Arg::new("leaf")
                        .short('l')
                        .long("leaf")
                        .value_name("HASH")
                        .required(true),
                )
                .arg(
                    Arg::new("proof")
                        .short('p')
                        .long("proof")
                        .value_name("FILE")
                        .help("Path to the proof JSON")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("batches")
                .about("List an actor's batches, newest first")
                .arg(actor)
                .arg(
                    Arg::new("limit")
                        .short('n')
                        .long("limit")
                        .value_name("N")
                        .value_parser(value_parser!(i64))
                        .default_value("20"),
                )
                .arg(
                    Arg::new("offset")
                        .long("offset")
                        .value_name("M")
                        .value_parser(value_parser!(i64))
                        .default_value("0"),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audit_anchor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("verify-proof", args)) => verify_proof_file(args),
        Some((name, args)) => {
            let config = AppConfig::load().context("Failed to load configuration")?;
            let database = Database::new(&config.database_url)
                .await
                .context("Failed to open database")?;
            let store: Arc<dyn AuditStore> = Arc::new(database);

            match name {
                "run" => run_scheduler(&config, store).await,
                "sweep" => sweep(&config, store).await,
                "verify-chain" => verify_chain(store, args).await,
                "prove" => prove(store, args).await,
                "batches" => list_batches(store, args).await,
                other => Err(anyhow!("Unknown command: {}", other)),
            }
        }
        None => Err(anyhow!("No command given")),
    }
}

fn chain_client(config: &AppConfig) -> Result<Option<Arc<dyn ChainAnchorer>>> {
    let client = GatewayChainAnchorer::from_config(&config.chain)?;
    if client.is_none() {
        warn!("No anchoring gateway configured; batches will be built but not anchored");
    }
    Ok(client.map(|c| Arc::new(c) as Arc<dyn ChainAnchorer>))
}

async fn run_scheduler(config: &AppConfig, store: Arc<dyn AuditStore>) -> Result<()> {
    let scheduler = AnchorScheduler::new(store, chain_client(config)?, config.anchor.clone())?;
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
            cancel.cancel();
        });
    }

    info!(
        interval_secs = config.anchor.interval_secs,
        window_secs = config.anchor.window_secs,
        "Starting audit anchor scheduler"
    );
    run_periodic(&scheduler, config.anchor.interval(), cancel).await;
    Ok(())
}

async fn sweep(config: &AppConfig, store: Arc<dyn AuditStore>) -> Result<()> {
    let scheduler = AnchorScheduler::new(store, chain_client(config)?, config.anchor.clone())?;
    let report = scheduler.run_once().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn verify_chain(store: Arc<dyn AuditStore>, args: &ArgMatches) -> Result<()> {
    let actor = required(args, "actor")?;
    let limit = args.get_one::<i64>("limit").copied().unwrap_or(1000);

    let logger = AuditLogger::new(store);
    let result = logger.verify_actor_chain(actor, limit).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.is_valid {
        return Err(anyhow!(result.summary()));
    }
    Ok(())
}

async fn prove(store: Arc<dyn AuditStore>, args: &ArgMatches) -> Result<()> {
    let actor = required(args, "actor")?;
    let batch_id = required(args, "batch")?;
    let entry = required(args, "entry")?;

    let (batch, proof) = BatchManager::new(store)
        .prove_entry(actor, batch_id, entry)
        .await?
        .ok_or_else(|| anyhow!("Batch {} not found for {}", batch_id, actor))?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "batchId": batch.id,
            "root": batch.root_hash,
            "anchorStatus": batch.anchor_status,
            "anchorTxHash": batch.anchor_tx_hash,
            "proof": proof,
        }))?
    );
    Ok(())
}

fn verify_proof_file(args: &ArgMatches) -> Result<()> {
    let root = required(args, "root")?;
    let leaf = required(args, "leaf")?;
    let path = required(args, "proof")?;

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read proof file: {}", path))?;
    let mut value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid JSON in {}", path))?;
    // Accept both a bare proof and the output of `prove`.
    if value.get("proof").is_some() {
        value = value["proof"].take();
    }
    let proof: Proof = serde_json::from_value(value)
        .with_context(|| format!("Invalid proof in {}", path))?;

    if !verify_proof(root, leaf, &proof) {
        return Err(anyhow!("Proof does not link {} to root {}", leaf, root));
    }
    println!("✓ Proof valid ({} steps)", proof.size());
    Ok(())
}

async fn list_batches(store: Arc<dyn AuditStore>, args: &ArgMatches) -> Result<()> {
    let actor = required(args, "actor")?;
    let limit = args.get_one::<i64>("limit").copied().unwrap_or(20);
    let offset = args.get_one::<i64>("offset").copied().unwrap_or(0);

    let batches = BatchManager::new(store)
        .list_batches(actor, limit, offset)
        .await?;
    println!("{}", serde_json::to_string_pretty(&batches)?);
    Ok(())
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a str> {
    args.get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("Missing --{}", name))
}
