//! powchain node CLI
//!
//! Runs a ledger node with its HTTP API, or inspects a checkpoint offline.

use clap::{Parser, Subcommand};
use powchain::api::{create_router, ApiState};
use powchain::core::{audit_chain, DEFAULT_DIFFICULTY};
use powchain::network::{Node, NodeConfig};
use powchain::storage::{chain_integrity_hash, CheckpointConfig, CheckpointStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "powchain")]
#[command(version = "0.1.0")]
#[command(about = "A proof-of-work ledger node with longest-chain consensus", long_about = None)]
struct Cli {
    /// Directory holding the ledger checkpoint
    #[arg(short, long, default_value = ".powchain_data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node and serve the HTTP API
    Start {
        /// Interface to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind
        #[arg(short, long, default_value = "5000")]
        port: u16,

        /// URL peers should use to reach this node
        #[arg(long)]
        advertise: Option<String>,

        /// Bootstrap peers (comma-separated)
        #[arg(long, value_delimiter = ',')]
        peers: Vec<String>,

        /// Start the background miner, paying rewards to this address
        #[arg(short, long)]
        mine: Option<String>,

        /// Difficulty for a freshly created ledger
        #[arg(long, default_value_t = DEFAULT_DIFFICULTY)]
        difficulty: u32,
    },

    /// Validate the stored chain without starting a node
    Validate,

    /// Show the metadata of the stored checkpoint
    CheckpointInfo,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            host,
            port,
            advertise,
            peers,
            mine,
            difficulty,
        } => {
            let config = NodeConfig {
                host,
                port,
                advertised_url: advertise,
                bootstrap_peers: peers,
                data_dir: cli.data_dir,
                difficulty,
                ..Default::default()
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_node(config, mine))
        }
        Commands::Validate => cmd_validate(&cli.data_dir),
        Commands::CheckpointInfo => cmd_checkpoint_info(&cli.data_dir),
    }
}

async fn run_node(
    config: NodeConfig,
    mine: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.host, config.port);
    let node = Arc::new(Node::new(config).await?);

    let background = node.start_background().await;

    if let Some(address) = mine {
        if node.start_mining(&address).await? {
            log::info!("Background mining started for {}", address);
        }
    }

    let app = create_router(ApiState::new(node.clone()));

    println!("⛓️  powchain node {}", node.node_id);
    println!("   Listening on http://{}", addr);
    println!("   Advertised as {}", node.config.url());
    println!("   Data directory: {:?}", node.config.data_dir);
    println!();

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            println!("\n📴 Shutting down node...");
        })
        .await?;

    for handle in background {
        handle.abort();
    }
    node.shutdown().await;
    println!("💾 Checkpoint saved.");

    Ok(())
}

fn open_store(data_dir: &Path) -> Result<CheckpointStore, Box<dyn std::error::Error>> {
    Ok(CheckpointStore::new(CheckpointConfig::in_dir(data_dir))?)
}

fn cmd_validate(data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(data_dir)?;
    let Some((snapshot, metadata)) = store.load()? else {
        println!("❌ No checkpoint found in {:?}", data_dir);
        return Ok(());
    };

    let report = audit_chain(&snapshot.chain);
    let integrity_ok = chain_integrity_hash(&snapshot.chain) == metadata.blockchain_hash;

    println!("🔍 Chain validation");
    println!("   Blocks: {}", snapshot.chain.len());
    println!("   Pending transactions: {}", snapshot.pending_transactions.len());
    println!(
        "   Integrity hash: {}",
        if integrity_ok { "matches" } else { "MISMATCH" }
    );

    if report.valid && integrity_ok {
        println!("✅ Chain is valid");
    } else {
        println!("❌ Chain has {} issue(s):", report.issues.len());
        for issue in &report.issues {
            println!("   - {}", issue);
        }
    }

    Ok(())
}

fn cmd_checkpoint_info(data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(data_dir)?;
    let Some(metadata) = store.load_metadata()? else {
        println!("❌ No checkpoint found in {:?}", data_dir);
        return Ok(());
    };

    println!("💾 Checkpoint in {:?}", store.data_dir());
    println!("   Reason: {}", metadata.reason);
    println!("   Created: {:.3}", metadata.timestamp);
    println!("   Chain length: {}", metadata.chain_length);
    println!("   Difficulty: {}", metadata.difficulty);
    println!("   Pending transactions: {}", metadata.pending_transactions);
    println!("   Chain hash: {}", metadata.blockchain_hash);
    println!("   Format version: {}", metadata.version);

    Ok(())
}
