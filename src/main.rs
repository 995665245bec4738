// privmesh-node - runs a privacy transaction node

use clap::{Parser, Subcommand};
use privmesh::enclave::KeyStoreEnclave;
use privmesh::identity::KeyPair;
use privmesh::p2p::{self, AppState, HttpP2pClient, DEFAULT_REQUEST_TIMEOUT};
use privmesh::storage::MeshStore;
use privmesh::sync::{GossipPoller, PeerDirectory};
use privmesh::transaction::TransactionManager;
use privmesh::NodeConfig;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "privmesh-node")]
#[command(version, about = "Privacy transaction node", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "PRIVMESH_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a fresh key pair as config entries
    Keygen,

    /// Start the node
    Run {
        /// Path to the TOML config file
        #[arg(short, long, env = "PRIVMESH_CONFIG")]
        config: PathBuf,

        /// Override the advertised server URL
        #[arg(long)]
        server_url: Option<String>,

        /// Override the storage directory
        #[arg(long)]
        storage_path: Option<PathBuf>,
    },
}

fn setup_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn keygen() {
    let pair = KeyPair::generate();
    println!("[[keys]]");
    println!("public_key = \"{}\"", pair.public_key().to_base64());
    println!("private_key = \"{}\"", pair.private_base64());
}

async fn run(config: NodeConfig) -> Result<(), Box<dyn Error>> {
    let key_pairs = config.key_pairs()?;
    let own_keys: Vec<_> = key_pairs.iter().map(KeyPair::public_key).collect();
    let enclave = KeyStoreEnclave::new(key_pairs)
        .ok_or("No keys configured")?
        .with_forwarding_keys(config.forwarding_keys()?);
    let enclave = Arc::new(enclave);

    let store = Arc::new(MeshStore::open(&config.storage_path)?);
    let directory = Arc::new(PeerDirectory::new(config.directory_config(), own_keys));
    let client = Arc::new(HttpP2pClient::new(directory.clone(), DEFAULT_REQUEST_TIMEOUT)?);

    let manager = Arc::new(TransactionManager::new(
        enclave,
        store.clone(),
        store.clone(),
        client.clone(),
        config.enable_enhanced_privacy,
    ));

    info!(
        server_url = %directory.own_url(),
        bind_address = %config.bind_address,
        peers = config.peers.len(),
        enhanced_privacy = config.enable_enhanced_privacy,
        "Starting privmesh node"
    );

    let (poller_shutdown, poller_rx) = mpsc::channel(1);
    let poller = Arc::new(GossipPoller::new(directory.clone(), client).with_poll_interval(config.poll_interval()));
    let poller_task = tokio::spawn(poller.run(poller_rx));

    let state = AppState { manager, directory };
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
    };
    p2p::serve(config.bind_address, state, shutdown).await?;

    let _ = poller_shutdown.send(()).await;
    let _ = poller_task.await;
    store.flush()?;
    info!("Node stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    match cli.command {
        Command::Keygen => keygen(),
        Command::Run {
            config,
            server_url,
            storage_path,
        } => {
            let mut config = NodeConfig::load(&config)?;
            if let Some(url) = server_url {
                config.server_url = url;
            }
            if let Some(path) = storage_path {
                config.storage_path = path;
            }
            run(config).await?;
        }
    }

    Ok(())
}
