//! WolfMesh - Mesh Overlay Network over WireGuard
//!
//! Runs a node either as the server holding the authoritative peer list or
//! as a client converging its tunnel to the server's view.

use std::io::BufRead;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfmesh::config::{ClientConfig, ServerConfig, WolfMeshConfig};
use wolfmesh::crypto::{Key, KeyPair};
use wolfmesh::error::{Error, Result};
use wolfmesh::overlay::{OverlayState, TunnelFabric, WgFabric};
use wolfmesh::snapshot::{register_clients, SnapshotCache, SnapshotServer};
use wolfmesh::sync::{HttpFetcher, SyncWorker};

/// WolfMesh - Mesh Overlay Network over WireGuard
#[derive(Parser)]
#[command(name = "wolfmesh")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/wolfmesh/config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to the config file's
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as the mesh server
    Server,

    /// Run as a mesh client
    Client,

    /// Initialize a new configuration file with a fresh key
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "/etc/wolfmesh/config.toml")]
        output: PathBuf,

        /// Add a [server] section
        #[arg(long, conflicts_with = "client")]
        server: bool,

        /// Add a [client] section
        #[arg(long, requires_all = ["server_addr", "server_pubkey"])]
        client: bool,

        /// Public address of the server (client only)
        #[arg(long)]
        server_addr: Option<IpAddr>,

        /// Public key of the server (client only)
        #[arg(long)]
        server_pubkey: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,

    /// Generate a private key
    Genkey,

    /// Read a private key from stdin and print its public key
    Pubkey,

    /// Show the peers currently configured on the local interface
    Peers,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&log_level(&cli));

    match cli.command {
        Commands::Server => run_server(cli.config).await,
        Commands::Client => run_client(cli.config).await,
        Commands::Init {
            output,
            server,
            client,
            server_addr,
            server_pubkey,
            force,
        } => run_init(output, server, client, server_addr, server_pubkey, force),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
        Commands::Genkey => run_genkey(),
        Commands::Pubkey => run_pubkey(),
        Commands::Peers => run_peers(cli.config).await,
    }
}

/// Level from the command line, else from the config file, else `info`
fn log_level(cli: &Cli) -> String {
    if let Some(level) = &cli.log_level {
        return level.clone();
    }
    match cli.command {
        Commands::Server | Commands::Client => WolfMeshConfig::from_file(&cli.config)
            .map(|c| c.logging.level)
            .unwrap_or_else(|_| "info".to_string()),
        _ => "info".to_string(),
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(config_path: &PathBuf) -> Result<WolfMeshConfig> {
    match WolfMeshConfig::from_file(config_path) {
        Ok(c) => Ok(c),
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            Err(e)
        }
    }
}

fn warn_if_not_root() {
    if !nix::unistd::geteuid().is_root() {
        tracing::warn!("Not running as root; creating the tunnel interface will likely fail");
    }
}

fn overlay_from_config(config: &WolfMeshConfig, listen_port: Option<u16>) -> Result<OverlayState> {
    let fabric: Arc<dyn TunnelFabric> = Arc::new(WgFabric::new());
    let overlay = OverlayState::new(
        fabric,
        config.node.interface.clone(),
        config.node.overlay_net,
        config.keypair()?,
        listen_port,
    )
    .with_mtu(config.node.mtu);
    Ok(overlay)
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Received shutdown signal");
}

async fn teardown(overlay: &OverlayState) {
    match overlay.down_interface().await {
        Ok(()) => tracing::info!("Interface {} removed", overlay.interface()),
        Err(e) => tracing::error!("Could not remove interface {}: {}", overlay.interface(), e),
    }
}

/// Run the mesh server
async fn run_server(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting WolfMesh server...");
    let config = load_config(&config_path)?;
    let server_config = config.server()?.clone();
    warn_if_not_root();

    let overlay = Arc::new(overlay_from_config(&config, Some(config.node.port))?);
    tracing::info!("Public key: {}", overlay.public_key());
    tracing::info!("Overlay address: {}", overlay.overlay_address());

    overlay.set_up_interface().await?;

    let result = serve_snapshots(Arc::clone(&overlay), &server_config, config.node.port).await;
    teardown(&overlay).await;
    result
}

async fn serve_snapshots(
    overlay: Arc<OverlayState>,
    server_config: &ServerConfig,
    port: u16,
) -> Result<()> {
    register_clients(&overlay, &server_config.client_peers()).await;

    let cache = Arc::new(SnapshotCache::new(
        Arc::clone(&overlay),
        server_config.snapshot_ttl(),
    ));
    let address = SocketAddr::new(overlay.overlay_address(), port);
    let server = SnapshotServer::bind(address, cache, server_config.request_timeout()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(server.serve(shutdown_rx));

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    handle
        .await
        .map_err(|e| Error::Internal(format!("snapshot service task failed: {}", e)))?
}

/// Run a mesh client
async fn run_client(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting WolfMesh client...");
    let config = load_config(&config_path)?;
    let client_config = config.client()?.clone();
    warn_if_not_root();

    let overlay = Arc::new(overlay_from_config(&config, None)?);
    tracing::info!("Public key: {}", overlay.public_key());
    tracing::info!("Overlay address: {}", overlay.overlay_address());

    overlay.set_up_interface().await?;

    let result = sync_with_server(Arc::clone(&overlay), &client_config, config.node.port).await;
    teardown(&overlay).await;
    result
}

async fn sync_with_server(
    overlay: Arc<OverlayState>,
    client_config: &ClientConfig,
    port: u16,
) -> Result<()> {
    let server_key = client_config.server_pubkey()?;
    let preshared_key = client_config.preshared_key()?;

    let server = client_config.server_peer(port)?;
    if let Err(e) = overlay.add_peers(&[server]).await {
        tracing::error!("Could not add server peer: {}", e);
        return Err(e);
    }

    let snapshot_address = SocketAddr::new(overlay.address_of(&server_key), port);
    let fetcher = HttpFetcher::new(snapshot_address, client_config.fetch_timeout())?;
    tracing::info!("Syncing peers from {}", fetcher.url());

    let worker = SyncWorker::new(
        fetcher,
        Arc::clone(&overlay),
        preshared_key,
        client_config.keepalive,
        client_config.backoff.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(worker.run(shutdown_rx));

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    handle
        .await
        .map_err(|e| Error::Internal(format!("sync task failed: {}", e)))
}

/// Initialize configuration
fn run_init(
    output: PathBuf,
    server: bool,
    client: bool,
    server_addr: Option<IpAddr>,
    server_pubkey: Option<String>,
    force: bool,
) -> Result<()> {
    if output.exists() && !force {
        return Err(Error::Config(format!(
            "{} already exists, use --force to overwrite",
            output.display()
        )));
    }

    let keypair = KeyPair::generate();
    let mut config = WolfMeshConfig::generate(&keypair);

    if server {
        config.server = Some(ServerConfig::default());
    }
    if client {
        let (Some(addr), Some(pubkey)) = (server_addr, server_pubkey) else {
            return Err(Error::Config(
                "--client needs --server-addr and --server-pubkey".into(),
            ));
        };
        let pubkey: Key = pubkey.parse()?;
        config.client = Some(ClientConfig::new(addr, &pubkey));
    }

    config.validate()?;
    config.save(&output)?;

    println!("Configuration file created: {}", output.display());
    println!("Public key: {}", keypair.public);
    if server {
        println!("\nAdd client public keys to [server].client_pubkeys.");
        println!("Then start with: wolfmesh --config {} server", output.display());
    } else if client {
        println!("\nAdd this public key to the server's client_pubkeys.");
        println!("Then start with: wolfmesh --config {} client", output.display());
    }

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfMeshConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Interface: {}", config.node.interface);
            println!("  Overlay Network: {}", config.node.overlay_net);
            println!("  Port: {}", config.node.port);
            if let Some(server) = &config.server {
                println!("  Role: server ({} clients)", server.client_peers().len());
            }
            if let Some(client) = &config.client {
                println!("  Role: client of {}", client.server_addr);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show node information
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = WolfMeshConfig::from_file(&config_path)?;
    let keypair = config.keypair()?;
    let net = config.node.overlay_net;

    println!("WolfMesh Node Information");
    println!("=========================");
    println!();
    println!("Public Key:       {}", keypair.public);
    println!("Overlay Address:  {}", net.address_for(&keypair.public));
    println!("Overlay Network:  {}", net);
    println!("Interface:        {}", config.node.interface);
    println!("Port:             {}", config.node.port);
    println!("MTU:              {}", config.node.mtu);

    if let Some(server) = &config.server {
        println!();
        println!("Server Configuration:");
        println!("  Snapshot TTL:   {} ms", server.snapshot_ttl_ms);
        println!("  Clients:");
        for peer in server.client_peers() {
            println!("    {}  {}", peer.public_key(), net.address_for(peer.public_key()));
        }
    }

    if let Some(client) = &config.client {
        let server_key = client.server_pubkey()?;
        println!();
        println!("Client Configuration:");
        println!("  Server:         {}", client.server_endpoint(config.node.port));
        println!("  Server Overlay: {}", net.address_for(&server_key));
        println!("  Preshared Key:  {}", if client.preshared_key.is_some() { "set" } else { "none" });
        println!("  Backoff:        {}..{} ms", client.backoff.initial_interval_ms, client.backoff.max_interval_ms);
    }

    Ok(())
}

fn run_genkey() -> Result<()> {
    println!("{}", KeyPair::generate().private_key());
    Ok(())
}

fn run_pubkey() -> Result<()> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let keypair = KeyPair::parse(line.trim())?;
    println!("{}", keypair.public);
    Ok(())
}

/// Show live peers on the local interface
async fn run_peers(config_path: PathBuf) -> Result<()> {
    let config = WolfMeshConfig::from_file(&config_path)?;
    let overlay = overlay_from_config(&config, None)?;
    let peers = overlay.peer_stats().await?;

    println!("Interface {} ({} peers)", overlay.interface(), peers.len());
    for peer in peers {
        let endpoint = peer
            .endpoint
            .map(|e| e.to_string())
            .unwrap_or_else(|| "(none)".to_string());
        let allowed: Vec<String> = peer.allowed_ips.iter().map(|n| n.to_string()).collect();
        println!();
        println!("peer: {}", peer.public_key);
        println!("  endpoint:         {}", endpoint);
        println!("  allowed ips:      {}", allowed.join(", "));
        println!("  latest handshake: {}", peer.last_handshake);
        println!("  transfer:         {} B received, {} B sent", peer.rx_bytes, peer.tx_bytes);
        if !peer.keepalive.is_zero() {
            println!("  keepalive:        every {} s", peer.keepalive.as_secs());
        }
    }

    Ok(())
}
