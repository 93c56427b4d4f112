//! WolfMeshCtl - Command line tool for inspecting WolfMesh networks
//!
//! Usage:
//!   wolfmeshctl peers            - Show the server's current peer snapshot
//!   wolfmeshctl addr KEY...      - Show the overlay address of public keys
//!   wolfmeshctl check-config     - Check a configuration file

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use wolfmesh::config::WolfMeshConfig;
use wolfmesh::crypto::Key;
use wolfmesh::overlay::OverlayNet;
use wolfmesh::sync::{HttpFetcher, SnapshotSource};

/// WolfMesh Control Tool
#[derive(Parser)]
#[command(name = "wolfmeshctl")]
#[command(about = "Inspect WolfMesh overlay networks", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "/etc/wolfmesh/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and print the server's peer snapshot
    Peers {
        /// Snapshot service address (defaults to the server from the config)
        #[arg(short, long)]
        server: Option<SocketAddr>,

        /// Fetch timeout in seconds
        #[arg(long, default_value_t = 11)]
        timeout: u64,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the overlay address each public key derives to
    Addr {
        /// Overlay network (defaults to the one from the config)
        #[arg(short, long)]
        net: Option<OverlayNet>,

        /// Base64 public keys
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Check configuration file for errors
    CheckConfig {
        /// Path to config file to check (defaults to --config path)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Peers { server, timeout, json } => {
            show_peers(&cli.config, *server, Duration::from_secs(*timeout), *json).await
        }
        Commands::Addr { net, keys } => show_addresses(&cli.config, *net, keys),
        Commands::CheckConfig { file } => {
            let config_path = file.clone().unwrap_or_else(|| cli.config.clone());
            check_config(&config_path)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

// ============ Commands ============

/// Snapshot service address of the server the config points at
fn snapshot_address(config_path: &PathBuf) -> anyhow::Result<SocketAddr> {
    let config = WolfMeshConfig::from_file(config_path)
        .with_context(|| format!("could not load {}", config_path.display()))?;
    let net = config.node.overlay_net;

    let overlay_ip = if let Some(client) = &config.client {
        net.address_for(&client.server_pubkey()?)
    } else if config.server.is_some() {
        net.address_for(&config.keypair()?.public)
    } else {
        bail!("config has neither a [server] nor a [client] section; pass --server");
    };
    Ok(SocketAddr::new(overlay_ip, config.node.port))
}

async fn show_peers(
    config_path: &PathBuf,
    server: Option<SocketAddr>,
    timeout: Duration,
    json: bool,
) -> anyhow::Result<()> {
    let address = match server {
        Some(a) => a,
        None => snapshot_address(config_path)?,
    };

    let fetcher = HttpFetcher::new(address, timeout)?;
    let mut peers = fetcher
        .fetch()
        .await
        .with_context(|| format!("could not fetch peers from {}", fetcher.url()))?;
    peers.sort_by(|a, b| a.public_key().cmp(b.public_key()));

    let net = WolfMeshConfig::from_file(config_path)
        .map(|c| c.node.overlay_net)
        .unwrap_or_default();

    if json {
        let entries: Vec<serde_json::Value> = peers
            .iter()
            .map(|p| {
                serde_json::json!({
                    "public_key": p.public_key().to_string(),
                    "overlay_address": net.address_for(p.public_key()).to_string(),
                    "endpoint": p.endpoint().map(|e| e.to_string()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!();
    println!("WolfMesh Peers at {} (wolfmeshctl v{})", address, env!("CARGO_PKG_VERSION"));
    println!("========================================");
    println!();
    println!("Total: {} peers  |  Connected: {}",
        peers.len(),
        peers.iter().filter(|p| p.endpoint().is_some()).count()
    );
    println!();

    println!("{:<46} {:<28} {:<30}", "PUBLIC KEY", "OVERLAY ADDRESS", "ENDPOINT");
    println!("{}", "-".repeat(104));

    for peer in &peers {
        // Pad before adding color codes
        let endpoint = match peer.endpoint() {
            Some(e) => format!("\x1b[32m{:<30}\x1b[0m", e.to_string()),
            None => format!("\x1b[33m{:<30}\x1b[0m", "(never connected)"),
        };
        println!("{:<46} {:<28} {}",
            peer.public_key().to_string(),
            net.address_for(peer.public_key()).to_string(),
            endpoint
        );
    }
    println!();

    Ok(())
}

fn show_addresses(
    config_path: &PathBuf,
    net: Option<OverlayNet>,
    keys: &[String],
) -> anyhow::Result<()> {
    let net = match net {
        Some(n) => n,
        None => WolfMeshConfig::from_file(config_path)
            .map(|c| c.node.overlay_net)
            .unwrap_or_default(),
    };

    for key in keys {
        let public_key: Key = key
            .parse()
            .with_context(|| format!("invalid public key {:?}", key))?;
        println!("{}  {}", public_key, net.address_for(&public_key));
    }
    Ok(())
}

fn check_config(path: &PathBuf) -> anyhow::Result<()> {
    let config = WolfMeshConfig::from_file(path)
        .with_context(|| format!("{} is not a valid configuration", path.display()))?;
    let keypair = config.keypair()?;

    println!("✓ {} is valid", path.display());
    println!("  Public key: {}", keypair.public);
    println!("  Overlay address: {}", config.node.overlay_net.address_for(&keypair.public));

    if let Some(server) = &config.server {
        let valid = server.client_peers().len();
        let skipped = server.client_pubkeys.len() - valid;
        println!("  Server: {} clients", valid);
        if skipped > 0 {
            println!("  \x1b[33mWarning: {} client keys do not parse and will be skipped\x1b[0m", skipped);
        }
    }
    if let Some(client) = &config.client {
        println!("  Client of: {}", client.server_endpoint(config.node.port));
    }
    Ok(())
}
