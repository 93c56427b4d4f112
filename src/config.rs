//! WolfMesh Configuration
//!
//! This module provides configuration structures for the WolfMesh overlay
//! daemon. One file describes a node; the `[server]` or `[client]` section
//! is used depending on the role it is started in.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::crypto::{Key, KeyPair};
use crate::overlay::{OverlayNet, DEFAULT_MTU};
use crate::peer::Peer;
use crate::sync::{BackoffConfig, KeepalivePolicy};

/// Longest interface name the kernel accepts
const MAX_INTERFACE_NAME: usize = 15;

/// Main WolfMesh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfMeshConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Server role configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    /// Client role configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Tunnel interface name
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Overlay network; the prefix length must be a multiple of 8
    #[serde(default)]
    pub overlay_net: OverlayNet,

    /// Base64 private key of this node
    pub private_key: String,

    /// UDP port of the tunnel and TCP port of the snapshot service
    #[serde(default = "default_port")]
    pub port: u16,

    /// Interface MTU
    #[serde(default = "default_mtu")]
    pub mtu: u32,
}

/// Server role configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base64 public keys of the clients allowed into the mesh
    #[serde(default)]
    pub client_pubkeys: Vec<String>,

    /// How long a peer snapshot is reused, in milliseconds
    #[serde(default = "default_snapshot_ttl_ms")]
    pub snapshot_ttl_ms: u64,

    /// Upper bound of one snapshot request, in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Client role configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Public (underlay) address of the server
    pub server_addr: IpAddr,

    /// Base64 public key of the server
    pub server_pubkey: String,

    /// Base64 preshared key applied to every peer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preshared_key: Option<String>,

    /// Timeout of one snapshot fetch, in milliseconds
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Polling backoff
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Keepalive applied to fetched peers
    #[serde(default)]
    pub keepalive: KeepalivePolicy,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_interface() -> String {
    "wgoverlay".to_string()
}

fn default_port() -> u16 {
    54321
}

fn default_mtu() -> u32 {
    DEFAULT_MTU
}

fn default_snapshot_ttl_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    6000
}

fn default_fetch_timeout_ms() -> u64 {
    11000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            client_pubkeys: Vec::new(),
            snapshot_ttl_ms: default_snapshot_ttl_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl WolfMeshConfig {
    /// Fresh configuration for a node with the given key and no role section
    pub fn generate(keypair: &KeyPair) -> Self {
        Self {
            node: NodeConfig {
                interface: default_interface(),
                overlay_net: OverlayNet::default(),
                private_key: keypair.private_key().to_base64(),
                port: default_port(),
                mtu: default_mtu(),
            },
            server: None,
            client: None,
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfMeshConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as TOML
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.interface.is_empty() {
            return Err(crate::Error::Config("node.interface cannot be empty".into()));
        }

        if self.node.interface.len() > MAX_INTERFACE_NAME {
            return Err(crate::Error::Config(format!(
                "node.interface must be at most {} characters",
                MAX_INTERFACE_NAME
            )));
        }

        if self.node.port == 0 {
            return Err(crate::Error::Config("node.port cannot be 0".into()));
        }

        if self.node.mtu == 0 {
            return Err(crate::Error::Config("node.mtu cannot be 0".into()));
        }

        self.keypair()?;

        if let Some(server) = &self.server {
            if server.snapshot_ttl_ms == 0 {
                return Err(crate::Error::Config("server.snapshot_ttl_ms cannot be 0".into()));
            }
            if server.request_timeout_ms == 0 {
                return Err(crate::Error::Config("server.request_timeout_ms cannot be 0".into()));
            }
        }

        if let Some(client) = &self.client {
            client.server_pubkey()?;
            client.preshared_key()?;
            if client.fetch_timeout_ms == 0 {
                return Err(crate::Error::Config("client.fetch_timeout_ms cannot be 0".into()));
            }
            client.backoff.validate()?;
        }

        Ok(())
    }

    /// This node's key pair
    pub fn keypair(&self) -> crate::Result<KeyPair> {
        KeyPair::parse(&self.node.private_key)
            .map_err(|e| crate::Error::Config(format!("node.private_key: {}", e)))
    }

    /// The `[server]` section, required in server mode
    pub fn server(&self) -> crate::Result<&ServerConfig> {
        self.server
            .as_ref()
            .ok_or_else(|| crate::Error::Config("missing [server] section".into()))
    }

    /// The `[client]` section, required in client mode
    pub fn client(&self) -> crate::Result<&ClientConfig> {
        self.client
            .as_ref()
            .ok_or_else(|| crate::Error::Config("missing [client] section".into()))
    }
}

impl ServerConfig {
    /// Configured clients as peers with no endpoint yet.
    ///
    /// Keys that do not parse are skipped.
    pub fn client_peers(&self) -> Vec<Peer> {
        self.client_pubkeys
            .iter()
            .filter_map(|s| match s.parse::<Key>() {
                Ok(key) => Some(Peer::new(key)),
                Err(e) => {
                    tracing::warn!("Skipping client key {:?}: {}", s, e);
                    None
                }
            })
            .collect()
    }

    /// Get snapshot TTL as Duration
    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_millis(self.snapshot_ttl_ms)
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl ClientConfig {
    pub fn new(server_addr: IpAddr, server_pubkey: &Key) -> Self {
        Self {
            server_addr,
            server_pubkey: server_pubkey.to_base64(),
            preshared_key: None,
            fetch_timeout_ms: default_fetch_timeout_ms(),
            backoff: BackoffConfig::default(),
            keepalive: KeepalivePolicy::default(),
        }
    }

    pub fn server_pubkey(&self) -> crate::Result<Key> {
        self.server_pubkey
            .parse()
            .map_err(|e| crate::Error::Config(format!("client.server_pubkey: {}", e)))
    }

    /// Configured preshared key, or the zero key if none is set
    pub fn preshared_key(&self) -> crate::Result<Key> {
        match &self.preshared_key {
            Some(s) => s
                .parse()
                .map_err(|e| crate::Error::Config(format!("client.preshared_key: {}", e))),
            None => Ok(Key::zero()),
        }
    }

    /// Underlay endpoint of the server's tunnel
    pub fn server_endpoint(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.server_addr, port)
    }

    /// The server as this client's static peer.
    ///
    /// The server registers its clients without a preshared key, so this
    /// link carries none either; the configured key only applies between
    /// clients.
    pub fn server_peer(&self, port: u16) -> crate::Result<Peer> {
        let mut peer = Peer::with_endpoint(self.server_pubkey()?, self.server_endpoint(port));
        peer.keepalive = self.keepalive.keepalive_for(&peer);
        Ok(peer)
    }

    /// Get fetch timeout as Duration
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn private_b64(b: u8) -> String {
        Key::from_bytes([b; 32]).to_base64()
    }

    #[test]
    fn test_parse_server_config() {
        let toml = format!(
            r#"
[node]
private_key = "{}"
overlay_net = "10.100.0.0/16"

[server]
client_pubkeys = ["{}", "not-a-key", "{}"]
snapshot_ttl_ms = 2000
"#,
            private_b64(1),
            private_b64(2),
            private_b64(3)
        );

        let config = WolfMeshConfig::from_str(&toml).unwrap();
        assert_eq!(config.node.interface, "wgoverlay");
        assert_eq!(config.node.port, 54321);
        assert_eq!(config.node.mtu, 1420);
        assert_eq!(config.node.overlay_net.to_string(), "10.100.0.0/16");
        assert_eq!(config.logging.level, "info");

        let server = config.server().unwrap();
        assert_eq!(server.snapshot_ttl(), Duration::from_secs(2));
        assert_eq!(server.request_timeout(), Duration::from_secs(6));
        assert!(config.client().is_err());

        let peers = server.client_peers();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].public_key(), &Key::from_bytes([2; 32]));
        assert_eq!(peers[0].port, 0);
    }

    #[test]
    fn test_parse_client_config() {
        let toml = format!(
            r#"
[node]
private_key = "{}"

[client]
server_addr = "192.0.2.1"
server_pubkey = "{}"
preshared_key = "{}"

[client.backoff]
max_interval_ms = 30000

[client.keepalive]
ipv6_secs = 25
"#,
            private_b64(1),
            private_b64(2),
            private_b64(9)
        );

        let config = WolfMeshConfig::from_str(&toml).unwrap();
        assert_eq!(config.node.overlay_net, OverlayNet::default());

        let client = config.client().unwrap();
        assert_eq!(client.server_pubkey().unwrap(), Key::from_bytes([2; 32]));
        assert_eq!(client.preshared_key().unwrap(), Key::from_bytes([9; 32]));
        assert_eq!(client.server_endpoint(54321), "192.0.2.1:54321".parse().unwrap());
        assert_eq!(client.fetch_timeout(), Duration::from_secs(11));
        assert_eq!(client.backoff.initial_interval_ms, 10_000);
        assert_eq!(client.backoff.max_interval_ms, 30_000);
        assert_eq!(client.keepalive, KeepalivePolicy { ipv4_secs: 20, ipv6_secs: 25 });
    }

    #[test]
    fn test_server_and_client_agree_on_link_secret() {
        let server_keys = KeyPair::from_private(Key::from_bytes([1; 32]));
        let client_keys = KeyPair::from_private(Key::from_bytes([2; 32]));

        let server = ServerConfig {
            client_pubkeys: vec![client_keys.public.to_base64()],
            ..Default::default()
        };
        let mut client = ClientConfig::new("192.0.2.1".parse().unwrap(), &server_keys.public);
        client.preshared_key = Some(private_b64(9));

        let server_side = &server.client_peers()[0];
        let client_side = client.server_peer(54321).unwrap();

        assert_eq!(server_side.public_key(), &client_keys.public);
        assert_eq!(client_side.public_key(), &server_keys.public);
        assert_eq!(server_side.preshared_key, client_side.preshared_key);
        assert!(client_side.preshared_key.is_zero());
        assert_eq!(client_side.endpoint(), Some("192.0.2.1:54321".parse().unwrap()));
        assert_eq!(client_side.keepalive, Duration::from_secs(20));
    }

    #[test]
    fn test_missing_preshared_key_is_zero() {
        let client = ClientConfig::new("192.0.2.1".parse().unwrap(), &Key::from_bytes([2; 32]));
        assert!(client.preshared_key().unwrap().is_zero());
    }

    #[test]
    fn test_unaligned_overlay_net_is_rejected() {
        let toml = format!(
            "[node]\nprivate_key = \"{}\"\noverlay_net = \"10.100.0.0/20\"\n",
            private_b64(1)
        );
        assert!(WolfMeshConfig::from_str(&toml).is_err());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = WolfMeshConfig::generate(&KeyPair::from_private(Key::from_bytes([1; 32])));
        assert!(config.validate().is_ok());

        config.node.interface = "an-interface-name-too-long".into();
        assert!(config.validate().is_err());
        config.node.interface = "wg0".into();

        config.node.private_key = "short".into();
        assert!(config.validate().is_err());
        config.node.private_key = private_b64(1);

        let mut client = ClientConfig::new("192.0.2.1".parse().unwrap(), &Key::from_bytes([2; 32]));
        client.backoff.multiplier = 0.5;
        config.client = Some(client);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wolfmesh").join("config.toml");

        let keypair = KeyPair::generate();
        let mut config = WolfMeshConfig::generate(&keypair);
        config.server = Some(ServerConfig {
            client_pubkeys: vec![private_b64(4)],
            ..Default::default()
        });
        config.save(&path).unwrap();

        let loaded = WolfMeshConfig::from_file(&path).unwrap();
        assert_eq!(loaded.keypair().unwrap().public, keypair.public);
        assert_eq!(loaded.server().unwrap().client_pubkeys, vec![private_b64(4)]);
        assert!(loaded.client.is_none());
    }
}
