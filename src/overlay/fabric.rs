//! Tunnel fabric capability
//!
//! The fabric owns the kernel interface and the encrypted transport. WolfMesh
//! only tells it which interface to create, which key to use and which peers
//! to talk to.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use ipnet::IpNet;

use crate::crypto::Key;
use crate::error::Result;

/// Interface-level settings
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub private_key: Key,
    /// UDP listen port; `None` lets the fabric pick one
    pub listen_port: Option<u16>,
}

/// Desired configuration of one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub public_key: Key,
    pub preshared_key: Key,
    /// `None` leaves any endpoint the fabric already learned untouched
    pub endpoint: Option<SocketAddr>,
    pub allowed_ips: Vec<IpNet>,
    pub keepalive: Duration,
}

/// A peer as currently reported by the fabric
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FabricPeer {
    pub public_key: Key,
    pub preshared_key: Key,
    pub endpoint: Option<SocketAddr>,
    pub allowed_ips: Vec<IpNet>,
    pub keepalive: Duration,
    /// Seconds since the epoch of the last handshake, 0 if none
    pub last_handshake: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Operations WolfMesh needs from the encrypted tunnel layer.
///
/// `set_peers` upserts: every listed peer has its whole configuration
/// overwritten, peers not listed are left alone.
#[async_trait]
pub trait TunnelFabric: Send + Sync {
    async fn create_interface(&self, interface: &str) -> Result<()>;

    /// Remove the interface; `Error::InterfaceNotFound` if it is absent
    async fn destroy_interface(&self, interface: &str) -> Result<()>;

    async fn configure(&self, interface: &str, config: &DeviceConfig) -> Result<()>;

    async fn set_peers(&self, interface: &str, peers: &[PeerConfig]) -> Result<()>;

    async fn get_peers(&self, interface: &str) -> Result<Vec<FabricPeer>>;

    /// Assign an address, replacing it if already present
    async fn set_address(&self, interface: &str, address: IpNet) -> Result<()>;

    async fn set_mtu(&self, interface: &str, mtu: u32) -> Result<()>;

    async fn set_up(&self, interface: &str) -> Result<()>;

    async fn add_route(&self, interface: &str, network: IpNet) -> Result<()>;
}
