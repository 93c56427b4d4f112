//! Overlay state
//!
//! Wraps the tunnel fabric for one local interface. Every peer written to the
//! fabric gets its allowed address derived from its own key here, and the
//! node's own key is never written as a peer.

use std::net::IpAddr;
use std::sync::Arc;

use super::allocator::OverlayNet;
use super::fabric::{DeviceConfig, FabricPeer, PeerConfig, TunnelFabric};
use crate::crypto::{Key, KeyPair};
use crate::error::{Error, Result};
use crate::peer::Peer;

/// Default MTU of the overlay interface
pub const DEFAULT_MTU: u32 = 1420;

/// Local interface state and the fabric behind it
pub struct OverlayState {
    fabric: Arc<dyn TunnelFabric>,
    interface: String,
    network: OverlayNet,
    keypair: KeyPair,
    address: IpAddr,
    listen_port: Option<u16>,
    mtu: u32,
}

impl OverlayState {
    /// Create the state; the interface is set up later with `set_up_interface`
    pub fn new(
        fabric: Arc<dyn TunnelFabric>,
        interface: impl Into<String>,
        network: OverlayNet,
        keypair: KeyPair,
        listen_port: Option<u16>,
    ) -> Self {
        let address = network.address_for(&keypair.public);
        Self {
            fabric,
            interface: interface.into(),
            network,
            keypair,
            address,
            listen_port,
            mtu: DEFAULT_MTU,
        }
    }

    pub fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn public_key(&self) -> &Key {
        &self.keypair.public
    }

    pub fn network(&self) -> &OverlayNet {
        &self.network
    }

    /// This node's overlay address
    pub fn overlay_address(&self) -> IpAddr {
        self.address
    }

    /// Overlay address of any peer
    pub fn address_of(&self, public_key: &Key) -> IpAddr {
        self.network.address_for(public_key)
    }

    /// Create the interface, key it, address it and bring it up.
    ///
    /// If a step after creation fails the interface is removed again, so a
    /// retry starts from a clean slate.
    pub async fn set_up_interface(&self) -> Result<()> {
        self.fabric.create_interface(&self.interface).await?;

        if let Err(e) = self.configure_interface().await {
            if let Err(cleanup) = self.fabric.destroy_interface(&self.interface).await {
                tracing::warn!("Could not remove half-configured {}: {}", self.interface, cleanup);
            }
            return Err(e);
        }

        tracing::info!(
            "Interface {} up with address {} in {}",
            self.interface,
            self.address,
            self.network
        );
        Ok(())
    }

    async fn configure_interface(&self) -> Result<()> {
        self.fabric
            .configure(
                &self.interface,
                &DeviceConfig {
                    private_key: *self.keypair.private_key(),
                    listen_port: self.listen_port,
                },
            )
            .await?;
        self.fabric
            .set_address(&self.interface, super::allocator::host_net(self.address))
            .await?;
        self.fabric.set_mtu(&self.interface, self.mtu).await?;
        self.fabric.set_up(&self.interface).await?;

        if let Err(e) = self
            .fabric
            .add_route(&self.interface, self.network.network())
            .await
        {
            tracing::warn!("Could not add overlay route: {}", e);
        }
        Ok(())
    }

    /// Tear the interface down; an interface that is already gone is fine
    pub async fn down_interface(&self) -> Result<()> {
        match self.fabric.destroy_interface(&self.interface).await {
            Ok(()) => Ok(()),
            Err(Error::InterfaceNotFound(_)) => {
                tracing::debug!("Interface {} already gone", self.interface);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Push peers to the fabric, overwriting each listed peer's configuration.
    ///
    /// Our own key is dropped and the allowed address is always re-derived
    /// from the key, never taken from the input.
    pub async fn add_peers(&self, peers: &[Peer]) -> Result<()> {
        let configs: Vec<PeerConfig> = peers
            .iter()
            .filter(|p| p.public_key() != self.public_key())
            .map(|p| PeerConfig {
                public_key: *p.public_key(),
                preshared_key: p.preshared_key,
                endpoint: p.endpoint(),
                allowed_ips: vec![self.network.host_net_for(p.public_key())],
                keepalive: p.keepalive,
            })
            .collect();

        self.fabric.set_peers(&self.interface, &configs).await
    }

    /// Current peers as the fabric sees them
    pub async fn get_peers(&self) -> Result<Vec<Peer>> {
        let peers = self.fabric.get_peers(&self.interface).await?;
        Ok(peers.iter().map(peer_from_fabric).collect())
    }

    /// Raw fabric view including transfer statistics
    pub async fn peer_stats(&self) -> Result<Vec<FabricPeer>> {
        self.fabric.get_peers(&self.interface).await
    }
}

fn peer_from_fabric(fp: &FabricPeer) -> Peer {
    let mut peer = match fp.endpoint {
        Some(endpoint) => Peer::with_endpoint(fp.public_key, endpoint),
        None => Peer::new(fp.public_key),
    };
    peer.preshared_key = fp.preshared_key;
    peer.keepalive = fp.keepalive;
    peer
}
