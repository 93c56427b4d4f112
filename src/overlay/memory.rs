//! In-process fabric used by the tests

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ipnet::IpNet;

use super::fabric::{DeviceConfig, FabricPeer, PeerConfig, TunnelFabric};
use crate::crypto::Key;
use crate::error::{Error, Result};

#[derive(Debug, Default, Clone)]
pub struct Device {
    pub private_key: Option<Key>,
    pub listen_port: Option<u16>,
    pub peers: BTreeMap<Key, FabricPeer>,
    pub addresses: Vec<IpNet>,
    pub routes: Vec<IpNet>,
    pub mtu: u32,
    pub up: bool,
}

#[derive(Default)]
pub struct MemoryFabric {
    devices: Mutex<HashMap<String, Device>>,
    pub fail_get_peers: AtomicBool,
    pub fail_set_peers: AtomicBool,
    pub fail_set_mtu: AtomicBool,
    pub get_peers_calls: AtomicUsize,
}

impl MemoryFabric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(&self, interface: &str) -> Option<Device> {
        self.devices.lock().unwrap().get(interface).cloned()
    }

    /// Overwrite a peer's live state, as if the fabric learned it from traffic
    pub fn insert_peer(&self, interface: &str, peer: FabricPeer) {
        let mut devices = self.devices.lock().unwrap();
        let device = devices.entry(interface.to_string()).or_default();
        device.peers.insert(peer.public_key, peer);
    }

    fn with_device<R>(&self, interface: &str, f: impl FnOnce(&mut Device) -> R) -> Result<R> {
        let mut devices = self.devices.lock().unwrap();
        devices
            .get_mut(interface)
            .map(f)
            .ok_or_else(|| Error::InterfaceNotFound(interface.to_string()))
    }
}

#[async_trait]
impl TunnelFabric for MemoryFabric {
    async fn create_interface(&self, interface: &str) -> Result<()> {
        let mut devices = self.devices.lock().unwrap();
        if devices.contains_key(interface) {
            return Err(Error::fabric("create interface", interface, "File exists"));
        }
        devices.insert(interface.to_string(), Device::default());
        Ok(())
    }

    async fn destroy_interface(&self, interface: &str) -> Result<()> {
        match self.devices.lock().unwrap().remove(interface) {
            Some(_) => Ok(()),
            None => Err(Error::InterfaceNotFound(interface.to_string())),
        }
    }

    async fn configure(&self, interface: &str, config: &DeviceConfig) -> Result<()> {
        self.with_device(interface, |d| {
            d.private_key = Some(config.private_key);
            d.listen_port = config.listen_port;
        })
    }

    async fn set_peers(&self, interface: &str, peers: &[PeerConfig]) -> Result<()> {
        if self.fail_set_peers.load(Ordering::SeqCst) {
            return Err(Error::fabric("set peers", interface, "netlink busy"));
        }
        self.with_device(interface, |d| {
            for p in peers {
                let existing = d.peers.get(&p.public_key).cloned();
                d.peers.insert(
                    p.public_key,
                    FabricPeer {
                        public_key: p.public_key,
                        preshared_key: p.preshared_key,
                        endpoint: p.endpoint.or(existing.as_ref().and_then(|e| e.endpoint)),
                        allowed_ips: p.allowed_ips.clone(),
                        keepalive: p.keepalive,
                        last_handshake: existing.as_ref().map_or(0, |e| e.last_handshake),
                        rx_bytes: existing.as_ref().map_or(0, |e| e.rx_bytes),
                        tx_bytes: existing.as_ref().map_or(0, |e| e.tx_bytes),
                    },
                );
            }
        })
    }

    async fn get_peers(&self, interface: &str) -> Result<Vec<FabricPeer>> {
        self.get_peers_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_get_peers.load(Ordering::SeqCst) {
            return Err(Error::fabric("read peers", interface, "netlink busy"));
        }
        self.with_device(interface, |d| d.peers.values().cloned().collect())
    }

    async fn set_address(&self, interface: &str, address: IpNet) -> Result<()> {
        self.with_device(interface, |d| {
            d.addresses.retain(|a| *a != address);
            d.addresses.push(address);
        })
    }

    async fn set_mtu(&self, interface: &str, mtu: u32) -> Result<()> {
        if self.fail_set_mtu.load(Ordering::SeqCst) {
            return Err(Error::fabric("set MTU", interface, "invalid argument"));
        }
        self.with_device(interface, |d| d.mtu = mtu)
    }

    async fn set_up(&self, interface: &str) -> Result<()> {
        self.with_device(interface, |d| d.up = true)
    }

    async fn add_route(&self, interface: &str, network: IpNet) -> Result<()> {
        self.with_device(interface, |d| d.routes.push(network))
    }
}
