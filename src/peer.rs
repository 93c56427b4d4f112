//! Peer entity and snapshot wire format
//!
//! A snapshot on the wire is a bincode-encoded `Vec<Peer>`. There is no
//! version field, so changing `Peer` requires upgrading server and clients
//! together.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::Key;
use crate::error::Result;

/// One remote endpoint of the mesh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Last known endpoint address, empty if the peer never connected
    pub ip: String,
    /// Last known endpoint port, 0 if unknown
    pub port: u16,
    public_key: Key,
    /// Symmetric secret supplied out-of-band; zero means none
    pub preshared_key: Key,
    /// Persistent keepalive; zero disables it
    pub keepalive: Duration,
}

impl Peer {
    /// Create a peer with no endpoint, secret or keepalive
    pub fn new(public_key: Key) -> Self {
        Self {
            ip: String::new(),
            port: 0,
            public_key,
            preshared_key: Key::zero(),
            keepalive: Duration::ZERO,
        }
    }

    /// Create a peer with a known endpoint
    pub fn with_endpoint(public_key: Key, endpoint: SocketAddr) -> Self {
        Self {
            ip: endpoint.ip().to_string(),
            port: endpoint.port(),
            ..Self::new(public_key)
        }
    }

    pub fn public_key(&self) -> &Key {
        &self.public_key
    }

    /// Endpoint to hand to the fabric, if one is known
    pub fn endpoint(&self) -> Option<SocketAddr> {
        if self.port == 0 {
            return None;
        }
        self.endpoint_ip().map(|ip| SocketAddr::new(ip, self.port))
    }

    /// Endpoint address, if the peer has a parsable one
    pub fn endpoint_ip(&self) -> Option<IpAddr> {
        self.ip.parse().ok()
    }

    /// Copy with the fields clients must never see zeroed
    pub fn sanitized(&self) -> Self {
        Self {
            preshared_key: Key::zero(),
            keepalive: Duration::ZERO,
            ..self.clone()
        }
    }
}

/// Serialize a peer list into snapshot bytes
pub fn encode_peers(peers: &[Peer]) -> Result<Vec<u8>> {
    Ok(bincode::serialize(peers)?)
}

/// Deserialize snapshot bytes into a peer list
pub fn decode_peers(bytes: &[u8]) -> Result<Vec<Peer>> {
    Ok(bincode::deserialize(bytes)?)
}
