//! Overlay address allocation
//!
//! Every node computes every peer's overlay address from the peer's public
//! key alone, so all nodes agree without coordinating. The host part of the
//! address is the tail of SHA-256(public key).
//!
//! Known gaps: two keys may hash to the same host part (birthday bound over
//! the host bits), and all-zero or all-one host parts are handed out like
//! any other address. Changing either would change the address every node
//! derives, so both are left as is.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnet::{IpNet, Ipv6Net};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::Key;
use crate::error::{Error, Result};

/// Overlay network prefix; the prefix length is always a multiple of 8
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OverlayNet(IpNet);

impl OverlayNet {
    /// Validate a prefix for use as an overlay network
    pub fn new(net: IpNet) -> Result<Self> {
        if net.prefix_len() % 8 != 0 {
            return Err(Error::Config(format!(
                "unsupported overlay network size; net mask must be multiple of 8, got {}",
                net.prefix_len()
            )));
        }
        Ok(Self(net.trunc()))
    }

    /// The network prefix with host bits cleared
    pub fn network(&self) -> IpNet {
        self.0
    }

    /// Number of host bits in the prefix
    pub fn host_bits(&self) -> u8 {
        self.0.max_prefix_len() - self.0.prefix_len()
    }

    /// Overlay address of the peer owning `public_key`
    pub fn address_for(&self, public_key: &Key) -> IpAddr {
        derive_address(self, public_key)
    }

    /// Overlay address as a single-host network (/32 or /128)
    pub fn host_net_for(&self, public_key: &Key) -> IpNet {
        host_net(self.address_for(public_key))
    }
}

impl Default for OverlayNet {
    /// `fd80:dead:beef:1234::/64`
    fn default() -> Self {
        let addr = Ipv6Addr::new(0xfd80, 0xdead, 0xbeef, 0x1234, 0, 0, 0, 0);
        match Ipv6Net::new(addr, 64) {
            Ok(net) => Self(IpNet::V6(net)),
            Err(_) => unreachable!("64 is a valid IPv6 prefix length"),
        }
    }
}

impl FromStr for OverlayNet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let net: IpNet = s
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid overlay network {:?}: {}", s, e)))?;
        Self::new(net)
    }
}

impl TryFrom<String> for OverlayNet {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<OverlayNet> for String {
    fn from(net: OverlayNet) -> Self {
        net.to_string()
    }
}

impl fmt::Display for OverlayNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Derive the overlay address for `public_key` inside `net`.
///
/// The trailing `host_bits / 8` bytes of the network address are replaced
/// by the trailing bytes of the key's SHA-256 digest, last byte to last byte.
pub fn derive_address(net: &OverlayNet, public_key: &Key) -> IpAddr {
    let hash = Sha256::digest(public_key.as_bytes());
    let host_bytes = (net.host_bits() / 8) as usize;

    match net.network().network() {
        IpAddr::V4(addr) => {
            let mut octets = addr.octets();
            overwrite_tail(&mut octets, &hash, host_bytes);
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        IpAddr::V6(addr) => {
            let mut octets = addr.octets();
            overwrite_tail(&mut octets, &hash, host_bytes);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    }
}

fn overwrite_tail(octets: &mut [u8], hash: &[u8], count: usize) {
    let (olen, hlen) = (octets.len(), hash.len());
    for i in 1..=count {
        octets[olen - i] = hash[hlen - i];
    }
}

/// Single-host network for an address: /32 for IPv4, /128 for IPv6
pub fn host_net(addr: IpAddr) -> IpNet {
    IpNet::from(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> Key {
        Key::from_bytes([b; 32])
    }

    fn net(s: &str) -> OverlayNet {
        s.parse().unwrap()
    }

    #[test]
    fn test_rejects_unaligned_prefix() {
        assert!("10.0.0.0/20".parse::<OverlayNet>().is_err());
        assert!("fd80::/63".parse::<OverlayNet>().is_err());
        assert!("10.0.0.0/24".parse::<OverlayNet>().is_ok());
    }

    #[test]
    fn test_prefix_is_truncated() {
        let n = net("10.1.2.3/16");
        assert_eq!(n.to_string(), "10.1.0.0/16");
        assert_eq!(n.host_bits(), 16);
    }

    #[test]
    fn test_default_network() {
        assert_eq!(OverlayNet::default(), net("fd80:dead:beef:1234::/64"));
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let n = net("fd80:dead:beef:1234::/64");
        assert_eq!(n.address_for(&key(1)), n.address_for(&key(1)));
        assert_ne!(n.address_for(&key(1)), n.address_for(&key(2)));
    }

    #[test]
    fn test_host_bytes_come_from_hash_tail() {
        let k = key(42);
        let hash = Sha256::digest(k.as_bytes());
        let addr = net("10.20.0.0/16").address_for(&k);
        assert_eq!(addr, IpAddr::V4(Ipv4Addr::new(10, 20, hash[30], hash[31])));
    }

    #[test]
    fn test_network_bits_preserved() {
        let n = net("fd80:dead:beef:1234::/64");
        let prefix = match n.network().network() {
            IpAddr::V6(a) => a.octets(),
            _ => unreachable!(),
        };
        for b in 0..=255u8 {
            let kp = crate::crypto::KeyPair::from_private(Key::from_bytes([b; 32]));
            let addr = n.address_for(&kp.public);
            assert!(n.network().contains(&addr));
            match addr {
                IpAddr::V6(a) => assert_eq!(a.octets()[..8], prefix[..8]),
                _ => panic!("family changed"),
            }
        }
    }

    #[test]
    fn test_full_length_prefix_has_no_host_part() {
        let n = net("192.0.2.9/32");
        assert_eq!(n.address_for(&key(1)), "192.0.2.9".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_host_net_is_single_address() {
        let n = net("10.0.0.0/8");
        let hn = n.host_net_for(&key(5));
        assert_eq!(hn.prefix_len(), 32);
        assert_eq!(hn.addr(), n.address_for(&key(5)));

        let n6 = net("fd00::/8");
        assert_eq!(n6.host_net_for(&key(5)).prefix_len(), 128);
    }

    #[test]
    fn test_serde_as_string() {
        let n: OverlayNet = toml::from_str::<std::collections::HashMap<String, OverlayNet>>(
            "net = \"10.9.0.0/16\"",
        )
        .unwrap()["net"];
        assert_eq!(n, net("10.9.0.0/16"));
    }
}
