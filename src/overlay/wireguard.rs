//! WireGuard kernel fabric
//!
//! Drives a kernel WireGuard interface through the `ip` and `wg` tools.
//! Keys are always passed on stdin so they never show up in the process list.

use std::net::SocketAddr;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use ipnet::IpNet;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::fabric::{DeviceConfig, FabricPeer, PeerConfig, TunnelFabric};
use crate::crypto::Key;
use crate::error::{Error, Result};

/// Kernel WireGuard driven by `ip`/`wg`
#[derive(Debug, Clone)]
pub struct WgFabric {
    ip_bin: String,
    wg_bin: String,
}

impl Default for WgFabric {
    fn default() -> Self {
        Self {
            ip_bin: "ip".into(),
            wg_bin: "wg".into(),
        }
    }
}

impl WgFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use explicit tool paths instead of looking them up in `PATH`
    pub fn with_tools(ip_bin: impl Into<String>, wg_bin: impl Into<String>) -> Self {
        Self {
            ip_bin: ip_bin.into(),
            wg_bin: wg_bin.into(),
        }
    }

    async fn run(
        &self,
        operation: &'static str,
        interface: &str,
        program: &str,
        args: &[String],
        input: Option<&str>,
    ) -> Result<String> {
        tracing::trace!("{} {}", program, args.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            Error::fabric(operation, interface, format!("could not run {}: {}", program, e))
        })?;

        if let Some(input) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(input.as_bytes())
                    .await
                    .map_err(|e| Error::fabric(operation, interface, e))?;
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::fabric(operation, interface, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::fabric(operation, interface, stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn ip(&self, operation: &'static str, interface: &str, args: &[&str]) -> Result<String> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.run(operation, interface, &self.ip_bin, &args, None).await
    }
}

#[async_trait]
impl TunnelFabric for WgFabric {
    async fn create_interface(&self, interface: &str) -> Result<()> {
        self.ip("create interface", interface, &["link", "add", "dev", interface, "type", "wireguard"])
            .await?;
        Ok(())
    }

    async fn destroy_interface(&self, interface: &str) -> Result<()> {
        match self.ip("destroy interface", interface, &["link", "del", "dev", interface]).await {
            Ok(_) => Ok(()),
            Err(Error::Fabric { reason, .. }) if reason.contains("Cannot find device") => {
                Err(Error::InterfaceNotFound(interface.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn configure(&self, interface: &str, config: &DeviceConfig) -> Result<()> {
        let mut args = vec![
            "set".to_string(),
            interface.to_string(),
            "private-key".to_string(),
            "/dev/stdin".to_string(),
        ];
        if let Some(port) = config.listen_port {
            args.push("listen-port".into());
            args.push(port.to_string());
        }
        let key = config.private_key.to_base64();
        self.run("set wireguard configuration", interface, &self.wg_bin, &args, Some(&key))
            .await?;
        Ok(())
    }

    async fn set_peers(&self, interface: &str, peers: &[PeerConfig]) -> Result<()> {
        for peer in peers {
            let args = peer_set_args(interface, peer);
            let psk = peer.preshared_key.to_base64();
            self.run("set peers", interface, &self.wg_bin, &args, Some(&psk)).await?;
        }
        Ok(())
    }

    async fn get_peers(&self, interface: &str) -> Result<Vec<FabricPeer>> {
        let args = vec!["show".to_string(), interface.to_string(), "dump".to_string()];
        let dump = self.run("read peers", interface, &self.wg_bin, &args, None).await?;
        parse_dump(&dump).map_err(|reason| Error::fabric("read peers", interface, reason))
    }

    async fn set_address(&self, interface: &str, address: IpNet) -> Result<()> {
        let addr = address.to_string();
        self.ip("set address", interface, &["addr", "replace", &addr, "dev", interface])
            .await?;
        Ok(())
    }

    async fn set_mtu(&self, interface: &str, mtu: u32) -> Result<()> {
        let mtu = mtu.to_string();
        self.ip("set MTU", interface, &["link", "set", "dev", interface, "mtu", &mtu])
            .await?;
        Ok(())
    }

    async fn set_up(&self, interface: &str) -> Result<()> {
        self.ip("enable interface", interface, &["link", "set", "dev", interface, "up"])
            .await?;
        Ok(())
    }

    async fn add_route(&self, interface: &str, network: IpNet) -> Result<()> {
        let net = network.to_string();
        self.ip(
            "add route",
            interface,
            &["route", "replace", &net, "dev", interface, "scope", "link"],
        )
        .await?;
        Ok(())
    }
}

/// Arguments for `wg set` that overwrite one peer; the preshared key is read from stdin
fn peer_set_args(interface: &str, peer: &PeerConfig) -> Vec<String> {
    let mut args = vec![
        "set".to_string(),
        interface.to_string(),
        "peer".to_string(),
        peer.public_key.to_base64(),
        "preshared-key".to_string(),
        "/dev/stdin".to_string(),
    ];
    if let Some(endpoint) = peer.endpoint {
        args.push("endpoint".into());
        args.push(endpoint.to_string());
    }
    args.push("allowed-ips".into());
    args.push(
        peer.allowed_ips
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(","),
    );
    args.push("persistent-keepalive".into());
    args.push(if peer.keepalive.is_zero() {
        "off".to_string()
    } else {
        peer.keepalive.as_secs().to_string()
    });
    args
}

/// Parse `wg show <interface> dump`. The first line describes the interface
/// and is skipped; every other line is one tab-separated peer.
fn parse_dump(dump: &str) -> std::result::Result<Vec<FabricPeer>, String> {
    let mut peers = Vec::new();

    for line in dump.lines().skip(1).filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 8 {
            return Err(format!("malformed peer line with {} fields", fields.len()));
        }

        let public_key = fields[0].parse::<Key>().map_err(|e| e.to_string())?;
        let preshared_key = match fields[1] {
            "(none)" => Key::zero(),
            s => s.parse::<Key>().map_err(|e| e.to_string())?,
        };
        let endpoint = match fields[2] {
            "(none)" => None,
            s => Some(
                s.parse::<SocketAddr>()
                    .map_err(|e| format!("bad endpoint {:?}: {}", s, e))?,
            ),
        };
        let allowed_ips = match fields[3] {
            "(none)" | "" => Vec::new(),
            s => s
                .split(',')
                .map(|n| n.trim().parse::<IpNet>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| format!("bad allowed ips {:?}: {}", s, e))?,
        };
        let number = |s: &str| s.parse::<u64>().map_err(|e| format!("bad number {:?}: {}", s, e));
        let keepalive = match fields[7] {
            "off" => Duration::ZERO,
            s => Duration::from_secs(number(s)?),
        };

        peers.push(FabricPeer {
            public_key,
            preshared_key,
            endpoint,
            allowed_ips,
            keepalive,
            last_handshake: number(fields[4])?,
            rx_bytes: number(fields[5])?,
            tx_bytes: number(fields[6])?,
        });
    }

    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> Key {
        Key::from_bytes([b; 32])
    }

    #[test]
    fn test_parse_dump() {
        let dump = format!(
            "{private}\t{public}\t54321\toff\n\
             {a}\t(none)\t(none)\tfd80::1/128\t0\t0\t0\toff\n\
             {b}\t{psk}\t198.51.100.4:51820\t10.0.0.7/32,10.0.1.0/24\t1700000000\t1024\t2048\t20\n",
            private = key(1),
            public = key(2),
            a = key(3),
            b = key(4),
            psk = key(5),
        );

        let peers = parse_dump(&dump).unwrap();
        assert_eq!(peers.len(), 2);

        assert_eq!(peers[0].public_key, key(3));
        assert!(peers[0].preshared_key.is_zero());
        assert_eq!(peers[0].endpoint, None);
        assert_eq!(peers[0].keepalive, Duration::ZERO);

        assert_eq!(peers[1].preshared_key, key(5));
        assert_eq!(peers[1].endpoint, Some("198.51.100.4:51820".parse().unwrap()));
        assert_eq!(peers[1].allowed_ips.len(), 2);
        assert_eq!(peers[1].keepalive, Duration::from_secs(20));
        assert_eq!(peers[1].rx_bytes, 1024);
        assert_eq!(peers[1].tx_bytes, 2048);
    }

    #[test]
    fn test_parse_dump_interface_only() {
        let dump = format!("{}\t{}\t0\toff\n", key(1), key(2));
        assert!(parse_dump(&dump).unwrap().is_empty());
    }

    #[test]
    fn test_parse_dump_rejects_short_line() {
        let dump = format!("{}\t{}\t0\toff\n{}\t(none)\n", key(1), key(2), key(3));
        assert!(parse_dump(&dump).is_err());
    }

    #[test]
    fn test_peer_set_args() {
        let peer = PeerConfig {
            public_key: key(7),
            preshared_key: key(8),
            endpoint: Some("[2001:db8::9]:54321".parse().unwrap()),
            allowed_ips: vec!["fd80::7/128".parse().unwrap()],
            keepalive: Duration::from_secs(20),
        };
        let args = peer_set_args("wgoverlay", &peer);
        assert_eq!(
            args,
            vec![
                "set".to_string(),
                "wgoverlay".into(),
                "peer".into(),
                key(7).to_base64(),
                "preshared-key".into(),
                "/dev/stdin".into(),
                "endpoint".into(),
                "[2001:db8::9]:54321".into(),
                "allowed-ips".into(),
                "fd80::7/128".into(),
                "persistent-keepalive".into(),
                "20".into(),
            ]
        );
    }

    #[test]
    fn test_peer_set_args_without_endpoint() {
        let peer = PeerConfig {
            public_key: key(7),
            preshared_key: Key::zero(),
            endpoint: None,
            allowed_ips: vec!["10.0.0.3/32".parse().unwrap()],
            keepalive: Duration::ZERO,
        };
        let args = peer_set_args("wg0", &peer);
        assert!(!args.contains(&"endpoint".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("off"));
    }

    #[tokio::test]
    async fn test_missing_tool_is_fabric_error() {
        let fabric = WgFabric::with_tools("/nonexistent/ip", "/nonexistent/wg");
        let err = fabric.set_up("wgtest").await.unwrap_err();
        match err {
            Error::Fabric { operation, interface, .. } => {
                assert_eq!(operation, "enable interface");
                assert_eq!(interface, "wgtest");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
