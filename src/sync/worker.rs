//! Client sync loop
//!
//! One cycle at a time: wait, fetch, apply, compute the next delay. The timer
//! is only re-armed once the previous cycle is finished, so at most one fetch
//! is in flight and peer updates reach the overlay in order.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::backoff::{BackoffConfig, ExponentialBackoff};
use super::fetcher::SnapshotSource;
use crate::crypto::Key;
use crate::overlay::OverlayState;
use crate::peer::Peer;

/// Persistent keepalive applied to fetched peers, per endpoint address family.
///
/// IPv4 peers are usually behind NAT and get a keepalive by default; IPv6
/// peers do not. Peers without a known endpoint get none.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeepalivePolicy {
    #[serde(default = "default_ipv4_secs")]
    pub ipv4_secs: u64,
    #[serde(default)]
    pub ipv6_secs: u64,
}

fn default_ipv4_secs() -> u64 { 20 }

impl Default for KeepalivePolicy {
    fn default() -> Self {
        Self {
            ipv4_secs: default_ipv4_secs(),
            ipv6_secs: 0,
        }
    }
}

impl KeepalivePolicy {
    pub fn keepalive_for(&self, peer: &Peer) -> Duration {
        match peer.endpoint_ip() {
            Some(IpAddr::V4(_)) => Duration::from_secs(self.ipv4_secs),
            Some(IpAddr::V6(_)) => Duration::from_secs(self.ipv6_secs),
            None => Duration::ZERO,
        }
    }
}

/// Where the sync loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Timer armed, waiting
    Idle,
    /// Fetch and apply in flight
    Fetching,
    /// Next delay computed
    Backoff,
}

/// Pulls snapshots from a source and applies them to the local overlay
pub struct SyncWorker<S: SnapshotSource> {
    source: S,
    overlay: Arc<OverlayState>,
    preshared_key: Key,
    keepalive: KeepalivePolicy,
    backoff: ExponentialBackoff,
    state: SyncState,
}

impl<S: SnapshotSource> SyncWorker<S> {
    pub fn new(
        source: S,
        overlay: Arc<OverlayState>,
        preshared_key: Key,
        keepalive: KeepalivePolicy,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            source,
            overlay,
            preshared_key,
            keepalive,
            backoff: ExponentialBackoff::new(backoff),
            state: SyncState::Idle,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Consecutive failed cycles
    pub fn failures(&self) -> u32 {
        self.backoff.failures()
    }

    /// Add our secret and keepalive to every fetched peer
    fn prepare(&self, mut peers: Vec<Peer>) -> Vec<Peer> {
        for peer in &mut peers {
            peer.preshared_key = self.preshared_key;
            peer.keepalive = self.keepalive.keepalive_for(peer);
        }
        peers
    }

    /// Run one fetch-and-apply cycle and return the delay until the next one.
    ///
    /// A failed fetch leaves the peer table untouched.
    pub async fn run_cycle(&mut self) -> Duration {
        self.state = SyncState::Fetching;

        let delay = match self.source.fetch().await {
            Ok(peers) => {
                let peers = self.prepare(peers);
                match self.overlay.add_peers(&peers).await {
                    Ok(()) => tracing::debug!("Applied {} peers", peers.len()),
                    Err(e) => tracing::error!("Could not apply peers: {}", e),
                }
                self.backoff.on_success()
            }
            Err(e) => {
                let delay = self.backoff.on_failure();
                let failures = self.backoff.failures();
                if e.is_transient() {
                    tracing::warn!("Could not fetch peers ({} consecutive failures): {}", failures, e);
                } else {
                    tracing::error!("Could not fetch peers ({} consecutive failures): {}", failures, e);
                }
                delay
            }
        };

        self.state = SyncState::Backoff;
        tracing::debug!("Next fetch in {:?}", delay);
        delay
    }

    /// Loop until `shutdown` becomes true. The first fetch happens at once.
    ///
    /// A shutdown arriving mid-fetch waits for that fetch to finish.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut delay = Duration::ZERO;

        loop {
            self.state = SyncState::Idle;
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }

            let stop = {
                let cycle = self.run_cycle();
                tokio::pin!(cycle);
                tokio::select! {
                    next = &mut cycle => {
                        delay = next;
                        false
                    }
                    _ = shutdown_requested(&mut shutdown) => {
                        tracing::info!("Shutdown requested, finishing in-flight fetch");
                        (&mut cycle).await;
                        true
                    }
                }
            };
            if stop {
                break;
            }
        }

        self.state = SyncState::Idle;
        tracing::info!("Sync loop stopped");
    }
}

/// Resolves once shutdown is signalled or the sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}
