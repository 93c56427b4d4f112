//! Snapshot Module
//!
//! Server side of peer replication: the cached peer table and the HTTP
//! endpoint clients poll.

mod cache;
mod service;

use crate::overlay::OverlayState;
use crate::peer::Peer;

pub use cache::{SnapshotCache, DEFAULT_SNAPSHOT_TTL};
pub use service::{SnapshotServer, DEFAULT_REQUEST_TIMEOUT, SNAPSHOT_CONTENT_TYPE};

/// Put the configured clients on the server's interface.
///
/// Returns how many were registered. A fabric failure is logged and the
/// server keeps serving whatever table the interface already holds.
pub async fn register_clients(overlay: &OverlayState, clients: &[Peer]) -> usize {
    match overlay.add_peers(clients).await {
        Ok(()) => {
            tracing::info!("Registered {} clients", clients.len());
            clients.len()
        }
        Err(e) => {
            tracing::error!("Could not add peers: {}", e);
            0
        }
    }
}
