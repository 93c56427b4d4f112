//! Peer snapshot cache
//!
//! Holds the serialized peer table for a short time so a burst of polling
//! clients costs one fabric read. Only one rebuild runs at a time; requests
//! arriving during a rebuild wait for it and reuse its result.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::error::Result;
use crate::overlay::OverlayState;
use crate::peer::{encode_peers, Peer};

/// Default snapshot lifetime
pub const DEFAULT_SNAPSHOT_TTL: Duration = Duration::from_secs(5);

/// Serialized snapshot and the moment it was taken
struct CachedSnapshot {
    bytes: Bytes,
    created_at: Instant,
    peer_count: usize,
}

/// Time-limited cache of the sanitized, serialized peer table
pub struct SnapshotCache {
    overlay: Arc<OverlayState>,
    ttl: Duration,
    entry: RwLock<Option<CachedSnapshot>>,
    rebuild: Mutex<()>,
}

impl SnapshotCache {
    pub fn new(overlay: Arc<OverlayState>, ttl: Duration) -> Self {
        Self {
            overlay,
            ttl,
            entry: RwLock::new(None),
            rebuild: Mutex::new(()),
        }
    }

    /// Current snapshot bytes, rebuilt from the fabric if expired
    pub async fn get(&self) -> Result<Bytes> {
        if let Some(bytes) = self.fresh().await {
            tracing::debug!("Cache hit: true");
            return Ok(bytes);
        }

        let _guard = self.rebuild.lock().await;

        // Someone else may have rebuilt while we waited
        if let Some(bytes) = self.fresh().await {
            tracing::debug!("Cache hit: true (after rebuild)");
            return Ok(bytes);
        }
        tracing::debug!("Cache hit: false");

        let peers = self.read_sanitized().await;
        let bytes = Bytes::from(encode_peers(&peers)?);

        *self.entry.write().await = Some(CachedSnapshot {
            bytes: bytes.clone(),
            created_at: Instant::now(),
            peer_count: peers.len(),
        });
        tracing::debug!("Rebuilt snapshot with {} peers ({} bytes)", peers.len(), bytes.len());

        Ok(bytes)
    }

    /// Number of peers in the cached snapshot, if one is live
    pub async fn cached_peer_count(&self) -> Option<usize> {
        let entry = self.entry.read().await;
        entry
            .as_ref()
            .filter(|e| e.created_at.elapsed() < self.ttl)
            .map(|e| e.peer_count)
    }

    async fn fresh(&self) -> Option<Bytes> {
        let entry = self.entry.read().await;
        entry
            .as_ref()
            .filter(|e| e.created_at.elapsed() < self.ttl)
            .map(|e| e.bytes.clone())
    }

    /// Live peer table with secrets and keepalive policy stripped, ordered
    /// by key. A fabric read failure gives an empty table.
    async fn read_sanitized(&self) -> Vec<Peer> {
        let peers = match self.overlay.get_peers().await {
            Ok(peers) => peers,
            Err(e) => {
                tracing::warn!("Could not read peers, serving empty snapshot: {}", e);
                Vec::new()
            }
        };

        let mut sanitized: Vec<Peer> = peers.iter().map(Peer::sanitized).collect();
        sanitized.sort_by(|a, b| a.public_key().cmp(b.public_key()));
        sanitized
    }
}
