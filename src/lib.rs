//! WolfMesh - Mesh Overlay Network over WireGuard
//!
//! A designated server node holds the authoritative list of peers; client
//! nodes poll it and converge their local tunnel configuration to match.
//!
//! # Architecture
//!
//! Every node derives every peer's overlay address from the peer's public
//! key and the overlay prefix, so addressing needs no coordination. The
//! server serves a short-lived cached snapshot of its peer table over HTTP
//! inside the tunnel; clients fetch it on a timer with exponential backoff
//! and apply it to their own interface.
//!
//! # Features
//!
//! - Deterministic key-derived overlay addressing (IPv4 or IPv6)
//! - Sanitized, TTL-cached peer snapshots with a single in-flight rebuild
//! - Serialized client sync loop with jittered exponential backoff
//! - Configurable per-address-family keepalive policy
//! - Pluggable tunnel fabric, with a WireGuard driver using `ip` and `wg`

pub mod config;
pub mod crypto;
pub mod error;
pub mod overlay;
pub mod peer;
pub mod snapshot;
pub mod sync;

pub use config::WolfMeshConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfMeshConfig;
    pub use crate::crypto::{Key, KeyPair};
    pub use crate::error::{Error, Result};
    pub use crate::overlay::{OverlayNet, OverlayState, TunnelFabric, WgFabric};
    pub use crate::peer::Peer;
    pub use crate::snapshot::{SnapshotCache, SnapshotServer};
    pub use crate::sync::{HttpFetcher, SyncWorker};
}
