//! Sync Module
//!
//! Client side of peer replication: polling the server with backoff and
//! applying what it returns.

pub mod backoff;
mod fetcher;
mod worker;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use fetcher::{HttpFetcher, SnapshotSource, DEFAULT_FETCH_TIMEOUT};
pub use worker::{KeepalivePolicy, SyncState, SyncWorker};
