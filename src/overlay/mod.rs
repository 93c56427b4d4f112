//! Overlay Module
//!
//! Address derivation and the local tunnel interface.

pub mod allocator;
pub mod fabric;
mod state;
mod wireguard;

#[cfg(test)]
pub(crate) mod memory;

pub use allocator::{derive_address, OverlayNet};
pub use fabric::{DeviceConfig, FabricPeer, PeerConfig, TunnelFabric};
pub use state::{OverlayState, DEFAULT_MTU};
pub use wireguard::WgFabric;
