//! Key material for WolfMesh
//!
//! WireGuard keys are 32-byte X25519 values exchanged as standard base64.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{Error, Result};

/// Length of every key in bytes
pub const KEY_LEN: usize = 32;

/// A 32-byte WireGuard key (public, private or preshared)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    /// The all-zero key, used as "no preshared key"
    pub const fn zero() -> Self {
        Self([0u8; KEY_LEN])
    }

    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; KEY_LEN]
    }

    /// Encode as standard base64
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(s.trim())
            .map_err(|e| Error::Key(format!("not valid base64: {}", e)))?;
        if bytes.len() != KEY_LEN {
            return Err(Error::Key(format!(
                "invalid key length: {} (expected {})",
                bytes.len(),
                KEY_LEN
            )));
        }
        let mut arr = [0u8; KEY_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.to_base64())
    }
}

/// X25519 keypair for this node
#[derive(Clone)]
pub struct KeyPair {
    private: Key,
    pub public: Key,
}

impl KeyPair {
    /// Derive the public key from a private key, as `wg pubkey` does
    pub fn from_private(private: Key) -> Self {
        let secret = StaticSecret::from(*private.as_bytes());
        let public = PublicKey::from(&secret);
        Self {
            private,
            public: Key::from_bytes(*public.as_bytes()),
        }
    }

    /// Generate a new random keypair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        Self::from_private(Key::from_bytes(secret.to_bytes()))
    }

    /// Parse a base64 private key
    pub fn parse(private_b64: &str) -> Result<Self> {
        let private = private_b64
            .parse::<Key>()
            .map_err(|e| Error::Key(format!("could not parse private key: {}", e)))?;
        Ok(Self::from_private(private))
    }

    pub fn private_key(&self) -> &Key {
        &self.private
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}
