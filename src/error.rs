//! WolfMesh Error Types

use thiserror::Error;

/// Result type alias for WolfMesh operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfMesh error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Could not write configuration: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    // Key material errors
    #[error("Invalid key: {0}")]
    Key(String),

    // Tunnel fabric errors
    #[error("Could not {operation} on {interface}: {reason}")]
    Fabric {
        operation: &'static str,
        interface: String,
        reason: String,
    },

    #[error("Interface {0} does not exist")]
    InterfaceNotFound(String),

    // Snapshot errors
    #[error("Snapshot codec error: {0}")]
    Codec(#[from] bincode::Error),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Unexpected HTTP status {status} from {address}")]
    HttpStatus { address: String, status: u16 },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a fabric error for the given operation and interface
    pub fn fabric(operation: &'static str, interface: &str, reason: impl ToString) -> Self {
        Error::Fabric {
            operation,
            interface: interface.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Check if this error should only push the sync loop into backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Network(_)
                | Error::ConnectionFailed { .. }
                | Error::ConnectionTimeout(_)
                | Error::HttpStatus { .. }
                | Error::Codec(_)
        )
    }
}
