//! Snapshot fetching
//!
//! One HTTP GET per sync cycle with a fixed timeout. Any failure, including
//! a timeout or a non-2xx status, is reported as an error for the backoff.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::peer::{decode_peers, Peer};

/// Default timeout of one fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(11);

/// Where the sync worker gets its peer list from
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Peer>>;
}

/// Fetches snapshots from the server's snapshot service
pub struct HttpFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpFetcher {
    pub fn new(server: SocketAddr, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("could not create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: format!("http://{}/", server),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SnapshotSource for HttpFetcher {
    async fn fetch(&self) -> Result<Vec<Peer>> {
        tracing::debug!("Fetching peers from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                address: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| self.map_error(e))?;
        let peers = decode_peers(&body)?;
        tracing::debug!("Fetched {} peers", peers.len());
        Ok(peers)
    }
}

impl HttpFetcher {
    fn map_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::ConnectionTimeout(self.url.clone())
        } else if e.is_connect() {
            Error::ConnectionFailed {
                address: self.url.clone(),
                reason: e.to_string(),
            }
        } else {
            Error::Network(e.to_string())
        }
    }
}
