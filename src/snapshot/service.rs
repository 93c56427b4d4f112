//! Snapshot HTTP service
//!
//! A single read-only endpoint, `GET /`, answering with the current snapshot.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use super::cache::SnapshotCache;
use crate::error::{Error, Result};

/// Content type of snapshot responses
pub const SNAPSHOT_CONTENT_TYPE: &str = "application/octet-stream";

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(6);

/// HTTP server exposing the snapshot cache
pub struct SnapshotServer {
    listener: TcpListener,
    cache: Arc<SnapshotCache>,
    request_timeout: Duration,
}

impl SnapshotServer {
    /// Bind the listener; port 0 picks a free port
    pub async fn bind(
        address: SocketAddr,
        cache: Arc<SnapshotCache>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(address).await.map_err(|e| {
            Error::Network(format!("could not bind snapshot service to {}: {}", address, e))
        })?;
        Ok(Self {
            listener,
            cache,
            request_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Build the router
    pub fn router(cache: Arc<SnapshotCache>, request_timeout: Duration) -> Router {
        Router::new()
            .route("/", get(handle_snapshot))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(TimeoutLayer::new(request_timeout)),
            )
            .with_state(cache)
    }

    /// Serve until `shutdown` becomes true
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let address = self.local_addr()?;
        let app = Self::router(self.cache, self.request_timeout);
        tracing::info!("Snapshot service listening on {}", address);

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        tracing::info!("Snapshot service stopped");
        Ok(())
    }
}

async fn handle_snapshot(State(cache): State<Arc<SnapshotCache>>) -> Response {
    snapshot_response(cache.get().await)
}

fn snapshot_response(snapshot: Result<Bytes>) -> Response {
    match snapshot {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, SNAPSHOT_CONTENT_TYPE)],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Could not serve snapshot: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not serialize peers",
            )
                .into_response()
        }
    }
}
