//! API Server
//!
//! Serves the REST API and stops it, along with any in-flight discovery,
//! on shutdown.

use crate::error::{Error, Result};
use axum::extract::DefaultBodyLimit;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info};

use super::rest::RestRouter;
use crate::controlplane::coordinator::RpcCoordinator;
use crate::domain::ports::PodInventoryRef;
use crate::hardware::numa::NumaAccountant;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
    /// Request timeout in seconds; must outlast a discovery fan-out
    pub request_timeout_secs: u64,
    /// Max request body size
    pub max_body_size: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
            request_timeout_secs: 180,
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

/// REST API server
pub struct ApiServer {
    config: ApiServerConfig,
    coordinator: Arc<RpcCoordinator>,
    inventory: PodInventoryRef,
    accountant: NumaAccountant,
    shutdown_tx: broadcast::Sender<()>,
    cancel: CancellationToken,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(
        config: ApiServerConfig,
        coordinator: Arc<RpcCoordinator>,
        inventory: PodInventoryRef,
        accountant: NumaAccountant,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            coordinator,
            inventory,
            accountant,
            shutdown_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Run the API server until shutdown
    pub async fn run(&self) -> Result<()> {
        info!("Starting API server");
        info!("  REST API: {}", self.config.rest_addr);
        info!("  Accounting policy: {}", self.accountant.config().pinning);

        let rest_handle = self.spawn_rest_server();

        match rest_handle.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("REST server error: {}", e);
                Err(e)
            }
            Err(e) => Err(Error::Internal(format!("REST server task failed: {}", e))),
        }
    }

    fn spawn_rest_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let config = self.config.clone();
        let router = RestRouter::new(
            self.coordinator.clone(),
            self.inventory.clone(),
            self.accountant,
        )
        .with_shutdown(self.cancel.clone());
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move { run_rest_server(config, router, shutdown_rx).await })
    }

    /// Trigger graceful shutdown and cancel in-flight discoveries
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let _ = self.shutdown_tx.send(());
    }

    /// Token cancelled on shutdown
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Run the REST API server
async fn run_rest_server(
    config: ApiServerConfig,
    router: RestRouter,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let app = router
        .build()
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        .layer(DefaultBodyLimit::max(config.max_body_size));

    let listener = tokio::net::TcpListener::bind(config.rest_addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;
    info!("REST API listening on {}", config.rest_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("REST server shutting down");
        })
        .await
        .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

    Ok(())
}
