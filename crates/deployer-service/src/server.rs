//! Multiplexed listener setup and lifecycle.
//!
//! [`DeployServer`] is the explicit context object for one process: it owns
//! the resolved configuration, the protocol engines for its mode, and the
//! listener handle. There is no global configuration state; construction is
//! the `init` and [`DeployServer::shutdown`] the teardown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use deployer_proto::coordinator_server::CoordinatorServer;
use deployer_proto::worker_server::WorkerServer;
use tonic::service::Routes;
use tower::make::Shared;
use tracing::info;

use crate::config::{DeployerConfig, Mode};
use crate::error::{DeployerError, DeployerResult};
use crate::mux::MultiplexService;
use crate::rest;
use crate::status::{StatusAggregator, StatusService};
use crate::transfer::FileTransferService;

/// One deployer process: a multiplexed listener plus its protocol engines.
pub struct DeployServer {
    config: DeployerConfig,
    handle: Handle,
    aggregator: Arc<StatusAggregator>,
}

impl DeployServer {
    /// Create a server for the given resolved configuration.
    #[must_use]
    pub fn new(config: DeployerConfig) -> Self {
        Self {
            config,
            handle: Handle::new(),
            aggregator: Arc::new(StatusAggregator::new()),
        }
    }

    /// The aggregator owned by this server (coordinator mode).
    #[must_use]
    pub fn aggregator(&self) -> Arc<StatusAggregator> {
        Arc::clone(&self.aggregator)
    }

    /// Address the listener is bound to, once it is listening.
    ///
    /// Returns `None` if the server failed before binding. Mainly useful
    /// when the configured address carries port 0.
    pub async fn listening(&self) -> Option<SocketAddr> {
        self.handle.listening().await
    }

    /// Serve until shutdown is requested.
    ///
    /// With TLS configured the listener handshakes first and classifies the
    /// decrypted stream; without TLS it still accepts cleartext HTTP/2
    /// (h2c) connections so streaming RPC works without certificates.
    pub async fn serve(&self) -> DeployerResult<()> {
        let service = self.build_service().await?;
        let addr = self.config.addr;

        match &self.config.tls {
            Some(tls) => {
                let rustls = RustlsConfig::from_pem_file(&tls.cert_file, &tls.key_file)
                    .await
                    .map_err(|e| DeployerError::Tls(e.to_string()))?;
                info!(%addr, mode = ?self.config.mode, "listener starting with TLS");
                axum_server::bind_rustls(addr, rustls)
                    .handle(self.handle.clone())
                    .serve(Shared::new(service))
                    .await?;
            }
            None => {
                info!(%addr, mode = ?self.config.mode, "listener starting (cleartext, h2c accepted)");
                axum_server::bind(addr)
                    .handle(self.handle.clone())
                    .serve(Shared::new(service))
                    .await?;
            }
        }

        info!("listener stopped");
        Ok(())
    }

    /// Request graceful shutdown: stop accepting, give in-flight work the
    /// configured grace period, then force-close what remains.
    pub fn shutdown(&self) {
        let grace = Duration::from_secs(self.config.shutdown.grace_period_secs);
        info!(grace_secs = grace.as_secs(), "graceful shutdown requested");
        self.handle.graceful_shutdown(Some(grace));
    }

    async fn build_service(&self) -> DeployerResult<MultiplexService<Router, Router>> {
        let rest = rest::router();

        let grpc = match self.config.mode {
            Mode::Server => {
                info!("registering coordinator status service");
                Routes::new(CoordinatorServer::new(StatusService::new(
                    self.aggregator(),
                )))
            }
            Mode::Worker => {
                tokio::fs::create_dir_all(&self.config.transfer.deploy_root).await?;
                info!(
                    deploy_root = %self.config.transfer.deploy_root.display(),
                    "registering worker transfer service"
                );
                Routes::new(WorkerServer::new(FileTransferService::new(
                    self.config.transfer.clone(),
                )))
            }
        };

        Ok(MultiplexService::new(rest, grpc.into_axum_router()))
    }
}
