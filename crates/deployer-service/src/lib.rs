//! Deployer engine: a protocol-multiplexed listener serving the deploy-file
//! transfer protocol and the deploy-status aggregation model.
//!
//! One listening socket carries both the binary gRPC surface and the
//! textual REST surface, optionally under TLS. In server (coordinator)
//! mode the process aggregates `DeploymentReport`s; in worker mode it
//! receives streamed deploy files, verifies their integrity, and commits
//! them under the deploy root.

pub mod config;
pub mod error;
pub mod mux;
pub mod rest;
pub mod server;
pub mod status;
pub mod transfer;

pub use config::{DeployerConfig, Mode, ShutdownConfig, TlsConfig, TransferConfig};
pub use error::{AggregationError, DeployerError, DeployerResult, TransferError};
pub use server::DeployServer;
pub use status::{DeploymentRecord, StatusAggregator};
pub use transfer::FileTransferService;
