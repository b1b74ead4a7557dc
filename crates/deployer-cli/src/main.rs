//! Deployer binary.
//!
//! `deployer run` starts the multiplexed listener in the configured mode;
//! `deployer render` expands manifest templates against a values file.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use deployer_service::{DeployServer, DeployerConfig};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Deployer control plane and worker.
#[derive(Parser, Debug)]
#[command(name = "deployer")]
#[command(about = "Deploy-file transfer and deploy-status aggregation")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the listener in server or worker mode.
    Run {
        /// Path to configuration file.
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Listen address, overriding the configuration.
        #[arg(short, long, value_name = "ADDR")]
        addr: Option<SocketAddr>,
    },
    /// Render manifest templates against a YAML values file.
    Render {
        /// Values file.
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,

        /// Output directory.
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,

        /// Template files or directories.
        #[arg(required = true, value_name = "INPUT")]
        inputs: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug,hyper=info,tower=info"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match cli.command {
        Command::Run { config, addr } => run(config, addr).await,
        Command::Render {
            file,
            output,
            inputs,
        } => {
            deployer_render::execute(&file, &output, &inputs)?;
            info!(output = %output.display(), inputs = inputs.len(), "rendered manifests");
            Ok(())
        }
    }
}

async fn run(config_file: Option<PathBuf>, addr: Option<SocketAddr>) -> anyhow::Result<()> {
    let mut config = DeployerConfig::load(config_file.as_deref())?;
    if let Some(addr) = addr {
        config.addr = addr;
    }

    info!(
        mode = ?config.mode,
        addr = %config.addr,
        tls = config.tls.is_some(),
        "configuration loaded"
    );

    let server = Arc::new(DeployServer::new(config));

    let stopping = Arc::clone(&server);
    tokio::spawn(async move {
        shutdown_signal().await;
        stopping.shutdown();
    });

    server.serve().await?;

    info!("deployer shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
    }
}
