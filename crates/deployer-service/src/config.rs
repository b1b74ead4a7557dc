//! Configuration types for the deployer.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::Deserialize;

use crate::error::DeployerError;

/// Default listen port, shared by server and worker mode.
pub const DEFAULT_PORT: u16 = 9000;

/// Default directory artifacts are assembled under in worker mode.
pub const DEFAULT_DEPLOY_ROOT: &str = "./deploy";

/// Default bound on committing an assembled artifact, in seconds.
pub const DEFAULT_COMMIT_TIMEOUT_SECS: u64 = 30;

/// Default graceful-shutdown grace period, in seconds.
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 5;

/// Which role this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Coordinator: aggregates deploy status reports.
    Server,
    /// Worker: receives streamed deploy files.
    Worker,
}

/// Resolved deployer configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeployerConfig {
    /// Process role.
    pub mode: Mode,
    /// Listen address for the multiplexed listener.
    pub addr: SocketAddr,
    /// Optional transport security; when absent the listener still accepts
    /// cleartext HTTP/2 (h2c) gRPC traffic.
    pub tls: Option<TlsConfig>,
    /// File transfer engine settings (worker mode).
    pub transfer: TransferConfig,
    /// Shutdown behaviour.
    pub shutdown: ShutdownConfig,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Server,
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            tls: None,
            transfer: TransferConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl DeployerConfig {
    /// Load configuration from an optional YAML file and the environment.
    ///
    /// Sources are merged in order (later overrides earlier):
    /// 1. Default values
    /// 2. The given YAML file (an explicitly named file must exist)
    /// 3. Environment variables prefixed with `DEPLOYER_`, with `__`
    ///    separating nested keys (e.g. `DEPLOYER_TLS__CERT_FILE`)
    pub fn load(path: Option<&Path>) -> Result<Self, DeployerError> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            if !path.exists() {
                return Err(DeployerError::config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::prefixed("DEPLOYER_").split("__"))
            .extract()
            .map_err(|e| DeployerError::Config(e.to_string()))
    }
}

/// Certificate/key pair for the TLS listener.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// PEM certificate chain file.
    pub cert_file: PathBuf,
    /// PEM private key file.
    pub key_file: PathBuf,
}

/// File transfer engine settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Root directory destination paths are resolved under.
    pub deploy_root: PathBuf,
    /// Bound on committing an assembled artifact to its destination.
    pub commit_timeout_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            deploy_root: PathBuf::from(DEFAULT_DEPLOY_ROOT),
            commit_timeout_secs: DEFAULT_COMMIT_TIMEOUT_SECS,
        }
    }
}

/// Shutdown behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long in-flight transfers and reports get to finish before the
    /// listener force-closes remaining connections.
    pub grace_period_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config() {
        let config = DeployerConfig::default();
        assert_eq!(config.mode, Mode::Server);
        assert_eq!(config.addr.port(), DEFAULT_PORT);
        assert!(config.tls.is_none());
        assert_eq!(
            config.shutdown.grace_period_secs,
            DEFAULT_GRACE_PERIOD_SECS
        );
    }

    #[test]
    fn load_from_yaml_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("deployer.yaml");
        let mut file = std::fs::File::create(&path).expect("create config");
        writeln!(
            file,
            "mode: worker\naddr: 127.0.0.1:9443\ntls:\n  cert_file: /etc/deployer/cert.pem\n  key_file: /etc/deployer/key.pem\ntransfer:\n  deploy_root: /var/lib/deployer\n"
        )
        .expect("write config");

        let config = DeployerConfig::load(Some(&path)).expect("load config");
        assert_eq!(config.mode, Mode::Worker);
        assert_eq!(config.addr.port(), 9443);
        let tls = config.tls.expect("tls section");
        assert_eq!(tls.cert_file, PathBuf::from("/etc/deployer/cert.pem"));
        assert_eq!(
            config.transfer.deploy_root,
            PathBuf::from("/var/lib/deployer")
        );
        // Unset sections keep their defaults.
        assert_eq!(
            config.transfer.commit_timeout_secs,
            DEFAULT_COMMIT_TIMEOUT_SECS
        );
    }

    #[test]
    fn invalid_mode_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("deployer.yaml");
        std::fs::write(&path, "mode: sidecar\n").expect("write config");

        let err = DeployerConfig::load(Some(&path)).expect_err("bad mode");
        assert!(matches!(err, DeployerError::Config(_)));
    }

    #[test]
    fn missing_explicit_file_is_fatal() {
        let err = DeployerConfig::load(Some(Path::new("/nonexistent/deployer.yaml")))
            .expect_err("missing file");
        assert!(matches!(err, DeployerError::Config(_)));
    }
}
