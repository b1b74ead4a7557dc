//! Error types for the deployer engine.
//!
//! The taxonomy follows the propagation policy of the protocol: fatal errors
//! ([`DeployerError`]) abort process startup, per-transfer errors
//! ([`TransferError`]) surface through `TransferOutcome` with state FAILED,
//! and per-report errors ([`AggregationError`]) surface through a non-200
//! `Ack`. Nothing is silently swallowed, and an error local to one stream
//! never affects another.

use std::io;
use std::time::Duration;

/// Result type alias using [`DeployerError`].
pub type DeployerResult<T> = Result<T, DeployerError>;

/// Fatal errors that abort startup or tear down the listener.
#[derive(Debug, thiserror::Error)]
pub enum DeployerError {
    /// Bad or missing settings; fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error (bind failure, deploy root creation, ...).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS certificate/key could not be loaded.
    #[error("TLS setup error: {0}")]
    Tls(String),
}

impl DeployerError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Errors local to a single file transfer.
///
/// These are always reported to the sender through the terminal
/// `TransferOutcome`, never as a gRPC status and never by crashing the
/// engine.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// A later chunk contradicted the metadata pinned by the first chunk.
    #[error("inconsistent chunk metadata: {field} changed from {expected:?} to {actual:?}")]
    MetadataMismatch {
        /// Which metadata field changed.
        field: &'static str,
        /// Value pinned by the first chunk.
        expected: String,
        /// Value declared by the offending chunk.
        actual: String,
    },

    /// The chunk named a compression codec the engine does not know.
    #[error("unknown compression codec {0:?}")]
    UnknownCodec(String),

    /// The payload could not be decoded under its declared codec.
    #[error("payload decode failed for codec {codec:?}: {source}")]
    Decode {
        /// Declared codec name.
        codec: String,
        /// Underlying decode error.
        source: io::Error,
    },

    /// The assembled artifact's digest did not match the declared digest.
    #[error("digest mismatch: declared {declared}, assembled {actual}")]
    DigestMismatch {
        /// Digest declared on the chunks.
        declared: String,
        /// Digest computed over the assembled bytes.
        actual: String,
    },

    /// The destination path was empty, absolute, or escaped the deploy root.
    #[error("invalid destination path {0:?}")]
    InvalidPath(String),

    /// Another transfer to the same destination path is in flight.
    #[error("transfer already in flight for path {0:?}")]
    PathConflict(String),

    /// Required metadata was missing on the first chunk.
    #[error("missing chunk metadata: {0}")]
    MissingMetadata(&'static str),

    /// The stream closed before any chunk arrived.
    #[error("stream closed before any chunk was received")]
    EmptyStream,

    /// Writing the spool or committing the artifact failed.
    #[error("storage error: {0}")]
    Storage(#[from] io::Error),

    /// Committing the assembled artifact exceeded the configured bound.
    #[error("artifact commit timed out after {0:?}")]
    CommitTimeout(Duration),
}

/// Errors local to a single deployment report.
#[derive(Debug, thiserror::Error)]
pub enum AggregationError {
    /// Reports must carry a deployment identifier.
    #[error("deployment_id must not be empty")]
    EmptyDeploymentId,
}

impl AggregationError {
    /// Acknowledgement code to return for this error.
    #[must_use]
    pub const fn ack_code(&self) -> i32 {
        match self {
            Self::EmptyDeploymentId => 400,
        }
    }
}
