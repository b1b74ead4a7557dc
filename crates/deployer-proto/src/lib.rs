//! Wire contract for deployer inter-component communication.
//!
//! The gRPC surface is regenerated at build time from `proto/deployer.proto`:
//!
//! - `Coordinator/UpdateDeployStatus` — unary; workers push per-resource
//!   rollout snapshots to the coordinator and receive an [`Ack`].
//! - `Worker/SendDeployFile` — client-streaming; the coordinator streams
//!   [`FileChunk`] fragments to a worker and receives exactly one
//!   [`TransferOutcome`] after the stream closes.
//!
//! This crate only carries the generated types plus thin constructors; all
//! protocol behaviour lives in `deployer-service`.

tonic::include_proto!("deployer.v1");

/// Status code carried by an [`Ack`] when a report is accepted.
pub const ACK_OK: i32 = 200;

impl Ack {
    /// Acceptance acknowledgement: code 200, message "OK".
    #[must_use]
    pub fn ok() -> Self {
        Self {
            code: ACK_OK,
            message: "OK".to_owned(),
        }
    }

    /// Rejection acknowledgement with the given code and detail.
    #[must_use]
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Whether the acknowledgement signals acceptance.
    #[must_use]
    pub fn accepted(&self) -> bool {
        self.code == ACK_OK
    }
}

impl FileChunk {
    /// Whether the sender declared this the terminal chunk.
    ///
    /// Advisory only; end of transfer is defined by stream closure.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.remaining <= 0
    }
}

impl TransferOutcome {
    /// Successful terminal outcome for an assembled artifact.
    #[must_use]
    pub fn received(artifact_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            path: path.into(),
            state: TransferState::Received as i32,
            error: String::new(),
        }
    }

    /// Failed terminal outcome with a detail explaining the failure.
    #[must_use]
    pub fn failed(
        artifact_id: impl Into<String>,
        path: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            path: path.into(),
            state: TransferState::Failed as i32,
            error: error.into(),
        }
    }
}
