//! File transfer engine on the worker side.
//!
//! One client-streaming call delivers one artifact as an ordered sequence of
//! [`FileChunk`]s. The engine pins the metadata of the first chunk, decodes
//! each payload under its declared codec, and spools decoded bytes into a
//! temp file under the deploy root while hashing them incrementally. End of
//! transfer is the close of the stream, not the sender's `remaining`
//! counter; only then is the digest verified and the spool renamed into
//! place. Every exit path other than a successful commit drops the spool,
//! so a partial artifact is never visible at the destination.

use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use deployer_proto::worker_server::Worker;
use deployer_proto::{FileChunk, TransferOutcome};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};

use crate::config::TransferConfig;
use crate::error::TransferError;

/// File-name prefix of spool files under the deploy root.
const SPOOL_PREFIX: &str = ".spool";

/// Releases the in-flight claim on a destination path when dropped.
struct PathClaim {
    active: Arc<DashMap<PathBuf, ()>>,
    dest: PathBuf,
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        self.active.remove(&self.dest);
    }
}

/// In-progress assembly of one artifact, exclusively owned by its stream.
///
/// Dropping the assembly discards the spool file and releases the path
/// claim, which is what makes abrupt disconnects safe.
struct ChunkAssembly {
    artifact_id: String,
    rel_path: String,
    dest: PathBuf,
    /// Normalised (lowercase, prefix-stripped) declared digest.
    digest: String,
    /// Declared digest exactly as it appeared on the first chunk, used for
    /// consistency checks against later chunks.
    declared_digest: String,
    hasher: Sha256,
    spool: NamedTempFile,
    last_remaining: i64,
    _claim: PathClaim,
}

/// Per-stream state machine: OPEN -> RECEIVING -> {ASSEMBLED, FAILED}.
///
/// A failure mid-stream parks the state in `Failed` and later chunks are
/// drained unprocessed; the single terminal outcome is still emitted only
/// once the stream closes.
enum StreamState {
    Open,
    Receiving(Box<ChunkAssembly>),
    Failed {
        artifact_id: String,
        path: String,
        error: TransferError,
    },
}

/// Shared engine state: configuration plus the in-flight path registry.
struct TransferEngine {
    config: TransferConfig,
    active: Arc<DashMap<PathBuf, ()>>,
}

impl TransferEngine {
    fn new(config: TransferConfig) -> Self {
        Self {
            config,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Advance the state machine with one received chunk.
    fn ingest(&self, state: StreamState, chunk: FileChunk) -> StreamState {
        match state {
            StreamState::Open => {
                let artifact_id = chunk.artifact_id.clone();
                let path = chunk.path.clone();
                match self.begin(chunk) {
                    Ok(assembly) => StreamState::Receiving(Box::new(assembly)),
                    Err(error) => StreamState::Failed {
                        artifact_id,
                        path,
                        error,
                    },
                }
            }
            StreamState::Receiving(mut assembly) => match absorb(&mut assembly, chunk) {
                Ok(()) => StreamState::Receiving(assembly),
                Err(error) => StreamState::Failed {
                    artifact_id: assembly.artifact_id.clone(),
                    path: assembly.rel_path.clone(),
                    error,
                },
            },
            // Already failed: drain without processing.
            failed @ StreamState::Failed { .. } => failed,
        }
    }

    /// Start a new assembly from the first chunk of a stream.
    fn begin(&self, chunk: FileChunk) -> Result<ChunkAssembly, TransferError> {
        if chunk.artifact_id.is_empty() {
            return Err(TransferError::MissingMetadata("artifact_id"));
        }
        if chunk.digest.is_empty() {
            return Err(TransferError::MissingMetadata("digest"));
        }
        let dest = resolve_destination(&self.config.deploy_root, &chunk.path)?;

        let claim = match self.active.entry(dest.clone()) {
            Entry::Occupied(_) => return Err(TransferError::PathConflict(chunk.path)),
            Entry::Vacant(vacant) => {
                vacant.insert(());
                PathClaim {
                    active: Arc::clone(&self.active),
                    dest: dest.clone(),
                }
            }
        };

        let spool = tempfile::Builder::new()
            .prefix(SPOOL_PREFIX)
            .tempfile_in(&self.config.deploy_root)?;
        let mut assembly = ChunkAssembly {
            artifact_id: chunk.artifact_id.clone(),
            rel_path: chunk.path.clone(),
            dest,
            digest: normalize_digest(&chunk.digest),
            declared_digest: chunk.digest.clone(),
            hasher: Sha256::new(),
            spool,
            last_remaining: chunk.remaining,
            _claim: claim,
        };
        append_payload(&mut assembly, &chunk)?;
        Ok(assembly)
    }

    /// Emit the single terminal outcome once the stream has closed.
    async fn conclude(&self, state: StreamState) -> TransferOutcome {
        match state {
            StreamState::Open => {
                TransferOutcome::failed("", "", TransferError::EmptyStream.to_string())
            }
            StreamState::Receiving(assembly) => {
                let artifact_id = assembly.artifact_id.clone();
                let path = assembly.rel_path.clone();
                match self.finalize(*assembly).await {
                    Ok(()) => TransferOutcome::received(artifact_id, path),
                    Err(error) => TransferOutcome::failed(artifact_id, path, error.to_string()),
                }
            }
            StreamState::Failed {
                artifact_id,
                path,
                error,
            } => TransferOutcome::failed(artifact_id, path, error.to_string()),
        }
    }

    /// Verify the digest and atomically commit the spool to its destination.
    async fn finalize(&self, assembly: ChunkAssembly) -> Result<(), TransferError> {
        let ChunkAssembly {
            rel_path,
            dest,
            digest,
            hasher,
            spool,
            _claim,
            ..
        } = assembly;

        let actual = hex::encode(hasher.finalize());
        if actual != digest {
            return Err(TransferError::DigestMismatch {
                declared: digest,
                actual,
            });
        }

        let timeout = Duration::from_secs(self.config.commit_timeout_secs);
        let commit = tokio::task::spawn_blocking(move || -> Result<(), TransferError> {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            spool.persist(&dest).map_err(|e| TransferError::Storage(e.error))?;
            Ok(())
        });

        match tokio::time::timeout(timeout, commit).await {
            Err(_) => Err(TransferError::CommitTimeout(timeout)),
            Ok(Err(join_error)) => Err(TransferError::Storage(std::io::Error::other(
                join_error.to_string(),
            ))),
            Ok(Ok(result)) => {
                if result.is_ok() {
                    debug!(path = %rel_path, "artifact committed");
                }
                result
            }
        }
        // _claim drops here, releasing the destination path.
    }
}

/// Validate a chunk against the pinned metadata and append its payload.
fn absorb(assembly: &mut ChunkAssembly, chunk: FileChunk) -> Result<(), TransferError> {
    if chunk.artifact_id != assembly.artifact_id {
        return Err(TransferError::MetadataMismatch {
            field: "artifact_id",
            expected: assembly.artifact_id.clone(),
            actual: chunk.artifact_id,
        });
    }
    if chunk.path != assembly.rel_path {
        return Err(TransferError::MetadataMismatch {
            field: "path",
            expected: assembly.rel_path.clone(),
            actual: chunk.path,
        });
    }
    if chunk.digest != assembly.declared_digest {
        return Err(TransferError::MetadataMismatch {
            field: "digest",
            expected: assembly.declared_digest.clone(),
            actual: chunk.digest,
        });
    }

    if chunk.remaining > assembly.last_remaining {
        // Advisory counter only; end of transfer is stream closure.
        debug!(
            artifact_id = %assembly.artifact_id,
            previous = assembly.last_remaining,
            declared = chunk.remaining,
            "sender remaining counter increased"
        );
    }
    assembly.last_remaining = chunk.remaining;

    append_payload(assembly, &chunk)
}

/// Decode one payload under its declared codec and spool the bytes.
fn append_payload(assembly: &mut ChunkAssembly, chunk: &FileChunk) -> Result<(), TransferError> {
    let decoded = decode_payload(&chunk.compression, &chunk.payload)?;
    assembly.hasher.update(&decoded);
    assembly.spool.write_all(&decoded)?;
    Ok(())
}

fn decode_payload(codec: &str, payload: &[u8]) -> Result<Vec<u8>, TransferError> {
    match codec {
        "" | "none" | "identity" => Ok(payload.to_vec()),
        "gzip" => {
            let mut decoded = Vec::new();
            GzDecoder::new(payload)
                .read_to_end(&mut decoded)
                .map_err(|source| TransferError::Decode {
                    codec: codec.to_owned(),
                    source,
                })?;
            Ok(decoded)
        }
        other => Err(TransferError::UnknownCodec(other.to_owned())),
    }
}

/// Resolve a chunk's destination under the deploy root.
///
/// Absolute paths and parent-directory components are rejected so a peer
/// cannot write outside the root.
fn resolve_destination(root: &Path, rel_path: &str) -> Result<PathBuf, TransferError> {
    if rel_path.is_empty() {
        return Err(TransferError::MissingMetadata("path"));
    }
    let path = Path::new(rel_path);
    if path.is_absolute() {
        return Err(TransferError::InvalidPath(rel_path.to_owned()));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(TransferError::InvalidPath(rel_path.to_owned())),
        }
    }
    Ok(root.join(path))
}

/// Strip an optional `sha256:` prefix and lowercase the hex digits.
fn normalize_digest(digest: &str) -> String {
    digest
        .strip_prefix("sha256:")
        .unwrap_or(digest)
        .to_ascii_lowercase()
}

/// gRPC facade over the transfer engine.
pub struct FileTransferService {
    engine: Arc<TransferEngine>,
}

impl FileTransferService {
    /// Create the worker service with the given transfer settings.
    #[must_use]
    pub fn new(config: TransferConfig) -> Self {
        Self {
            engine: Arc::new(TransferEngine::new(config)),
        }
    }
}

impl Clone for FileTransferService {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

#[tonic::async_trait]
impl Worker for FileTransferService {
    async fn send_deploy_file(
        &self,
        request: Request<Streaming<FileChunk>>,
    ) -> Result<Response<TransferOutcome>, Status> {
        let mut stream = request.into_inner();
        let mut state = StreamState::Open;

        loop {
            match stream.message().await {
                Ok(Some(chunk)) => {
                    state = self.engine.ingest(state, chunk);
                }
                Ok(None) => break,
                Err(status) => {
                    // Connection lost mid-stream: the assembly drops here,
                    // discarding the spool and releasing the path claim.
                    warn!(error = %status, "chunk stream aborted, discarding partial artifact");
                    return Err(status);
                }
            }
        }

        let outcome = self.engine.conclude(state).await;
        info!(
            artifact_id = %outcome.artifact_id,
            path = %outcome.path,
            state = ?outcome.state(),
            error = %outcome.error,
            "transfer concluded"
        );
        Ok(Response::new(outcome))
    }
}
