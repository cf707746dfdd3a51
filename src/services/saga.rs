//! Deposit and claim as explicit state machines.
//!
//! The content store and the metadata store share no transaction, so the
//! row/blob pairing is kept by step ordering: blobs are written before their
//! row is inserted and deleted only after their row's delete has committed.
//! Each stage below names what must be undone if the following step fails.

use bytes::Bytes;
use std::sync::Arc;

use crate::error::{AppError, IntegrityFault};
use crate::storage::BlobStore;

/// Progress of a deposit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositStage {
    /// Policy and quota checks passed, nothing written yet
    Admitted,
    /// Sealed blob is on the content store, row not yet inserted
    BlobWritten { id: String },
    /// Row inserted; the deposit is durable
    Recorded,
}

/// Undo action owed by a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    Nothing,
    DeleteBlob(String),
}

impl DepositStage {
    pub fn blob_written(self, id: &str) -> Self {
        match self {
            DepositStage::Admitted => DepositStage::BlobWritten { id: id.to_string() },
            other => other,
        }
    }

    pub fn recorded(self) -> Self {
        DepositStage::Recorded
    }

    pub fn compensation(&self) -> Compensation {
        match self {
            DepositStage::BlobWritten { id } => Compensation::DeleteBlob(id.clone()),
            DepositStage::Admitted | DepositStage::Recorded => Compensation::Nothing,
        }
    }
}

/// Holds the `DeleteBlob` compensation of a written blob while its row insert
/// is in flight.
///
/// If the deposit future is dropped before [`settle`](Self::settle) is called,
/// the blob delete is spawned onto the runtime and a failure is reported as an
/// integrity fault.
pub struct BlobWriteGuard {
    blobs: Arc<dyn BlobStore>,
    id: Option<String>,
}

impl BlobWriteGuard {
    pub fn new(blobs: Arc<dyn BlobStore>, id: &str) -> Self {
        Self {
            blobs,
            id: Some(id.to_string()),
        }
    }

    /// The insert has resolved and the caller owns any compensation from here.
    pub fn settle(mut self) {
        self.id = None;
    }
}

impl Drop for BlobWriteGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        tracing::warn!(id = %id, "Deposit abandoned after blob write, removing blob");

        let blobs = self.blobs.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = blobs.delete(&id).await {
                        IntegrityFault::orphaned_blob(
                            &id,
                            format!("cleanup of abandoned deposit failed: {}", e),
                        )
                        .report();
                    }
                });
            }
            Err(_) => {
                IntegrityFault::orphaned_blob(&id, "deposit abandoned outside a runtime").report();
            }
        }
    }
}

/// What to do with an open claim transaction once the blob read has finished
#[derive(Debug)]
pub enum ClaimResolution {
    /// Plaintext in hand: commit the row delete, then drop the blob
    Commit(Bytes),
    /// Blob already gone: commit the row delete so it stops pointing at nothing, report not found
    CommitAsMissing,
    /// Any other failure: roll back so the row survives, surface the error
    Rollback(AppError),
}

impl ClaimResolution {
    pub fn from_read(read: Result<Vec<u8>, AppError>) -> Self {
        match read {
            Ok(plaintext) => ClaimResolution::Commit(Bytes::from(plaintext)),
            Err(AppError::BlobNotFound(_)) => ClaimResolution::CommitAsMissing,
            Err(err) => ClaimResolution::Rollback(err),
        }
    }
}
