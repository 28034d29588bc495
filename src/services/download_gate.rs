//! src/services/download_gate.rs
//!
//! DownloadGate — the consume-once protocol. A filename is handed out at most
//! once: pre-check the grant, confirm the object exists, then create the
//! grant inside a single-key transaction that re-checks before writing. Only
//! the winner of that transaction gets the bytes.
//!
//! Collaborator failures are logged here, once, with the operation that
//! produced them, and leave the gate as a `GateError`.

use crate::{
    models::grant::{Grant, Requester},
    services::{
        grant_store::{GrantOutcome, GrantStore},
        object_store::{ObjectResponse, ObjectStore, ObjectStoreError},
    },
};
use thiserror::Error;
use tracing::{debug, error, info};

/// Longest accepted filename, in bytes of its UTF-8 encoding.
pub const MAX_FILENAME_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid filename: {0}")]
    InvalidInput(&'static str),
    #[error("`{0}` has already been downloaded")]
    AlreadyGranted(String),
    #[error("`{0}` does not exist")]
    ObjectMissing(String),
    #[error("record store failure during {operation}")]
    RecordStore {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("object store failure during {operation}")]
    ObjectStore {
        operation: &'static str,
        #[source]
        source: ObjectStoreError,
    },
    #[error("delivery of `{filename}` failed after it was granted")]
    Delivery {
        filename: String,
        #[source]
        source: ObjectStoreError,
    },
}

pub type GateResult<T> = Result<T, GateError>;

/// Accept a non-empty filename of at most `MAX_FILENAME_LEN` bytes.
///
/// The name is otherwise used verbatim as the record key and object name.
pub fn validate_filename(raw: &str) -> GateResult<&str> {
    if raw.is_empty() {
        return Err(GateError::InvalidInput("empty filename"));
    }
    if raw.len() > MAX_FILENAME_LEN {
        return Err(GateError::InvalidInput("filename too long"));
    }
    Ok(raw)
}

#[derive(Clone)]
pub struct DownloadGate {
    grants: GrantStore,
    objects: ObjectStore,
}

impl DownloadGate {
    pub fn new(grants: GrantStore, objects: ObjectStore) -> Self {
        Self { grants, objects }
    }

    pub fn grants(&self) -> &GrantStore {
        &self.grants
    }

    /// Run the grant protocol for `filename`.
    ///
    /// Returns the freshly committed grant. Nothing is written unless the
    /// object exists and no grant was present inside the transaction.
    pub async fn authorize(&self, filename: &str, requester: &Requester) -> GateResult<Grant> {
        let filename = validate_filename(filename)?;

        match self.grants.find(filename).await {
            Ok(Some(existing)) => {
                debug!(filename, granted_at = %existing.downloaded_at, "already granted");
                return Err(GateError::AlreadyGranted(filename.to_string()));
            }
            Ok(None) => {}
            Err(source) => return Err(record_store_failure("grants.find", source)),
        }

        match self.objects.exists(filename).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(filename, "object missing");
                return Err(GateError::ObjectMissing(filename.to_string()));
            }
            Err(source) => return Err(object_store_failure("objects.exists", source)),
        }

        match self.grants.try_grant(filename, requester).await {
            Ok(GrantOutcome::Granted(grant)) => {
                info!(
                    filename,
                    grant = %serde_json::to_string(&grant).unwrap_or_default(),
                    "download granted"
                );
                Ok(grant)
            }
            Ok(GrantOutcome::AlreadyGranted) => {
                info!(filename, "lost grant race to a concurrent request");
                Err(GateError::AlreadyGranted(filename.to_string()))
            }
            Err(source) => Err(record_store_failure("grants.try_grant", source)),
        }
    }

    /// Open the payload for a committed grant, with provider headers removed.
    ///
    /// A failure here does not touch the grant: the filename stays consumed.
    pub async fn deliver(&self, grant: &Grant) -> GateResult<ObjectResponse> {
        match self.objects.fetch(&grant.filename).await {
            Ok(object) => Ok(object.sanitized()),
            Err(source) => {
                error!(
                    filename = %grant.filename,
                    operation = "objects.fetch",
                    error = %source,
                    "delivery failed after grant was committed"
                );
                Err(GateError::Delivery {
                    filename: grant.filename.clone(),
                    source,
                })
            }
        }
    }

    /// `authorize` followed by `deliver`.
    pub async fn download(
        &self,
        filename: &str,
        requester: &Requester,
    ) -> GateResult<ObjectResponse> {
        let grant = self.authorize(filename, requester).await?;
        self.deliver(&grant).await
    }
}

fn record_store_failure(operation: &'static str, source: sqlx::Error) -> GateError {
    error!(operation, error = %source, "record store failure");
    GateError::RecordStore { operation, source }
}

fn object_store_failure(operation: &'static str, source: ObjectStoreError) -> GateError {
    error!(operation, error = %source, "object store failure");
    GateError::ObjectStore { operation, source }
}
