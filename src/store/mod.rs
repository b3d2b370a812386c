/// Document Store Capability
///
/// The procedures in this crate only talk to the database through these
/// traits: begin a transaction, read and query inside it, stage writes, then
/// commit or roll back. Staged writes are applied all together or not at all.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use crate::document::{Document, DocumentUpdate, Value};
use crate::path::{CollectionPath, DocumentPath};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Write conflict or contention; the transaction was aborted.
    #[error("Transaction aborted: {0}")]
    Aborted(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// A staged update targets a document that does not exist.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Store returned {code}: {message}")]
    Status { code: String, message: String },
}

impl StoreError {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Aborted(_) => "aborted",
            StoreError::PermissionDenied(_) => "permission_denied",
            StoreError::Unauthenticated(_) => "unauthenticated",
            StoreError::PreconditionFailed(_) => "precondition_failed",
            StoreError::NotFound(_) => "not_found",
            StoreError::InvalidArgument(_) => "invalid_argument",
            StoreError::Unavailable(_) => "unavailable",
            StoreError::Auth(_) => "auth",
            StoreError::Transport(_) => "transport",
            StoreError::Decode(_) => "decode",
            StoreError::Status { .. } => "status",
        }
    }
}

/// Something that can open transactions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    type Tx: Transaction;

    /// Begin a read-write transaction.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// An open read-write transaction.
///
/// Reads must happen before any write is staged. Nothing staged is visible
/// to anyone until `commit` succeeds.
#[async_trait]
pub trait Transaction: Send {
    /// Read a document. Returns Ok(None) if it does not exist.
    async fn get(&mut self, path: &DocumentPath) -> Result<Option<Document>, StoreError>;

    /// All documents directly in `collection` whose `field` equals `value`.
    async fn query_equal(
        &mut self,
        collection: &CollectionPath,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError>;

    /// Stage a field-level update. The document must exist at commit time.
    fn update(&mut self, path: &DocumentPath, update: DocumentUpdate);

    /// Stage a document delete. Deleting a missing document is not an error.
    fn delete(&mut self, path: &DocumentPath);

    /// Number of staged writes
    fn pending_writes(&self) -> usize;

    /// Apply every staged write atomically.
    async fn commit(self) -> Result<(), StoreError>;

    /// Discard staged writes and release the transaction.
    async fn rollback(self) -> Result<(), StoreError>;
}
