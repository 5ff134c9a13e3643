//! Core traits for docsync operations
//!
//! These are the seams between the reconciliation core and the host
//! application: the remote service client, local storage, the metadata codec,
//! the ancestor snapshot store, and the two integration points the background
//! manager drives (`Syncer`, `LinkChecker`).

use crate::{DocumentId, DocumentMetadata, PassContext, RemoteDocument, Result, SyncStats};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Client for the remote document-management service
///
/// Implementations must be idempotent at the semantic level: an update
/// retried after a timeout must not corrupt content.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Fetch one document; `Ok(None)` when it was hard-deleted
    async fn get_document(&self, id: &DocumentId) -> Result<Option<RemoteDocument>>;

    /// List every document under a folder scope (empty string for the root)
    async fn list_documents(&self, folder_scope: &str) -> Result<Vec<RemoteDocument>>;

    /// Create a document and return its new identifier
    async fn create_document(
        &self,
        name: &str,
        content: &str,
        folder_scope: &str,
    ) -> Result<DocumentId>;

    /// Replace the content of a document
    async fn update_document(&self, id: &DocumentId, content: &str) -> Result<()>;

    /// Move a document into another folder and give it a new display name
    async fn move_document(&self, id: &DocumentId, folder_scope: &str, name: &str) -> Result<()>;

    /// Delete a document
    async fn delete_document(&self, id: &DocumentId) -> Result<()>;
}

/// Local document storage
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Read the raw content (metadata block included)
    async fn read_document(&self, path: &str) -> Result<String>;

    /// Write raw content, creating parent folders as needed
    async fn write_document(&self, path: &str, content: &str) -> Result<()>;

    /// List document paths below a root, recursively
    async fn list_documents(&self, root: &str) -> Result<Vec<String>>;

    /// Move a document; fails if the target exists
    async fn move_document(&self, old_path: &str, new_path: &str) -> Result<()>;

    /// Delete a document
    async fn delete_document(&self, path: &str) -> Result<()>;

    /// Whether a document exists at `path`
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Last modification time of a document
    async fn modified_at(&self, path: &str) -> Result<DateTime<Utc>>;
}

/// Parse and serialize the structured metadata block of a document
pub trait MetadataCodec: Send + Sync {
    /// Split raw content into metadata and body
    fn decode(&self, path: &str, raw: &str) -> Result<(DocumentMetadata, String)>;

    /// Render metadata and body back into raw content
    fn encode(&self, metadata: &DocumentMetadata, body: &str) -> Result<String>;
}

/// Store of the body as it was at the last successful sync, used as merge base
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the snapshot for a document, if any
    async fn load(&self, id: &DocumentId) -> Result<Option<String>>;

    /// Replace the snapshot for a document
    async fn save(&self, id: &DocumentId, body: &str) -> Result<()>;

    /// Forget the snapshot for a document
    async fn remove(&self, id: &DocumentId) -> Result<()>;
}

/// Outcome of syncing one document through a [`Syncer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    /// Something was written on at least one side
    Synced,
    /// Nothing to do
    Unchanged,
    /// Excluded by policy
    Skipped,
}

/// Host integration point that performs syncs
#[async_trait]
pub trait Syncer: Send + Sync {
    /// Sync a single document
    async fn sync_document(&self, path: &str, ctx: &PassContext) -> Result<DocumentOutcome>;

    /// Run a whole-corpus pass
    async fn sync_all(&self, ctx: &PassContext) -> Result<SyncStats>;
}

/// Host integration point that tells whether a document takes part in sync
#[async_trait]
pub trait LinkChecker: Send + Sync {
    /// Whether the document at `path` is linked to a remote document
    async fn is_linked(&self, path: &str) -> Result<bool>;
}

/// Trait for operation cancellation
pub trait Cancellable {
    /// Cancel the operation
    fn cancel(&self);

    /// Check if the operation is cancelled
    fn is_cancelled(&self) -> bool;
}
