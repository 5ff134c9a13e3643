//! Bundle of the external collaborators a pass talks to

use crate::metadata::{content_hash, FrontmatterCodec};
use docsync_types::{
    DocumentId, DocumentMetadata, LocalDocument, LocalStore, MetadataCodec, RemoteClient, Result,
    SnapshotStore,
};
use std::sync::Arc;
use tracing::debug;

/// Remote client, local storage, metadata codec and snapshot store
#[derive(Clone)]
pub struct Collaborators {
    /// Remote document service
    pub remote: Arc<dyn RemoteClient>,
    /// Local document storage
    pub local: Arc<dyn LocalStore>,
    /// Metadata block codec
    pub codec: Arc<dyn MetadataCodec>,
    /// Ancestor snapshots used as merge base
    pub snapshots: Arc<dyn SnapshotStore>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Create a bundle using the YAML frontmatter codec
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        local: Arc<dyn LocalStore>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            remote,
            local,
            codec: Arc::new(FrontmatterCodec::new()),
            snapshots,
        }
    }

    /// Replace the metadata codec
    pub fn with_codec(mut self, codec: Arc<dyn MetadataCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Read and decode one local document
    pub async fn observe_local(&self, path: &str) -> Result<LocalDocument> {
        let raw = self.local.read_document(path).await?;
        let modified_at = self.local.modified_at(path).await?;
        let (metadata, body) = self.codec.decode(path, &raw)?;
        Ok(LocalDocument::new(path, body, modified_at, metadata))
    }

    /// Encode and write one local document
    pub async fn write_local(&self, path: &str, metadata: &DocumentMetadata, body: &str) -> Result<()> {
        let raw = self.codec.encode(metadata, body)?;
        self.local.write_document(path, &raw).await
    }

    /// Ancestor snapshot for a document, only when it matches the recorded hash
    pub async fn trusted_ancestor(
        &self,
        id: &DocumentId,
        metadata: &DocumentMetadata,
    ) -> Result<Option<String>> {
        let Some(expected) = metadata.last_synced_content_hash.as_deref() else {
            return Ok(None);
        };

        match self.snapshots.load(id).await? {
            Some(snapshot) if content_hash(&snapshot) == expected => Ok(Some(snapshot)),
            Some(_) => {
                debug!("Ignoring stale snapshot for {}", id);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
