//! In-memory collaborators for docsync tests

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use docsync_config::Config;
use docsync_engine::PassExecutor;
use docsync_sync::{Collaborators, FrontmatterCodec};
use docsync_types::{
    DocumentId, DocumentMetadata, Error, LocalStore, MetadataCodec, RemoteClient, RemoteDocument,
    Result, SnapshotStore,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Timestamp strictly after anything the engine recorded so far
///
/// Edits made by tests use this so that "modified after the last sync" holds
/// regardless of clock resolution.
pub fn later() -> DateTime<Utc> {
    Utc::now() + Duration::seconds(1)
}

fn within(path: &str, folder: &str) -> bool {
    folder.is_empty()
        || path
            .strip_prefix(folder)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Remote document service kept in memory
///
/// Documents are keyed by identifier. Failures queued with [`Self::fail_next`]
/// are returned by the named operation before it touches any state.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    documents: Mutex<BTreeMap<DocumentId, RemoteDocument>>,
    forbidden: Mutex<HashSet<DocumentId>>,
    failures: Mutex<HashMap<String, VecDeque<Error>>>,
    writes: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

impl MemoryRemote {
    /// Create an empty remote
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document directly, bypassing the write log
    pub fn insert(&self, id: &str, derived_path: &str, content: &str) -> DocumentId {
        let id = DocumentId::new(id);
        lock(&self.documents).insert(
            id.clone(),
            RemoteDocument {
                id: id.clone(),
                content: content.to_string(),
                modified_at: Utc::now(),
                derived_path: derived_path.to_string(),
                trashed: false,
            },
        );
        id
    }

    /// Change a document's content as another client would
    pub fn edit(&self, id: &DocumentId, content: &str) {
        self.edit_at(id, content, later());
    }

    /// Change a document's content with an explicit modification time
    pub fn edit_at(&self, id: &DocumentId, content: &str, modified_at: DateTime<Utc>) {
        if let Some(document) = lock(&self.documents).get_mut(id) {
            document.content = content.to_string();
            document.modified_at = modified_at;
        }
    }

    /// Move a document as another client would
    pub fn relocate(&self, id: &DocumentId, derived_path: &str) {
        if let Some(document) = lock(&self.documents).get_mut(id) {
            document.derived_path = derived_path.to_string();
            document.modified_at = later();
        }
    }

    /// Delete a document for good
    pub fn purge(&self, id: &DocumentId) {
        lock(&self.documents).remove(id);
    }

    /// Move a document to the trash
    pub fn trash(&self, id: &DocumentId) {
        if let Some(document) = lock(&self.documents).get_mut(id) {
            document.trashed = true;
        }
    }

    /// Make a document unreadable, as if it belonged to another account
    pub fn forbid(&self, id: &DocumentId) {
        lock(&self.forbidden).insert(id.clone());
    }

    /// Fail the next call of `operation` with `error`
    pub fn fail_next(&self, operation: &str, error: Error) {
        lock(&self.failures)
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Current state of a document
    pub fn document(&self, id: &DocumentId) -> Option<RemoteDocument> {
        lock(&self.documents).get(id).cloned()
    }

    /// Document at a derived path
    pub fn find(&self, derived_path: &str) -> Option<RemoteDocument> {
        lock(&self.documents)
            .values()
            .find(|d| d.derived_path == derived_path)
            .cloned()
    }

    /// Number of documents, trashed ones included
    pub fn len(&self) -> usize {
        lock(&self.documents).len()
    }

    /// Whether the remote holds no documents
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write operations performed through the client, in order
    pub fn writes(&self) -> Vec<String> {
        lock(&self.writes).clone()
    }

    fn injected(&self, operation: &str) -> Result<()> {
        match lock(&self.failures)
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn log(&self, entry: String) {
        lock(&self.writes).push(entry);
    }
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    async fn get_document(&self, id: &DocumentId) -> Result<Option<RemoteDocument>> {
        self.injected("get_document")?;
        if lock(&self.forbidden).contains(id) {
            return Err(Error::forbidden(id.as_str()));
        }
        Ok(self.document(id))
    }

    async fn list_documents(&self, folder_scope: &str) -> Result<Vec<RemoteDocument>> {
        self.injected("list_documents")?;
        let forbidden = lock(&self.forbidden).clone();
        Ok(lock(&self.documents)
            .values()
            .filter(|d| !d.trashed && !forbidden.contains(&d.id))
            .filter(|d| within(&d.derived_path, folder_scope))
            .cloned()
            .collect())
    }

    async fn create_document(
        &self,
        name: &str,
        content: &str,
        folder_scope: &str,
    ) -> Result<DocumentId> {
        self.injected("create_document")?;
        let id = DocumentId::new(format!(
            "N{}",
            self.next_id.fetch_add(1, Ordering::SeqCst) + 1
        ));
        let derived_path = if folder_scope.is_empty() {
            name.to_string()
        } else {
            format!("{folder_scope}/{name}")
        };
        self.log(format!("create {derived_path}"));
        lock(&self.documents).insert(
            id.clone(),
            RemoteDocument {
                id: id.clone(),
                content: content.to_string(),
                modified_at: Utc::now(),
                derived_path,
                trashed: false,
            },
        );
        Ok(id)
    }

    async fn update_document(&self, id: &DocumentId, content: &str) -> Result<()> {
        self.injected("update_document")?;
        let mut documents = lock(&self.documents);
        let document = documents
            .get_mut(id)
            .ok_or_else(|| Error::not_found(id.as_str()))?;
        document.content = content.to_string();
        document.modified_at = Utc::now();
        drop(documents);
        self.log(format!("update {id}"));
        Ok(())
    }

    async fn move_document(&self, id: &DocumentId, folder_scope: &str, name: &str) -> Result<()> {
        self.injected("move_document")?;
        let derived_path = if folder_scope.is_empty() {
            name.to_string()
        } else {
            format!("{folder_scope}/{name}")
        };
        let mut documents = lock(&self.documents);
        let document = documents
            .get_mut(id)
            .ok_or_else(|| Error::not_found(id.as_str()))?;
        document.derived_path.clone_from(&derived_path);
        drop(documents);
        self.log(format!("move {id} {derived_path}"));
        Ok(())
    }

    async fn delete_document(&self, id: &DocumentId) -> Result<()> {
        self.injected("delete_document")?;
        lock(&self.documents)
            .remove(id)
            .ok_or_else(|| Error::not_found(id.as_str()))?;
        self.log(format!("delete {id}"));
        Ok(())
    }
}

/// Local document storage kept in memory
///
/// Every write stamps the document with the current time; edits made through
/// [`Self::edit_body`] are stamped slightly in the future.
#[derive(Debug, Default)]
pub struct MemoryLocal {
    files: Mutex<BTreeMap<String, (String, DateTime<Utc>)>>,
    failing_reads: Mutex<HashSet<String>>,
    writes: AtomicU64,
}

impl MemoryLocal {
    /// Create empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document with raw content, bypassing the write counter
    pub fn put(&self, path: &str, raw: &str) {
        lock(&self.files).insert(path.to_string(), (raw.to_string(), Utc::now()));
    }

    /// Replace the body of a document, keeping its metadata block
    pub fn edit_body(&self, path: &str, body: &str) -> Result<()> {
        let codec = FrontmatterCodec::new();
        let mut files = lock(&self.files);
        let entry = files
            .get_mut(path)
            .ok_or_else(|| Error::io(format!("no such document: {path}")))?;
        let (metadata, _) = codec.decode(path, &entry.0)?;
        *entry = (codec.encode(&metadata, body)?, later());
        Ok(())
    }

    /// Make reads of `path` fail
    pub fn fail_reads(&self, path: &str) {
        lock(&self.failing_reads).insert(path.to_string());
    }

    /// Raw content of a document
    pub fn raw(&self, path: &str) -> Option<String> {
        lock(&self.files).get(path).map(|(raw, _)| raw.clone())
    }

    /// Decoded metadata and body of a document
    pub fn document(&self, path: &str) -> Option<(DocumentMetadata, String)> {
        let raw = self.raw(path)?;
        FrontmatterCodec::new().decode(path, &raw).ok()
    }

    /// Decoded metadata of a document
    pub fn metadata(&self, path: &str) -> Option<DocumentMetadata> {
        self.document(path).map(|(metadata, _)| metadata)
    }

    /// Body of a document
    pub fn body(&self, path: &str) -> Option<String> {
        self.document(path).map(|(_, body)| body)
    }

    /// Every stored path, sorted
    pub fn paths(&self) -> Vec<String> {
        lock(&self.files).keys().cloned().collect()
    }

    /// Number of writes, moves and deletes performed through the store
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn missing(path: &str) -> Error {
        Error::io(format!("no such document: {path}"))
    }
}

#[async_trait]
impl LocalStore for MemoryLocal {
    async fn read_document(&self, path: &str) -> Result<String> {
        if lock(&self.failing_reads).contains(path) {
            return Err(Error::io(format!("permission denied: {path}")));
        }
        self.raw(path).ok_or_else(|| Self::missing(path))
    }

    async fn write_document(&self, path: &str, content: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        lock(&self.files).insert(path.to_string(), (content.to_string(), Utc::now()));
        Ok(())
    }

    async fn list_documents(&self, root: &str) -> Result<Vec<String>> {
        Ok(lock(&self.files)
            .keys()
            .filter(|path| within(path, root))
            .cloned()
            .collect())
    }

    async fn move_document(&self, old_path: &str, new_path: &str) -> Result<()> {
        let mut files = lock(&self.files);
        if files.contains_key(new_path) {
            return Err(Error::path_collision(new_path));
        }
        let entry = files.remove(old_path).ok_or_else(|| Self::missing(old_path))?;
        files.insert(new_path.to_string(), entry);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_document(&self, path: &str) -> Result<()> {
        lock(&self.files)
            .remove(path)
            .ok_or_else(|| Self::missing(path))?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(lock(&self.files).contains_key(path))
    }

    async fn modified_at(&self, path: &str) -> Result<DateTime<Utc>> {
        lock(&self.files)
            .get(path)
            .map(|(_, modified_at)| *modified_at)
            .ok_or_else(|| Self::missing(path))
    }
}

/// Snapshot store kept in memory
#[derive(Debug, Default)]
pub struct MemorySnapshots {
    snapshots: Mutex<HashMap<DocumentId, String>>,
    writes: AtomicU64,
}

impl MemorySnapshots {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a document
    pub fn get(&self, id: &DocumentId) -> Option<String> {
        lock(&self.snapshots).get(id).cloned()
    }

    /// Overwrite a snapshot directly, bypassing the write counter
    pub fn corrupt(&self, id: &DocumentId, body: &str) {
        lock(&self.snapshots).insert(id.clone(), body.to_string());
    }

    /// Number of saves and removals
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshots {
    async fn load(&self, id: &DocumentId) -> Result<Option<String>> {
        Ok(self.get(id))
    }

    async fn save(&self, id: &DocumentId, body: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        lock(&self.snapshots).insert(id.clone(), body.to_string());
        Ok(())
    }

    async fn remove(&self, id: &DocumentId) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        lock(&self.snapshots).remove(id);
        Ok(())
    }
}

/// The three in-memory collaborators wired together
#[derive(Debug, Clone, Default)]
pub struct Harness {
    /// Remote service
    pub remote: Arc<MemoryRemote>,
    /// Local storage
    pub local: Arc<MemoryLocal>,
    /// Snapshot store
    pub snapshots: Arc<MemorySnapshots>,
}

impl Harness {
    /// Create empty collaborators
    pub fn new() -> Self {
        Self::default()
    }

    /// Collaborator bundle over these stores
    pub fn collaborators(&self) -> Collaborators {
        Collaborators::new(
            self.remote.clone(),
            self.local.clone(),
            self.snapshots.clone(),
        )
    }

    /// Executor over these stores
    pub fn executor(&self, config: &Config) -> Result<PassExecutor> {
        PassExecutor::new(config, self.collaborators())
    }

    /// Total writes on every side
    pub fn write_count(&self) -> u64 {
        self.remote.writes().len() as u64 + self.local.write_count() + self.snapshots.write_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remote_listing_respects_scope_and_trash() {
        let remote = MemoryRemote::new();
        remote.insert("R1", "Projects/Plan", "a");
        remote.insert("R2", "Inbox", "b");
        let trashed = remote.insert("R3", "Projects/Old", "c");
        remote.trash(&trashed);

        let listed = remote.list_documents("Projects").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, DocumentId::new("R1"));
        assert_eq!(remote.list_documents("").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let remote = MemoryRemote::new();
        remote.fail_next("get_document", Error::network("reset"));

        let id = DocumentId::new("R1");
        assert!(remote.get_document(&id).await.is_err());
        assert!(remote.get_document(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_move_refuses_existing_target() {
        let local = MemoryLocal::new();
        local.put("a.md", "a");
        local.put("b.md", "b");

        let error = local.move_document("a.md", "b.md").await.unwrap_err();
        assert!(matches!(error, Error::PathCollision { .. }));
        assert_eq!(local.write_count(), 0);
    }

    #[test]
    fn test_edit_body_keeps_metadata() {
        let local = MemoryLocal::new();
        local.put("a.md", "---\nidentifier: R1\n---\nold\n");
        local.edit_body("a.md", "new\n").unwrap();

        let (metadata, body) = local.document("a.md").unwrap();
        assert_eq!(metadata.identifier, Some(DocumentId::new("R1")));
        assert_eq!(body, "new\n");
    }
}
