//! Core data types for docsync
//!
//! This module provides the fundamental data types used throughout the docsync
//! crates: remote identifiers, the typed metadata block each local document
//! carries, observations of both replicas, pass statistics and the per-pass
//! context handed to every step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::traits::Cancellable;

/// Unique identifier for a pass
pub type PassId = uuid::Uuid;

/// Stable identifier assigned by the remote service to a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Wrap a raw identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// Tracked-document record persisted in a local document's metadata block
///
/// The fields the engine depends on are typed; every other key found in the
/// block is kept verbatim in `extra` so that encoding after decoding loses
/// nothing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    /// Remote identifier, immutable once set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<DocumentId>,
    /// Hex hash of the body at the last successful sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_content_hash: Option<String>,
    /// Time of the last successful sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Local path recorded at the last successful sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_path: Option<String>,
    /// Engine-local counter, +1 on every committed sync
    #[serde(default, skip_serializing_if = "is_zero")]
    pub last_synced_revision: u64,
    /// First time a remote deletion or trashing was observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_scheduled_at: Option<DateTime<Utc>>,
    /// Identifier this document was linked to before it was recreated
    #[serde(
        rename = "original-doc-id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub original_doc_id: Option<DocumentId>,
    /// Original path of an archived document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_from: Option<String>,
    /// When the document was archived
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    /// Keys the engine does not interpret
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DocumentMetadata {
    /// Whether the document is linked to a remote identifier
    pub fn is_linked(&self) -> bool {
        self.identifier.is_some()
    }

    /// Metadata after a committed sync: revision +1 and fresh sync fields
    pub fn committed(
        &self,
        identifier: DocumentId,
        content_hash: String,
        path: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            identifier: Some(identifier),
            last_synced_content_hash: Some(content_hash),
            last_synced_at: Some(now),
            last_synced_path: Some(path.to_string()),
            last_synced_revision: self.last_synced_revision + 1,
            deletion_scheduled_at: None,
            ..self.clone()
        }
    }

    /// Drop every sync field, keeping user keys and audit fields
    pub fn without_sync_fields(&self) -> Self {
        Self {
            identifier: None,
            last_synced_content_hash: None,
            last_synced_at: None,
            last_synced_path: None,
            last_synced_revision: 0,
            deletion_scheduled_at: None,
            ..self.clone()
        }
    }
}

/// Current observation of a local document
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDocument {
    /// Vault-relative path with `/` separators
    pub path: String,
    /// Body without the metadata block
    pub body: String,
    /// Last modification time reported by local storage
    pub modified_at: DateTime<Utc>,
    /// Decoded metadata block
    pub metadata: DocumentMetadata,
}

impl LocalDocument {
    /// Create a local observation
    pub fn new(
        path: impl Into<String>,
        body: impl Into<String>,
        modified_at: DateTime<Utc>,
        metadata: DocumentMetadata,
    ) -> Self {
        Self {
            path: path.into(),
            body: body.into(),
            modified_at,
            metadata,
        }
    }

    /// Remote identifier this document is linked to
    pub fn identifier(&self) -> Option<&DocumentId> {
        self.metadata.identifier.as_ref()
    }
}

/// Current observation of a remote document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    /// Remote identifier
    pub id: DocumentId,
    /// Current content
    pub content: String,
    /// Modification time, the only ordering signal the service exposes
    pub modified_at: DateTime<Utc>,
    /// Path derived from the remote folder hierarchy, e.g. `Projects/Road map`
    pub derived_path: String,
    /// Whether the document sits in the remote trash
    pub trashed: bool,
}

impl RemoteDocument {
    /// Display name part of the derived path
    pub fn name(&self) -> &str {
        self.derived_path
            .rsplit_once('/')
            .map_or(self.derived_path.as_str(), |(_, name)| name)
    }
}

/// Pass statistics, always produced even when documents fail
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Documents created on either side
    pub created: u64,
    /// Documents whose content was pushed, pulled or merged
    pub updated: u64,
    /// Documents moved or renamed on either side
    pub moved: u64,
    /// Local documents archived or deleted after a remote deletion
    pub archived: u64,
    /// Documents skipped (unchanged, excluded, parked)
    pub skipped: u64,
    /// Documents routed to manual resolution
    pub conflicted: u64,
    /// Documents that failed
    pub errors: u64,
    /// Documents considered
    pub total: u64,
    /// Wall-clock duration of the pass
    pub duration: Duration,
}

impl SyncStats {
    /// Create a new empty statistics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether anything was written
    pub fn has_writes(&self) -> bool {
        self.created + self.updated + self.moved + self.archived > 0
    }
}

impl fmt::Display for SyncStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} moved, {} archived, {} skipped, {} conflicted, {} errors ({} total)",
            self.created,
            self.updated,
            self.moved,
            self.archived,
            self.skipped,
            self.conflicted,
            self.errors,
            self.total
        )
    }
}

/// State shared by every step of one pass
///
/// Cloning is cheap and every clone observes the same cancellation flag and
/// counters. A new context is created for each pass, so two passes never
/// share one.
#[derive(Debug, Clone)]
pub struct PassContext {
    id: PassId,
    dry_run: bool,
    cancelled: Arc<AtomicBool>,
    processed: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
    excluded: Arc<HashSet<String>>,
    outcomes: Arc<Mutex<Vec<(String, bool)>>>,
}

impl PassContext {
    /// Create a context for a new pass
    pub fn new(dry_run: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            dry_run,
            cancelled: Arc::new(AtomicBool::new(false)),
            processed: Arc::new(AtomicU64::new(0)),
            total: Arc::new(AtomicU64::new(0)),
            excluded: Arc::new(HashSet::new()),
            outcomes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Exclude documents from the pass, e.g. parked ones
    pub fn with_excluded(mut self, paths: HashSet<String>) -> Self {
        self.excluded = Arc::new(paths);
        self
    }

    /// Whether a document is excluded from the pass
    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded.contains(path)
    }

    /// Identifier of the pass
    pub fn id(&self) -> PassId {
        self.id
    }

    /// Whether write collaborators must not be invoked
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Record the number of documents the pass will visit
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    /// Record that one more document was visited
    pub fn document_done(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    /// Record whether syncing one document succeeded
    pub fn record_outcome(&self, path: &str, success: bool) {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push((path.to_string(), success));
        }
    }

    /// Per-document outcomes recorded so far, in order
    pub fn outcomes(&self) -> Vec<(String, bool)> {
        self.outcomes
            .lock()
            .map(|outcomes| outcomes.clone())
            .unwrap_or_default()
    }

    /// `(processed, total)` so far
    pub fn progress(&self) -> (u64, u64) {
        (
            self.processed.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
        )
    }
}

impl Default for PassContext {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Cancellable for PassContext {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
