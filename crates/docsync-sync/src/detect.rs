//! Change detection for a single tracked document
//!
//! Modification times signal a change; when the last synced content hash is
//! known it must also differ before a side counts as changed. A write made by
//! the engine itself therefore never shows up as a change on the next pass.

use crate::mapping::FolderMapper;
use crate::metadata::matches_hash;
use chrono::{DateTime, Utc};
use docsync_types::{DocumentMetadata, LocalDocument, RemoteDocument};
use serde::{Deserialize, Serialize};

/// Why a remote document counts as deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeleteReason {
    /// The document no longer exists
    RemoteDeleted,
    /// The document sits in the remote trash
    RemoteTrashed,
}

/// Which changes hold for one document since its last sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Local content changed
    pub has_local_changes: bool,
    /// Remote content changed
    pub has_remote_changes: bool,
    /// The local document was moved or renamed
    pub has_local_move: bool,
    /// The remote document was moved or renamed
    pub has_remote_move: bool,
    /// The remote document was deleted or trashed
    pub has_remote_delete: bool,
    /// Local path recorded at the last sync, when the document moved locally
    pub local_move_from: Option<String>,
    /// Local path the document had before the remote move
    pub remote_move_from: Option<String>,
    /// Local path implied by the remote document's new location
    pub remote_move_to: Option<String>,
    /// Set together with `has_remote_delete`
    pub delete_reason: Option<DeleteReason>,
    /// When the remote deletion was first observed
    pub deletion_scheduled_at: Option<DateTime<Utc>>,
}

impl SyncState {
    /// Whether nothing at all changed
    pub fn is_clean(&self) -> bool {
        !(self.has_local_changes
            || self.has_remote_changes
            || self.has_local_move
            || self.has_remote_move
            || self.has_remote_delete)
    }

    /// Whether both sides moved since the last sync
    pub fn is_move_conflict(&self) -> bool {
        self.has_local_move && self.has_remote_move
    }
}

/// Whether the local body changed since the last sync
pub fn local_changed(local: &LocalDocument) -> bool {
    side_changed(&local.metadata, local.modified_at, &local.body)
}

/// Whether the remote content changed since the last sync
///
/// Trashed documents never count as changed.
pub fn remote_changed(metadata: &DocumentMetadata, remote: &RemoteDocument) -> bool {
    !remote.trashed && side_changed(metadata, remote.modified_at, &remote.content)
}

fn side_changed(metadata: &DocumentMetadata, modified_at: DateTime<Utc>, content: &str) -> bool {
    match metadata.last_synced_at {
        None => true,
        Some(synced_at) => {
            modified_at > synced_at
                && !matches_hash(content, metadata.last_synced_content_hash.as_deref())
        }
    }
}

/// Compares a document's last synced state with both current observations
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    mapper: FolderMapper,
    detect_remote_moves: bool,
}

impl ChangeDetector {
    /// Create a new change detector
    pub fn new(mapper: FolderMapper) -> Self {
        Self {
            mapper,
            detect_remote_moves: false,
        }
    }

    /// Enable or disable remote move detection
    pub fn with_remote_moves(mut self, enabled: bool) -> Self {
        self.detect_remote_moves = enabled;
        self
    }

    /// Folder mapper used for move detection
    pub fn mapper(&self) -> &FolderMapper {
        &self.mapper
    }

    /// Detect changes for one document
    ///
    /// `remote` is `None` when the remote document was hard-deleted. `now`
    /// becomes the deletion time when a deletion is observed for the first
    /// time.
    pub fn detect(
        &self,
        local: &LocalDocument,
        remote: Option<&RemoteDocument>,
        now: DateTime<Utc>,
    ) -> SyncState {
        let metadata = &local.metadata;
        let mut state = SyncState {
            has_local_changes: local_changed(local),
            ..SyncState::default()
        };

        if let Some(previous) = metadata
            .last_synced_path
            .as_ref()
            .filter(|previous| **previous != local.path)
        {
            state.has_local_move = true;
            state.local_move_from = Some(previous.clone());
        }

        let delete_reason = match remote {
            None => Some(DeleteReason::RemoteDeleted),
            Some(remote) if remote.trashed => Some(DeleteReason::RemoteTrashed),
            Some(_) => None,
        };

        if delete_reason.is_some() {
            state.has_remote_delete = true;
            state.delete_reason = delete_reason;
            state.deletion_scheduled_at = Some(metadata.deletion_scheduled_at.unwrap_or(now));
            return state;
        }

        if let Some(remote) = remote {
            state.has_remote_changes = remote_changed(metadata, remote);
            if self.detect_remote_moves {
                self.detect_remote_move(local, remote, &mut state);
            }
        }

        state
    }

    fn detect_remote_move(&self, local: &LocalDocument, remote: &RemoteDocument, state: &mut SyncState) {
        let agreed = local
            .metadata
            .last_synced_path
            .as_deref()
            .unwrap_or(&local.path);

        if !self.mapper.is_canonical(agreed) {
            return;
        }

        if self.mapper.local_to_remote(agreed).as_deref() == Some(remote.derived_path.as_str()) {
            return;
        }

        if let Some(target) = self.mapper.remote_to_local(&remote.derived_path) {
            state.has_remote_move = true;
            state.remote_move_from = Some(agreed.to_string());
            state.remote_move_to = Some(target);
        }
    }
}
