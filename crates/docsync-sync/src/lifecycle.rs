//! Moves, deletions, restores and archive pruning
//!
//! Resolution is pure ([`LifecycleHandler::resolve_moves`],
//! [`LifecycleHandler::resolve_deletion`]); application goes through the
//! collaborators. A local edit made after a remote deletion always wins and
//! recreates the remote document under a new identifier.

use crate::collaborators::Collaborators;
use crate::conflict::{ConflictRecord, ConflictType};
use crate::detect::SyncState;
use crate::mapping::FolderMapper;
use crate::metadata::{content_hash, matches_hash};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use docsync_config::PolicyConfig;
use docsync_types::{DeleteHandling, DocumentId, Error, LocalDocument, RemoteDocument, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const ARCHIVE_DATE_FORMAT: &str = "%Y-%m-%d";
const MAX_DISAMBIGUATION: u32 = 1000;

/// Where a moved document ends up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveResolution {
    /// Nothing to move
    Stay,
    /// Move the remote document to follow the local one
    MoveRemote {
        /// Target remote folder
        folder_scope: String,
        /// Target display name
        name: String,
    },
    /// Move the local document to follow the remote one
    MoveLocal {
        /// Current local path
        from: String,
        /// Target local path
        to: String,
    },
}

impl MoveResolution {
    /// Local path of the document once the move is applied
    pub fn local_path<'a>(&'a self, current: &'a str) -> &'a str {
        match self {
            Self::MoveLocal { to, .. } => to,
            _ => current,
        }
    }

    /// Whether something moves
    pub fn is_move(&self) -> bool {
        !matches!(self, Self::Stay)
    }
}

/// What to do about a remote deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeletionAction {
    /// Local edits win: create a new remote document
    Recreate,
    /// Move the local document into the archive
    Archive,
    /// Delete the local document
    Delete,
    /// Keep the local document, only record the deletion
    Ignore,
}

/// What a deletion ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome {
    /// Remote recreated under a new identifier
    Recreated {
        /// New identifier
        identifier: DocumentId,
    },
    /// Local document archived
    Archived {
        /// Archive path
        path: String,
    },
    /// Local document deleted
    Deleted,
    /// Deletion recorded only
    Ignored,
}

/// Resolves and applies moves and deletions under the configured policy
#[derive(Debug, Clone)]
pub struct LifecycleHandler {
    policy: PolicyConfig,
    mapper: FolderMapper,
}

impl LifecycleHandler {
    /// Create a new lifecycle handler
    pub fn new(policy: PolicyConfig, mapper: FolderMapper) -> Self {
        Self { policy, mapper }
    }

    /// Decide how moves observed since the last sync are reconciled
    ///
    /// When both sides moved, the side with the newer modification time keeps
    /// its location; ties favor local. The returned record describes the
    /// auto-resolved move conflict, if there was one.
    pub fn resolve_moves(
        &self,
        state: &SyncState,
        local: &LocalDocument,
        remote: &RemoteDocument,
    ) -> (MoveResolution, Option<ConflictRecord>) {
        if !self.policy.sync_moves {
            return (MoveResolution::Stay, None);
        }

        if state.is_move_conflict() {
            let remote_wins = remote.modified_at > local.modified_at;
            let winner = if remote_wins { "remote" } else { "local" };
            let record = ConflictRecord::new(
                &local.path,
                Some(remote.id.clone()),
                ConflictType::MoveMove,
                format!("kept the {winner} location"),
            )
            .resolved();
            info!("{}", record.description);

            let resolution = if remote_wins {
                self.follow_remote(state, local)
            } else {
                self.follow_local(local, remote)
            };
            return (resolution, Some(record));
        }

        if state.has_local_move {
            return (self.follow_local(local, remote), None);
        }
        if state.has_remote_move {
            return (self.follow_remote(state, local), None);
        }
        (MoveResolution::Stay, None)
    }

    fn follow_local(&self, local: &LocalDocument, remote: &RemoteDocument) -> MoveResolution {
        match self.mapper.local_to_remote(&local.path) {
            Some(target) if target != remote.derived_path => {
                let (folder_scope, name) = crate::mapping::split_remote(&target);
                MoveResolution::MoveRemote {
                    folder_scope: folder_scope.to_string(),
                    name: name.to_string(),
                }
            }
            _ => MoveResolution::Stay,
        }
    }

    fn follow_remote(&self, state: &SyncState, local: &LocalDocument) -> MoveResolution {
        match &state.remote_move_to {
            Some(to) if *to != local.path => MoveResolution::MoveLocal {
                from: local.path.clone(),
                to: to.clone(),
            },
            _ => MoveResolution::Stay,
        }
    }

    /// Decide what happens to a document whose remote counterpart is gone
    pub fn resolve_deletion(&self, state: &SyncState, local: &LocalDocument) -> DeletionAction {
        if Self::edited_after_deletion(state, local) {
            return DeletionAction::Recreate;
        }

        match self.policy.delete_handling {
            DeleteHandling::Archive => DeletionAction::Archive,
            DeleteHandling::Sync => DeletionAction::Delete,
            DeleteHandling::Ignore => DeletionAction::Ignore,
        }
    }

    /// Whether local edits exist that a deletion would drop
    fn edited_after_deletion(state: &SyncState, local: &LocalDocument) -> bool {
        if state.has_local_changes {
            return true;
        }
        let body_changed = !matches_hash(
            &local.body,
            local.metadata.last_synced_content_hash.as_deref(),
        );
        body_changed
            && state
                .deletion_scheduled_at
                .is_some_and(|scheduled| local.modified_at > scheduled)
    }

    /// Apply a move
    pub async fn apply_move(
        &self,
        collaborators: &Collaborators,
        id: &DocumentId,
        resolution: &MoveResolution,
    ) -> Result<()> {
        match resolution {
            MoveResolution::Stay => Ok(()),
            MoveResolution::MoveRemote { folder_scope, name } => {
                collaborators
                    .remote
                    .move_document(id, folder_scope, name)
                    .await?;
                info!("Moved remote {} to '{}/{}'", id, folder_scope, name);
                Ok(())
            }
            MoveResolution::MoveLocal { from, to } => {
                if collaborators.local.exists(to).await? {
                    warn!("Not moving '{}': '{}' already exists", from, to);
                    return Err(Error::path_collision(to.as_str()));
                }
                collaborators.local.move_document(from, to).await?;
                info!("Moved local '{}' to '{}'", from, to);
                Ok(())
            }
        }
    }

    /// Apply a deletion decision
    pub async fn apply_deletion(
        &self,
        collaborators: &Collaborators,
        local: &LocalDocument,
        state: &SyncState,
        action: DeletionAction,
        now: DateTime<Utc>,
    ) -> Result<DeletionOutcome> {
        let old_id = local.metadata.identifier.clone();
        let outcome = match action {
            DeletionAction::Recreate => {
                let identifier = self.recreate(collaborators, local, now).await?;
                DeletionOutcome::Recreated { identifier }
            }
            DeletionAction::Archive => {
                let path = self.archive(collaborators, local, now).await?;
                DeletionOutcome::Archived { path }
            }
            DeletionAction::Delete => {
                collaborators.local.delete_document(&local.path).await?;
                info!("Deleted '{}' after remote deletion", local.path);
                DeletionOutcome::Deleted
            }
            DeletionAction::Ignore => {
                if local.metadata.deletion_scheduled_at.is_none() {
                    let mut metadata = local.metadata.clone();
                    metadata.deletion_scheduled_at = state.deletion_scheduled_at.or(Some(now));
                    metadata.last_synced_revision += 1;
                    collaborators
                        .write_local(&local.path, &metadata, &local.body)
                        .await?;
                }
                debug!("Ignoring remote deletion of '{}'", local.path);
                DeletionOutcome::Ignored
            }
        };

        if action != DeletionAction::Ignore {
            if let Some(old_id) = old_id {
                collaborators.snapshots.remove(&old_id).await?;
            }
        }
        Ok(outcome)
    }

    async fn recreate(
        &self,
        collaborators: &Collaborators,
        local: &LocalDocument,
        now: DateTime<Utc>,
    ) -> Result<DocumentId> {
        let (folder_scope, name) = self.mapper.remote_target(&local.path).ok_or_else(|| {
            Error::validation(format!("'{}' is outside the managed folder", local.path))
        })?;

        let identifier = collaborators
            .remote
            .create_document(&name, &local.body, &folder_scope)
            .await?;

        let mut metadata = local.metadata.clone();
        metadata.original_doc_id = local.metadata.identifier.clone();
        let metadata = metadata.committed(
            identifier.clone(),
            content_hash(&local.body),
            &local.path,
            now,
        );
        collaborators
            .write_local(&local.path, &metadata, &local.body)
            .await?;
        collaborators.snapshots.save(&identifier, &local.body).await?;

        info!(
            "Recreated '{}' as {} (was {:?}): local edits beat the remote deletion",
            local.path, identifier, metadata.original_doc_id
        );
        Ok(identifier)
    }

    async fn archive(
        &self,
        collaborators: &Collaborators,
        local: &LocalDocument,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let candidate = format!(
            "{}/{}/{}",
            self.mapper.archive_folder(),
            now.format(ARCHIVE_DATE_FORMAT),
            local.path
        );
        let target = free_path(collaborators, &candidate).await?;

        let mut metadata = local.metadata.without_sync_fields();
        metadata.archived_from = Some(local.path.clone());
        metadata.archived_at = Some(now);

        collaborators
            .write_local(&target, &metadata, &local.body)
            .await?;
        collaborators.local.delete_document(&local.path).await?;

        info!("Archived '{}' to '{}'", local.path, target);
        Ok(target)
    }

    /// Bring an archived document back to its original path
    ///
    /// A document already sitting at the original path is never overwritten;
    /// the restored copy gets a disambiguated name instead. The restored
    /// document is unlinked and will be recreated remotely on the next pass.
    pub async fn restore(&self, collaborators: &Collaborators, archived_path: &str) -> Result<String> {
        let archived = collaborators.observe_local(archived_path).await?;
        let original = archived.metadata.archived_from.clone().ok_or_else(|| {
            Error::validation(format!("'{archived_path}' is not an archived document"))
        })?;

        let target = free_path(collaborators, &original).await?;

        let mut metadata = archived.metadata.clone();
        metadata.archived_from = None;
        metadata.archived_at = None;

        collaborators
            .write_local(&target, &metadata, &archived.body)
            .await?;
        collaborators.local.delete_document(archived_path).await?;

        info!("Restored '{}' to '{}'", archived_path, target);
        Ok(target)
    }

    /// Delete dated archive folders older than the retention window
    ///
    /// Returns the number of documents removed.
    pub async fn prune_archive(
        &self,
        collaborators: &Collaborators,
        now: DateTime<Utc>,
        retention_days: u32,
    ) -> Result<usize> {
        let archive = self.mapper.archive_folder();
        let cutoff = (now - Duration::days(i64::from(retention_days))).date_naive();
        let mut removed = 0;

        for path in collaborators.local.list_documents(archive).await? {
            let Some(date) = archive_date(archive, &path) else {
                debug!("Skipping undated archive entry '{}'", path);
                continue;
            };
            if date < cutoff {
                collaborators.local.delete_document(&path).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Pruned {} archived documents older than {}", removed, cutoff);
        }
        Ok(removed)
    }
}

fn archive_date(archive: &str, path: &str) -> Option<NaiveDate> {
    let relative = path.strip_prefix(archive)?.strip_prefix('/')?;
    let (date, _) = relative.split_once('/')?;
    NaiveDate::parse_from_str(date, ARCHIVE_DATE_FORMAT).ok()
}

/// `path`, or `name (n).ext` for the first `n` that is free
async fn free_path(collaborators: &Collaborators, path: &str) -> Result<String> {
    if !collaborators.local.exists(path).await? {
        return Ok(path.to_string());
    }

    let (stem, extension) = match path.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.contains('/') => (stem, Some(ext)),
        _ => (path, None),
    };

    for n in 1..=MAX_DISAMBIGUATION {
        let candidate = match extension {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        if !collaborators.local.exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    Err(Error::path_collision(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{ChangeDetector, DeleteReason};
    use rstest::rstest;

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_000) + Duration::minutes(minutes)
    }

    fn handler(policy: PolicyConfig) -> LifecycleHandler {
        LifecycleHandler::new(policy, FolderMapper::default())
    }

    fn tracked(path: &str, synced_path: &str, body: &str, synced_body: &str, modified: i64) -> LocalDocument {
        let metadata = docsync_types::DocumentMetadata {
            identifier: Some(DocumentId::new("R1")),
            last_synced_content_hash: Some(content_hash(synced_body)),
            last_synced_at: Some(at(0)),
            last_synced_path: Some(synced_path.to_string()),
            last_synced_revision: 1,
            ..Default::default()
        };
        LocalDocument::new(path, body, at(modified), metadata)
    }

    fn remote(derived_path: &str, modified: i64) -> RemoteDocument {
        RemoteDocument {
            id: DocumentId::new("R1"),
            content: "x".into(),
            modified_at: at(modified),
            derived_path: derived_path.into(),
            trashed: false,
        }
    }

    #[test]
    fn test_local_move_moves_remote() {
        let local = tracked("new/a.md", "old/a.md", "x", "x", 1);
        let remote = remote("old/a", 0);
        let state = ChangeDetector::new(FolderMapper::default()).detect(&local, Some(&remote), at(5));

        let (resolution, record) = handler(PolicyConfig::default()).resolve_moves(&state, &local, &remote);
        assert_eq!(
            resolution,
            MoveResolution::MoveRemote {
                folder_scope: "new".into(),
                name: "a".into()
            }
        );
        assert!(record.is_none());
    }

    #[test]
    fn test_moves_ignored_when_disabled() {
        let local = tracked("new/a.md", "old/a.md", "x", "x", 1);
        let remote = remote("old/a", 0);
        let state = ChangeDetector::new(FolderMapper::default()).detect(&local, Some(&remote), at(5));
        let policy = PolicyConfig {
            sync_moves: false,
            ..PolicyConfig::default()
        };

        let (resolution, _) = handler(policy).resolve_moves(&state, &local, &remote);
        assert_eq!(resolution, MoveResolution::Stay);
    }

    #[rstest]
    #[case(3, 1, "theirs/a.md")]
    #[case(1, 3, "mine/a.md")]
    #[case(2, 2, "mine/a.md")]
    fn test_move_move_newer_side_wins(
        #[case] remote_modified: i64,
        #[case] local_modified: i64,
        #[case] expected_path: &str,
    ) {
        let local = tracked("mine/a.md", "old/a.md", "x", "x", local_modified);
        let remote = remote("theirs/a", remote_modified);
        let state = ChangeDetector::new(FolderMapper::default())
            .with_remote_moves(true)
            .detect(&local, Some(&remote), at(5));

        let (resolution, record) = handler(PolicyConfig::default()).resolve_moves(&state, &local, &remote);
        assert_eq!(resolution.local_path(&local.path), expected_path);
        let record = record.unwrap();
        assert_eq!(record.conflict_type, ConflictType::MoveMove);
        assert!(record.resolved);
    }

    #[rstest]
    #[case(DeleteHandling::Archive, DeletionAction::Archive)]
    #[case(DeleteHandling::Sync, DeletionAction::Delete)]
    #[case(DeleteHandling::Ignore, DeletionAction::Ignore)]
    fn test_unedited_deletion_follows_policy(
        #[case] handling: DeleteHandling,
        #[case] expected: DeletionAction,
    ) {
        let local = tracked("a.md", "a.md", "x", "x", 0);
        let state = ChangeDetector::new(FolderMapper::default()).detect(&local, None, at(5));
        assert_eq!(state.delete_reason, Some(DeleteReason::RemoteDeleted));

        let policy = PolicyConfig {
            delete_handling: handling,
            ..PolicyConfig::default()
        };
        assert_eq!(handler(policy).resolve_deletion(&state, &local), expected);
    }

    #[rstest]
    #[case(DeleteHandling::Archive)]
    #[case(DeleteHandling::Sync)]
    #[case(DeleteHandling::Ignore)]
    fn test_edit_beats_delete(#[case] handling: DeleteHandling) {
        let mut local = tracked("a.md", "a.md", "edited", "x", 10);
        local.metadata.deletion_scheduled_at = Some(at(5));
        let state = ChangeDetector::new(FolderMapper::default()).detect(&local, None, at(20));

        let policy = PolicyConfig {
            delete_handling: handling,
            ..PolicyConfig::default()
        };
        assert_eq!(
            handler(policy).resolve_deletion(&state, &local),
            DeletionAction::Recreate
        );
    }

    #[test]
    fn test_metadata_rewrite_is_not_an_edit() {
        let mut local = tracked("a.md", "a.md", "x", "x", 10);
        local.metadata.deletion_scheduled_at = Some(at(5));
        let state = ChangeDetector::new(FolderMapper::default()).detect(&local, None, at(20));

        assert_eq!(
            handler(PolicyConfig::default()).resolve_deletion(&state, &local),
            DeletionAction::Archive
        );
    }

    #[test]
    fn test_archive_date_parsing() {
        assert_eq!(
            archive_date(".sync-archive", ".sync-archive/2024-03-09/notes/a.md"),
            NaiveDate::from_ymd_opt(2024, 3, 9)
        );
        assert_eq!(archive_date(".sync-archive", ".sync-archive/misc/a.md"), None);
        assert_eq!(archive_date(".sync-archive", "notes/a.md"), None);
    }
}
