//! Per-document sync decisions
//!
//! [`SyncDecisionEngine::decide`] is pure: it turns the current observations
//! of one linked document into a [`SyncDecision`] carrying the exact content
//! and metadata to write. [`SyncDecisionEngine::sync_document`] runs a
//! decision against the collaborators and isolates any failure.

use crate::collaborators::Collaborators;
use crate::conflict::{ConflictResolver, Resolution, Side};
use crate::detect::{local_changed, remote_changed};
use crate::merge::ConflictRegion;
use crate::metadata::content_hash;
use chrono::{DateTime, Utc};
use docsync_types::{
    ConflictPolicy, DocumentId, DocumentMetadata, Error, LocalDocument, PassContext,
    RemoteDocument, Result,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// What happens to one document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// Local content goes to the remote
    Push,
    /// Remote content comes to the local document
    Pull,
    /// Both sides receive resolved content
    Merge,
    /// Nothing to do
    NoChange,
    /// Needs a human
    ConflictManual,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Push => "push",
            Self::Pull => "pull",
            Self::Merge => "merge",
            Self::NoChange => "no_change",
            Self::ConflictManual => "conflict_manual",
        };
        f.write_str(name)
    }
}

/// Decision for one document together with what to write
#[derive(Debug, Clone, PartialEq)]
pub struct SyncDecision {
    /// Chosen action
    pub action: SyncAction,
    /// Resolved content for `Merge`, marked-up content for `ConflictManual`
    pub merged_content: Option<String>,
    /// Overlapping regions for `ConflictManual`
    pub conflict_markers: Vec<ConflictRegion>,
    /// Metadata the local document carries after the decision is applied
    pub updated_metadata: DocumentMetadata,
    /// Content to upload, if the remote must change
    pub remote_update: Option<String>,
    /// Body to write locally together with `updated_metadata`
    pub local_body: Option<String>,
}

impl SyncDecision {
    /// Decision that leaves everything as it is
    pub fn unchanged(metadata: &DocumentMetadata) -> Self {
        Self {
            action: SyncAction::NoChange,
            merged_content: None,
            conflict_markers: Vec::new(),
            updated_metadata: metadata.clone(),
            remote_update: None,
            local_body: None,
        }
    }

    /// Whether applying the decision commits a new revision
    pub fn is_committed(&self) -> bool {
        matches!(
            self.action,
            SyncAction::Push | SyncAction::Pull | SyncAction::Merge
        )
    }

    /// Whether the document needs manual resolution
    pub fn is_conflict(&self) -> bool {
        self.action == SyncAction::ConflictManual
    }
}

/// Result of syncing one document; failures never escape as errors
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// Local path
    pub path: String,
    /// Decision taken, when one could be computed
    pub decision: Option<SyncDecision>,
    /// Whether every collaborator call succeeded
    pub success: bool,
    /// First failure
    pub error: Option<Error>,
}

impl SyncOutcome {
    fn succeeded(path: &str, decision: SyncDecision) -> Self {
        Self {
            path: path.to_string(),
            decision: Some(decision),
            success: true,
            error: None,
        }
    }

    fn failed(path: &str, error: Error) -> Self {
        Self {
            path: path.to_string(),
            decision: None,
            success: false,
            error: Some(error),
        }
    }

    /// Action taken, if any
    pub fn action(&self) -> Option<SyncAction> {
        self.decision.as_ref().map(|d| d.action)
    }
}

/// Per-document state machine over change detection and conflict resolution
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncDecisionEngine {
    resolver: ConflictResolver,
}

impl SyncDecisionEngine {
    /// Create a new decision engine
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            resolver: ConflictResolver::new(policy),
        }
    }

    /// Decide what to do with a linked document
    ///
    /// Moves and deletions are handled before this is called; only content
    /// changes are considered here.
    pub fn decide(
        &self,
        local: &LocalDocument,
        remote: &RemoteDocument,
        ancestor: Option<&str>,
        now: DateTime<Utc>,
    ) -> SyncDecision {
        let local_changed = local_changed(local);
        let remote_changed = remote_changed(&local.metadata, remote);

        let decision = match (local_changed, remote_changed) {
            (false, false) => SyncDecision::unchanged(&local.metadata),
            (true, false) => Self::commit(SyncAction::Push, local, remote, &local.body, now),
            (false, true) => Self::commit(SyncAction::Pull, local, remote, &remote.content, now),
            (true, true) if local.body == remote.content => {
                Self::commit(SyncAction::Pull, local, remote, &remote.content, now)
            }
            (true, true) => self.resolve(local, remote, ancestor, now),
        };

        debug!(
            "Decided {} for '{}' (local changed: {}, remote changed: {})",
            decision.action, local.path, local_changed, remote_changed
        );
        decision
    }

    fn resolve(
        &self,
        local: &LocalDocument,
        remote: &RemoteDocument,
        ancestor: Option<&str>,
        now: DateTime<Utc>,
    ) -> SyncDecision {
        let resolution = self.resolver.resolve(
            Side::new(&local.body, local.modified_at),
            Side::new(&remote.content, remote.modified_at),
            ancestor,
        );

        match resolution {
            Resolution::Unresolved { content, markers } => SyncDecision {
                action: SyncAction::ConflictManual,
                merged_content: Some(content),
                conflict_markers: markers,
                ..SyncDecision::unchanged(&local.metadata)
            },
            resolved => {
                let content = resolved
                    .content(&local.body, &remote.content)
                    .unwrap_or(&local.body);
                let mut decision = Self::commit(SyncAction::Merge, local, remote, content, now);
                decision.merged_content = Some(content.to_string());
                decision
            }
        }
    }

    fn commit(
        action: SyncAction,
        local: &LocalDocument,
        remote: &RemoteDocument,
        content: &str,
        now: DateTime<Utc>,
    ) -> SyncDecision {
        SyncDecision {
            action,
            merged_content: None,
            conflict_markers: Vec::new(),
            updated_metadata: local.metadata.committed(
                remote.id.clone(),
                content_hash(content),
                &local.path,
                now,
            ),
            remote_update: (content != remote.content).then(|| content.to_string()),
            local_body: Some(content.to_string()),
        }
    }

    /// Decision recording a move of a document whose content did not change
    ///
    /// The move itself is a committed write, so the revision still advances.
    pub fn record_move(local: &LocalDocument, remote: &RemoteDocument, now: DateTime<Utc>) -> SyncDecision {
        SyncDecision {
            remote_update: None,
            ..Self::commit(SyncAction::NoChange, local, remote, &local.body, now)
        }
    }

    /// Write a decision through the collaborators
    ///
    /// The remote is updated before the local metadata so that a recorded
    /// revision always corresponds to content that reached the remote.
    pub async fn apply(
        &self,
        collaborators: &Collaborators,
        id: &DocumentId,
        path: &str,
        decision: &SyncDecision,
    ) -> Result<()> {
        if decision.is_conflict() {
            return Ok(());
        }

        if let Some(content) = &decision.remote_update {
            collaborators.remote.update_document(id, content).await?;
        }

        if let Some(body) = &decision.local_body {
            collaborators
                .write_local(path, &decision.updated_metadata, body)
                .await?;
            collaborators.snapshots.save(id, body).await?;
        }

        info!(
            "Applied {} to '{}' at revision {}",
            decision.action, path, decision.updated_metadata.last_synced_revision
        );
        Ok(())
    }

    /// Decide and, unless the pass is a dry run, apply for one document
    pub async fn sync_document(
        &self,
        collaborators: &Collaborators,
        local: &LocalDocument,
        remote: &RemoteDocument,
        ctx: &PassContext,
        now: DateTime<Utc>,
    ) -> SyncOutcome {
        let result = async {
            let ancestor = collaborators
                .trusted_ancestor(&remote.id, &local.metadata)
                .await?;
            let decision = self.decide(local, remote, ancestor.as_deref(), now);
            if !ctx.is_dry_run() {
                self.apply(collaborators, &remote.id, &local.path, &decision)
                    .await?;
            }
            Ok::<_, Error>(decision)
        }
        .await;

        match result {
            Ok(decision) => SyncOutcome::succeeded(&local.path, decision),
            Err(error) => {
                warn!("Failed to sync '{}': {}", local.path, error);
                SyncOutcome::failed(&local.path, error)
            }
        }
    }
}
