//! Pass planning
//!
//! [`PlanBuilder::build`] turns one snapshot of both replicas into a
//! [`SyncPlan`]: one entry per document with the exact action to take, plus
//! the warnings and conflicts an operator should see. Building a plan never
//! writes anything. A plan holding a blocking warning or a manual conflict is
//! unsafe and must not be executed.

use crate::conflict::{ConflictRecord, ConflictType};
use crate::decision::{SyncDecision, SyncDecisionEngine};
use crate::detect::{ChangeDetector, SyncState};
use crate::lifecycle::{DeletionAction, LifecycleHandler, MoveResolution};
use crate::mapping::FolderMapper;
use chrono::{DateTime, Utc};
use docsync_config::Config;
use docsync_types::{CrossDomainPolicy, DocumentId, LocalDocument, RemoteDocument};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

/// Result of looking up a linked identifier the listing did not return
#[derive(Debug, Clone, PartialEq)]
pub enum Probe {
    /// The document exists, typically outside the listed folder
    Found(RemoteDocument),
    /// The document sits in the remote trash
    Trashed(RemoteDocument),
    /// The document no longer exists
    Deleted,
    /// The document exists but cannot be read with the current credentials
    Inaccessible,
    /// The lookup itself failed, e.g. after exhausting retries
    Unavailable(String),
}

/// Kind of plan warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarningKind {
    /// Several documents claim the same remote document or local path
    DuplicateDocument,
    /// A name that usually points at an accident, such as `Untitled`
    SuspiciousPattern,
    /// An unlinked local document was linked to an existing remote one
    ExistingFile,
    /// A linked identifier cannot be read
    CrossDomain,
    /// A document cannot land at its path because another one is there
    PathCollision,
}

impl WarningKind {
    /// Whether a warning of this kind makes the plan unsafe
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::DuplicateDocument)
    }
}

/// Something the operator should look at before or after the pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanWarning {
    /// Warning kind
    pub kind: WarningKind,
    /// Human-readable message
    pub message: String,
    /// Paths and identifiers involved
    pub details: Vec<String>,
}

impl PlanWarning {
    /// Create a new warning
    pub fn new(kind: WarningKind, message: impl Into<String>, details: Vec<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details,
        }
    }

    /// Whether this warning makes the plan unsafe
    pub fn is_blocking(&self) -> bool {
        self.kind.is_blocking()
    }
}

/// Action planned for one document
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedAction {
    /// Create the remote counterpart of an unlinked local document
    CreateRemote {
        /// Local document as it will be committed
        local: LocalDocument,
        /// Target remote folder
        folder_scope: String,
        /// Target display name
        name: String,
    },
    /// Create the local counterpart of an unowned remote document
    CreateLocal {
        /// Remote document to pull
        remote: RemoteDocument,
    },
    /// Reconcile a linked pair
    Reconcile {
        /// Local document as seen after the move, if any
        local: LocalDocument,
        /// Remote counterpart
        remote: RemoteDocument,
        /// Move to apply before the decision
        movement: MoveResolution,
        /// Content decision
        decision: SyncDecision,
        /// Identifier the document was linked to before being re-linked
        relinked_from: Option<DocumentId>,
    },
    /// The remote counterpart was deleted or trashed
    RemoteDeleted {
        /// Local document
        local: LocalDocument,
        /// Detected state
        state: SyncState,
        /// What to do about it
        action: DeletionAction,
    },
    /// Leave the document alone this pass
    Skip {
        /// Why
        reason: String,
    },
}

impl PlannedAction {
    /// Short name for logs and reports
    pub fn label(&self) -> &'static str {
        match self {
            Self::CreateRemote { .. } => "create-remote",
            Self::CreateLocal { .. } => "create-local",
            Self::Reconcile { decision, .. } if decision.is_conflict() => "conflict",
            Self::Reconcile { .. } => "reconcile",
            Self::RemoteDeleted { .. } => "remote-deleted",
            Self::Skip { .. } => "skip",
        }
    }

    /// Whether executing the action writes anything
    pub fn writes(&self) -> bool {
        match self {
            Self::CreateRemote { .. } | Self::CreateLocal { .. } | Self::RemoteDeleted { .. } => {
                true
            }
            Self::Reconcile {
                movement, decision, ..
            } => {
                movement.is_move()
                    || decision.remote_update.is_some()
                    || decision.local_body.is_some()
            }
            Self::Skip { .. } => false,
        }
    }
}

/// One document in a plan
#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    /// Local path, or the target path for documents not yet present locally
    pub path: String,
    /// Remote identifier, when known
    pub identifier: Option<DocumentId>,
    /// Planned action
    pub action: PlannedAction,
}

/// Everything a pass intends to do
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    /// Entries ordered by path
    pub entries: Vec<PlanEntry>,
    /// Warnings found while planning
    pub warnings: Vec<PlanWarning>,
    /// Conflicts found while planning, resolved or not
    pub conflicts: Vec<ConflictRecord>,
    /// Whether the plan may be executed
    pub safe: bool,
}

impl SyncPlan {
    /// Warnings that make the plan unsafe
    pub fn blocking_warnings(&self) -> impl Iterator<Item = &PlanWarning> {
        self.warnings.iter().filter(|w| w.is_blocking())
    }

    /// Number of reasons the plan is unsafe
    pub fn blocking_count(&self) -> usize {
        self.blocking_warnings().count() + self.manual_conflicts().count()
    }

    /// Entries whose content needs manual resolution
    pub fn manual_conflicts(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|entry| {
            matches!(&entry.action, PlannedAction::Reconcile { decision, .. } if decision.is_conflict())
        })
    }

    /// Number of entries that write something
    pub fn pending_writes(&self) -> usize {
        self.entries.iter().filter(|e| e.action.writes()).count()
    }

    /// Entry for a path
    pub fn entry(&self, path: &str) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Entry counts per action label
    pub fn summary(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.action.label()).or_insert(0) += 1;
        }
        counts
    }
}

/// One snapshot of both replicas
#[derive(Debug, Clone)]
pub struct PlanInput {
    /// Local documents
    pub locals: Vec<LocalDocument>,
    /// Remote documents listed under the remote root
    pub remotes: Vec<RemoteDocument>,
    /// Lookups for linked identifiers the listing did not return
    pub probes: HashMap<DocumentId, Probe>,
    /// Trusted ancestor snapshots by identifier
    pub ancestors: HashMap<DocumentId, String>,
    /// Time of the pass
    pub now: DateTime<Utc>,
    /// Whether remote documents nobody links to are pulled
    pub pull_unowned: bool,
}

impl PlanInput {
    /// Create an input covering the whole corpus
    pub fn new(locals: Vec<LocalDocument>, remotes: Vec<RemoteDocument>, now: DateTime<Utc>) -> Self {
        Self {
            locals,
            remotes,
            probes: HashMap::new(),
            ancestors: HashMap::new(),
            now,
            pull_unowned: true,
        }
    }

    /// Set the identifier lookups
    pub fn with_probes(mut self, probes: HashMap<DocumentId, Probe>) -> Self {
        self.probes = probes;
        self
    }

    /// Set the ancestor snapshots
    pub fn with_ancestors(mut self, ancestors: HashMap<DocumentId, String>) -> Self {
        self.ancestors = ancestors;
        self
    }

    /// Restrict the plan to the given local documents
    pub fn documents_only(mut self) -> Self {
        self.pull_unowned = false;
        self
    }
}

struct Draft {
    plan: SyncPlan,
    local_paths: HashSet<String>,
}

impl Draft {
    fn push(&mut self, path: &str, identifier: Option<DocumentId>, action: PlannedAction) {
        self.plan.entries.push(PlanEntry {
            path: path.to_string(),
            identifier,
            action,
        });
    }

    fn skip(&mut self, path: &str, identifier: Option<DocumentId>, reason: impl Into<String>) {
        let reason = reason.into();
        debug!("Skipping '{}': {}", path, reason);
        self.push(path, identifier, PlannedAction::Skip { reason });
    }

    fn warn(&mut self, kind: WarningKind, message: String, details: Vec<String>) {
        warn!("{}", message);
        self.plan.warnings.push(PlanWarning::new(kind, message, details));
    }
}

/// Builds plans under the configured policies
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    detector: ChangeDetector,
    decisions: SyncDecisionEngine,
    lifecycle: LifecycleHandler,
    cross_domain: CrossDomainPolicy,
}

impl PlanBuilder {
    /// Create a new plan builder
    pub fn new(config: &Config) -> Self {
        let mapper = FolderMapper::new(&config.folders);
        Self {
            detector: ChangeDetector::new(mapper.clone())
                .with_remote_moves(config.folders.detect_remote_moves),
            decisions: SyncDecisionEngine::new(config.policy.conflict_policy),
            lifecycle: LifecycleHandler::new(config.policy.clone(), mapper),
            cross_domain: config.policy.cross_domain_policy,
        }
    }

    /// Folder mapper
    pub fn mapper(&self) -> &FolderMapper {
        self.detector.mapper()
    }

    /// Decision engine
    pub fn decisions(&self) -> SyncDecisionEngine {
        self.decisions
    }

    /// Lifecycle handler
    pub fn lifecycle(&self) -> &LifecycleHandler {
        &self.lifecycle
    }

    /// Build a plan from one snapshot of both replicas
    pub fn build(&self, input: PlanInput) -> SyncPlan {
        let PlanInput {
            locals,
            remotes,
            probes,
            ancestors,
            now,
            pull_unowned,
        } = input;

        let locals: Vec<LocalDocument> = locals
            .into_iter()
            .filter(|local| self.mapper().is_managed(&local.path))
            .collect();
        let mut draft = Draft {
            plan: SyncPlan::default(),
            local_paths: locals.iter().map(|l| l.path.clone()).collect(),
        };

        let remote_by_id: HashMap<&DocumentId, &RemoteDocument> =
            remotes.iter().map(|r| (&r.id, r)).collect();

        let mut by_id: BTreeMap<&DocumentId, Vec<&LocalDocument>> = BTreeMap::new();
        let mut unlinked = Vec::new();
        for local in &locals {
            match local.identifier() {
                Some(id) => by_id.entry(id).or_default().push(local),
                None => unlinked.push(local),
            }
        }

        let mut owned: HashSet<DocumentId> = HashSet::new();
        let mut relink = Vec::new();
        for (id, claimants) in by_id {
            owned.insert(id.clone());
            let &[local] = claimants.as_slice() else {
                Self::duplicate_identifier(&mut draft, id, &claimants);
                continue;
            };

            let found = remote_by_id.get(id).copied().or_else(|| match probes.get(id) {
                Some(Probe::Found(remote) | Probe::Trashed(remote)) => Some(remote),
                _ => None,
            });
            let ancestor = ancestors.get(id).map(String::as_str);

            match (found, probes.get(id)) {
                (Some(remote), _) => self.plan_linked(&mut draft, local, Some(remote), ancestor, now),
                (None, Some(Probe::Deleted)) => self.plan_linked(&mut draft, local, None, None, now),
                (None, Some(Probe::Unavailable(reason))) => {
                    draft.skip(&local.path, Some(id.clone()), format!("lookup failed: {reason}"));
                }
                (None, _) => {
                    owned.remove(id);
                    self.cross_domain(&mut draft, local, id, &mut relink);
                }
            }
        }

        let claimed = self.match_by_path(&mut draft, &remotes, &owned, &unlinked, &relink, now);

        if pull_unowned {
            let unowned = remotes
                .iter()
                .filter(|r| !r.trashed && !owned.contains(&r.id) && !claimed.contains(&r.id));
            self.plan_unowned(&mut draft, unowned);
        }

        self.flag_suspicious(&mut draft, &locals, &remotes);

        let mut plan = draft.plan;
        plan.entries.sort_by(|a, b| a.path.cmp(&b.path));
        plan.safe = plan.blocking_count() == 0;

        info!(
            "Planned {} entries ({} writing), {} warnings, {} conflicts, safe: {}",
            plan.entries.len(),
            plan.pending_writes(),
            plan.warnings.len(),
            plan.conflicts.len(),
            plan.safe
        );
        plan
    }

    fn duplicate_identifier(draft: &mut Draft, id: &DocumentId, claimants: &[&LocalDocument]) {
        let paths: Vec<String> = claimants.iter().map(|l| l.path.clone()).collect();
        draft.warn(
            WarningKind::DuplicateDocument,
            format!("{} local documents are linked to {}", paths.len(), id),
            paths.clone(),
        );
        for path in &paths {
            let others: Vec<&str> = paths
                .iter()
                .filter(|p| *p != path)
                .map(String::as_str)
                .collect();
            draft.plan.conflicts.push(ConflictRecord::new(
                path.as_str(),
                Some(id.clone()),
                ConflictType::DuplicateIdentifier,
                format!("also claimed by {}", others.join(", ")),
            ));
            draft.skip(path, Some(id.clone()), "identifier claimed by several documents");
        }
    }

    fn plan_linked(
        &self,
        draft: &mut Draft,
        local: &LocalDocument,
        remote: Option<&RemoteDocument>,
        ancestor: Option<&str>,
        now: DateTime<Utc>,
    ) {
        let state = self.detector.detect(local, remote, now);
        match remote {
            Some(remote) if !state.has_remote_delete => {
                self.reconcile(draft, local, remote, &state, ancestor, now, None);
            }
            _ => {
                let action = self.lifecycle.resolve_deletion(&state, local);
                debug!("Remote counterpart of '{}' is gone: {:?}", local.path, action);
                draft.push(
                    &local.path,
                    local.identifier().cloned(),
                    PlannedAction::RemoteDeleted {
                        local: local.clone(),
                        state,
                        action,
                    },
                );
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn reconcile(
        &self,
        draft: &mut Draft,
        local: &LocalDocument,
        remote: &RemoteDocument,
        state: &SyncState,
        ancestor: Option<&str>,
        now: DateTime<Utc>,
        relinked_from: Option<DocumentId>,
    ) {
        let (movement, move_record) = self.lifecycle.resolve_moves(state, local, remote);
        if let Some(record) = move_record {
            draft.plan.conflicts.push(record);
        }

        if let MoveResolution::MoveLocal { to, .. } = &movement {
            if draft.local_paths.contains(to) {
                draft.warn(
                    WarningKind::PathCollision,
                    format!("'{}' cannot follow its remote move: '{}' already exists", local.path, to),
                    vec![local.path.clone(), to.clone(), remote.id.to_string()],
                );
                draft.plan.conflicts.push(ConflictRecord::new(
                    local.path.as_str(),
                    Some(remote.id.clone()),
                    ConflictType::PathCollision,
                    format!("remote move target '{to}' is taken"),
                ));
                draft.skip(&local.path, Some(remote.id.clone()), "move target is taken");
                return;
            }
        }

        let mut view = local.clone();
        view.path = movement.local_path(&local.path).to_string();

        let mut decision = self.decisions.decide(&view, remote, ancestor, now);
        if movement.is_move() && !decision.is_committed() && !decision.is_conflict() {
            decision = SyncDecisionEngine::record_move(&view, remote, now);
        }

        if decision.is_conflict() {
            let detail = if decision.conflict_markers.is_empty() {
                "both sides changed the document".to_string()
            } else {
                decision
                    .conflict_markers
                    .iter()
                    .map(|region| region.describe())
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            draft.plan.conflicts.push(ConflictRecord::new(
                local.path.as_str(),
                Some(remote.id.clone()),
                ConflictType::ContentOverlap,
                detail,
            ));
        }

        draft.push(
            &local.path,
            Some(remote.id.clone()),
            PlannedAction::Reconcile {
                local: view,
                remote: remote.clone(),
                movement,
                decision,
                relinked_from,
            },
        );
    }

    fn cross_domain<'a>(
        &self,
        draft: &mut Draft,
        local: &'a LocalDocument,
        id: &DocumentId,
        relink: &mut Vec<&'a LocalDocument>,
    ) {
        match self.cross_domain {
            CrossDomainPolicy::Skip => {
                draft.skip(&local.path, Some(id.clone()), "linked identifier is not accessible");
            }
            CrossDomainPolicy::Warn => {
                draft.warn(
                    WarningKind::CrossDomain,
                    format!("'{}' is linked to {} which cannot be read", local.path, id),
                    vec![local.path.clone(), id.to_string()],
                );
                draft.skip(&local.path, Some(id.clone()), "linked identifier is not accessible");
            }
            CrossDomainPolicy::AutoRelink => relink.push(local),
        }
    }

    /// Link unlinked and re-linkable documents to unowned remote documents
    /// at their expected path; create the rest
    ///
    /// Returns the identifiers that were claimed.
    fn match_by_path(
        &self,
        draft: &mut Draft,
        remotes: &[RemoteDocument],
        owned: &HashSet<DocumentId>,
        unlinked: &[&LocalDocument],
        relink: &[&LocalDocument],
        now: DateTime<Utc>,
    ) -> HashSet<DocumentId> {
        let mut by_path: HashMap<&str, Vec<&RemoteDocument>> = HashMap::new();
        for remote in remotes.iter().filter(|r| !r.trashed && !owned.contains(&r.id)) {
            by_path.entry(remote.derived_path.as_str()).or_default().push(remote);
        }

        let candidates = unlinked
            .iter()
            .map(|local| (*local, false))
            .chain(relink.iter().map(|local| (*local, true)));

        let mut claims: BTreeMap<&DocumentId, Vec<(&LocalDocument, bool)>> = BTreeMap::new();
        for (local, relinking) in candidates {
            let matches = self
                .mapper()
                .local_to_remote(&local.path)
                .and_then(|path| by_path.get(path.as_str()));
            match matches.map(Vec::as_slice) {
                Some([remote]) => claims.entry(&remote.id).or_default().push((local, relinking)),
                Some(_) => draft.skip(
                    &local.path,
                    local.identifier().cloned(),
                    "several remote documents match this path",
                ),
                None => self.plan_create(draft, local, relinking),
            }
        }

        let mut claimed = HashSet::new();
        for (id, claimants) in claims {
            claimed.insert(id.clone());
            let Some(remote) = by_path
                .values()
                .flatten()
                .find(|remote| remote.id == *id)
                .copied()
            else {
                continue;
            };

            let [(local, relinking)] = claimants.as_slice() else {
                let paths: Vec<String> = claimants.iter().map(|(l, _)| l.path.clone()).collect();
                draft.warn(
                    WarningKind::DuplicateDocument,
                    format!(
                        "{} local documents map to remote document {} ('{}')",
                        paths.len(),
                        id,
                        remote.derived_path
                    ),
                    paths.iter().cloned().chain([id.to_string()]).collect(),
                );
                for (local, _) in &claimants {
                    draft.skip(
                        &local.path,
                        local.identifier().cloned(),
                        "several documents map to the same remote document",
                    );
                }
                continue;
            };

            let (view, relinked_from) = if *relinking {
                info!("Re-linking '{}' to {}", local.path, id);
                (relinked_view(local), local.identifier().cloned())
            } else {
                draft.warn(
                    WarningKind::ExistingFile,
                    format!(
                        "'{}' matches existing remote document {}; linking instead of creating",
                        local.path, id
                    ),
                    vec![local.path.clone(), id.to_string()],
                );
                ((*local).clone(), None)
            };

            let state = self.detector.detect(&view, Some(remote), now);
            self.reconcile(draft, &view, remote, &state, None, now, relinked_from);
        }
        claimed
    }

    fn plan_create(&self, draft: &mut Draft, local: &LocalDocument, relinking: bool) {
        let Some((folder_scope, name)) = self.mapper().remote_target(&local.path) else {
            draft.skip(&local.path, None, "outside the managed folder");
            return;
        };

        let local = if relinking {
            info!(
                "Recreating '{}': {:?} cannot be read and nothing matches its path",
                local.path,
                local.identifier()
            );
            relinked_view(local)
        } else {
            local.clone()
        };

        let path = local.path.clone();
        draft.push(
            &path,
            None,
            PlannedAction::CreateRemote {
                local,
                folder_scope,
                name,
            },
        );
    }

    fn plan_unowned<'a>(
        &self,
        draft: &mut Draft,
        unowned: impl Iterator<Item = &'a RemoteDocument>,
    ) {
        let mut targets: BTreeMap<String, Vec<&RemoteDocument>> = BTreeMap::new();
        for remote in unowned {
            match self.mapper().remote_to_local(&remote.derived_path) {
                Some(target) => targets.entry(target).or_default().push(remote),
                None => debug!("Ignoring unmapped remote '{}'", remote.derived_path),
            }
        }

        for (target, remotes) in targets {
            let [remote] = remotes.as_slice() else {
                draft.warn(
                    WarningKind::DuplicateDocument,
                    format!("{} remote documents would land at '{}'", remotes.len(), target),
                    remotes.iter().map(|r| r.id.to_string()).collect(),
                );
                draft.skip(&target, None, "several remote documents share this path");
                continue;
            };

            if draft.local_paths.contains(&target) {
                draft.warn(
                    WarningKind::PathCollision,
                    format!(
                        "remote document {} would land at '{}' which holds another document",
                        remote.id, target
                    ),
                    vec![target.clone(), remote.id.to_string()],
                );
                draft.plan.conflicts.push(ConflictRecord::new(
                    target.as_str(),
                    Some(remote.id.clone()),
                    ConflictType::PathCollision,
                    format!("remote '{}' cannot be pulled", remote.derived_path),
                ));
                draft.skip(&target, Some(remote.id.clone()), "target path is taken");
                continue;
            }

            draft.push(
                &target,
                Some(remote.id.clone()),
                PlannedAction::CreateLocal {
                    remote: (*remote).clone(),
                },
            );
        }
    }

    fn flag_suspicious(&self, draft: &mut Draft, locals: &[LocalDocument], remotes: &[RemoteDocument]) {
        let extension = format!(".{}", self.mapper().extension());
        for local in locals {
            let file = local.path.rsplit('/').next().unwrap_or(&local.path);
            let stem = file.strip_suffix(extension.as_str()).unwrap_or(file);
            if let Some(why) = suspicious_name(stem) {
                draft.warn(
                    WarningKind::SuspiciousPattern,
                    format!("local document '{}' looks like {}", local.path, why),
                    vec![local.path.clone()],
                );
            }
        }
        for remote in remotes.iter().filter(|r| !r.trashed) {
            if let Some(why) = suspicious_name(remote.name()) {
                draft.warn(
                    WarningKind::SuspiciousPattern,
                    format!("remote document '{}' looks like {}", remote.derived_path, why),
                    vec![remote.derived_path.clone(), remote.id.to_string()],
                );
            }
        }
    }
}

/// A local document stripped of its stale link, keeping its revision count
fn relinked_view(local: &LocalDocument) -> LocalDocument {
    let mut view = local.clone();
    let metadata = &mut view.metadata;
    metadata.original_doc_id = metadata.identifier.take().or(metadata.original_doc_id.take());
    metadata.last_synced_content_hash = None;
    metadata.last_synced_at = None;
    metadata.last_synced_path = None;
    metadata.deletion_scheduled_at = None;
    view
}

fn suspicious_name(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    if lower.starts_with("untitled") {
        Some("an untitled document")
    } else if lower.starts_with("copy of ") || lower.starts_with("copy_of_") {
        Some("an accidental copy")
    } else if name.trim() != name {
        Some("a name with stray whitespace")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::SyncAction;
    use crate::metadata::content_hash;
    use chrono::Duration;
    use docsync_types::DocumentMetadata;
    use rstest::rstest;

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_000) + Duration::minutes(minutes)
    }

    fn builder() -> PlanBuilder {
        PlanBuilder::new(&Config::default())
    }

    fn builder_with(policy: CrossDomainPolicy) -> PlanBuilder {
        let mut config = Config::default();
        config.policy.cross_domain_policy = policy;
        PlanBuilder::new(&config)
    }

    fn linked(path: &str, id: &str, body: &str) -> LocalDocument {
        let metadata = DocumentMetadata {
            identifier: Some(DocumentId::new(id)),
            last_synced_content_hash: Some(content_hash(body)),
            last_synced_at: Some(at(0)),
            last_synced_path: Some(path.to_string()),
            last_synced_revision: 3,
            ..Default::default()
        };
        LocalDocument::new(path, body, at(0), metadata)
    }

    fn unlinked(path: &str, body: &str) -> LocalDocument {
        LocalDocument::new(path, body, at(1), DocumentMetadata::default())
    }

    fn remote(id: &str, derived_path: &str, content: &str) -> RemoteDocument {
        RemoteDocument {
            id: DocumentId::new(id),
            content: content.to_string(),
            modified_at: at(0),
            derived_path: derived_path.to_string(),
            trashed: false,
        }
    }

    #[test]
    fn test_clean_corpus_plans_no_writes() {
        let input = PlanInput::new(
            vec![linked("a.md", "R1", "x"), linked("Notes/b.md", "R2", "y")],
            vec![remote("R1", "a", "x"), remote("R2", "Notes/b", "y")],
            at(10),
        );
        let plan = builder().build(input);

        assert!(plan.safe);
        assert_eq!(plan.entries.len(), 2);
        assert_eq!(plan.pending_writes(), 0);
        assert_eq!(plan.entries[0].path, "Notes/b.md");
    }

    #[test]
    fn test_unlinked_local_is_created_remotely() {
        let input = PlanInput::new(vec![unlinked("Notes/Road_map.md", "plan")], vec![], at(10));
        let plan = builder().build(input);

        match &plan.entries[0].action {
            PlannedAction::CreateRemote {
                folder_scope, name, ..
            } => {
                assert_eq!(folder_scope, "Notes");
                assert_eq!(name, "Road map");
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_unowned_remote_is_pulled() {
        let input = PlanInput::new(vec![], vec![remote("R9", "Notes/Road map", "plan")], at(10));
        let plan = builder().build(input);

        let entry = plan.entry("Notes/Road_map.md").unwrap();
        assert!(matches!(entry.action, PlannedAction::CreateLocal { .. }));
        assert_eq!(entry.identifier, Some(DocumentId::new("R9")));
    }

    #[test]
    fn test_documents_only_does_not_pull() {
        let input = PlanInput::new(vec![], vec![remote("R9", "x", "plan")], at(10)).documents_only();
        assert!(builder().build(input).entries.is_empty());
    }

    #[test]
    fn test_duplicate_identifier_blocks_plan() {
        let input = PlanInput::new(
            vec![linked("a.md", "R1", "x"), linked("b.md", "R1", "x")],
            vec![remote("R1", "a", "x")],
            at(10),
        );
        let plan = builder().build(input);

        assert!(!plan.safe);
        assert_eq!(plan.blocking_count(), 1);
        assert!(plan
            .entries
            .iter()
            .all(|e| matches!(e.action, PlannedAction::Skip { .. })));
        assert_eq!(
            plan.conflicts
                .iter()
                .filter(|c| c.conflict_type == ConflictType::DuplicateIdentifier)
                .count(),
            2
        );
    }

    #[test]
    fn test_two_locals_mapping_to_one_remote_block_plan() {
        let input = PlanInput::new(
            vec![unlinked("a_b.md", "one"), unlinked("a b.md", "two")],
            vec![remote("R2", "a b", "one")],
            at(10),
        );
        let plan = builder().build(input);

        assert!(!plan.safe);
        let warning = plan.blocking_warnings().next().unwrap();
        assert_eq!(warning.kind, WarningKind::DuplicateDocument);
        assert!(warning.details.contains(&"R2".to_string()));
        assert_eq!(plan.pending_writes(), 0);
    }

    #[test]
    fn test_unlinked_local_links_to_existing_remote() {
        let input = PlanInput::new(
            vec![unlinked("Road_map.md", "same")],
            vec![remote("R5", "Road map", "same")],
            at(10),
        );
        let plan = builder().build(input);

        assert!(plan.safe);
        assert!(plan.warnings.iter().any(|w| w.kind == WarningKind::ExistingFile));
        match &plan.entries[0].action {
            PlannedAction::Reconcile { decision, .. } => {
                assert_eq!(decision.action, SyncAction::Pull);
                assert_eq!(
                    decision.updated_metadata.identifier,
                    Some(DocumentId::new("R5"))
                );
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_remote_at_taken_path_is_a_collision() {
        let input = PlanInput::new(
            vec![linked("a.md", "R1", "x")],
            vec![remote("R1", "moved/a", "x"), remote("R2", "a", "other")],
            at(10),
        );
        let plan = builder().build(input);

        assert!(plan.safe);
        assert!(plan.warnings.iter().any(|w| w.kind == WarningKind::PathCollision));
        assert!(plan
            .conflicts
            .iter()
            .any(|c| c.conflict_type == ConflictType::PathCollision));
    }

    #[rstest]
    #[case(CrossDomainPolicy::Skip, 0, "skip")]
    #[case(CrossDomainPolicy::Warn, 1, "skip")]
    #[case(CrossDomainPolicy::AutoRelink, 0, "create-remote")]
    fn test_cross_domain_policy(
        #[case] policy: CrossDomainPolicy,
        #[case] warnings: usize,
        #[case] label: &str,
    ) {
        let probes = HashMap::from([(DocumentId::new("R1"), Probe::Inaccessible)]);
        let input = PlanInput::new(vec![linked("a.md", "R1", "x")], vec![], at(10)).with_probes(probes);
        let plan = builder_with(policy).build(input);

        assert_eq!(plan.warnings.len(), warnings);
        assert_eq!(plan.entries[0].action.label(), label);
    }

    #[test]
    fn test_auto_relink_by_path_keeps_history() {
        let probes = HashMap::from([(DocumentId::new("R1"), Probe::Inaccessible)]);
        let input = PlanInput::new(
            vec![linked("a.md", "R1", "x")],
            vec![remote("R7", "a", "x")],
            at(10),
        )
        .with_probes(probes);
        let plan = builder_with(CrossDomainPolicy::AutoRelink).build(input);

        match &plan.entries[0].action {
            PlannedAction::Reconcile {
                decision,
                relinked_from,
                ..
            } => {
                assert_eq!(relinked_from, &Some(DocumentId::new("R1")));
                let metadata = &decision.updated_metadata;
                assert_eq!(metadata.identifier, Some(DocumentId::new("R7")));
                assert_eq!(metadata.original_doc_id, Some(DocumentId::new("R1")));
                assert_eq!(metadata.last_synced_revision, 4);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_failed_lookup_is_skipped_not_relinked() {
        let probes = HashMap::from([(
            DocumentId::new("R1"),
            Probe::Unavailable("timed out".into()),
        )]);
        let input = PlanInput::new(
            vec![linked("a.md", "R1", "x")],
            vec![remote("R7", "a", "x")],
            at(10),
        )
        .with_probes(probes);
        let plan = builder_with(CrossDomainPolicy::AutoRelink).build(input);

        assert_eq!(plan.entry("a.md").unwrap().action.label(), "skip");
        assert!(plan.warnings.iter().any(|w| w.kind == WarningKind::PathCollision));
    }

    #[test]
    fn test_deleted_probe_plans_deletion() {
        let probes = HashMap::from([(DocumentId::new("R1"), Probe::Deleted)]);
        let input = PlanInput::new(vec![linked("a.md", "R1", "x")], vec![], at(10)).with_probes(probes);
        let plan = builder().build(input);

        assert!(matches!(
            plan.entries[0].action,
            PlannedAction::RemoteDeleted {
                action: DeletionAction::Archive,
                ..
            }
        ));
    }

    #[test]
    fn test_overlapping_edits_make_plan_unsafe() {
        let mut local = linked("a.md", "R1", "a\nb\n");
        local.body = "a\nL\n".into();
        local.modified_at = at(2);
        let mut theirs = remote("R1", "a", "a\nR\n");
        theirs.modified_at = at(3);

        let ancestors = HashMap::from([(DocumentId::new("R1"), "a\nb\n".to_string())]);
        let input = PlanInput::new(vec![local], vec![theirs], at(10)).with_ancestors(ancestors);
        let plan = builder().build(input);

        assert!(!plan.safe);
        assert_eq!(plan.manual_conflicts().count(), 1);
        assert_eq!(plan.conflicts[0].conflict_type, ConflictType::ContentOverlap);
    }

    #[test]
    fn test_local_move_with_unchanged_body_commits_once() {
        let mut local = linked("old/a.md", "R1", "x");
        local.path = "new/a.md".into();
        local.modified_at = at(1);
        let input = PlanInput::new(vec![local], vec![remote("R1", "old/a", "x")], at(10));
        let plan = builder().build(input);

        match &plan.entries[0].action {
            PlannedAction::Reconcile {
                movement, decision, ..
            } => {
                assert!(movement.is_move());
                assert_eq!(decision.updated_metadata.last_synced_revision, 4);
                assert_eq!(
                    decision.updated_metadata.last_synced_path.as_deref(),
                    Some("new/a.md")
                );
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_archive_folder_is_not_planned() {
        let input = PlanInput::new(
            vec![unlinked(".sync-archive/2024-01-01/a.md", "x")],
            vec![],
            at(10),
        );
        assert!(builder().build(input).entries.is_empty());
    }

    #[rstest]
    #[case("Untitled document", true)]
    #[case("Copy of plan", true)]
    #[case(" padded", true)]
    #[case("Road map", false)]
    fn test_suspicious_names(#[case] name: &str, #[case] suspicious: bool) {
        assert_eq!(suspicious_name(name).is_some(), suspicious);
    }
}
