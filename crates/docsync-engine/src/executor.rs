//! Pass executor
//!
//! [`PassExecutor`] runs whole-corpus passes: scan both replicas, probe the
//! linked identifiers the listing missed, build a plan, then execute it one
//! document at a time. Nothing is written when the plan is unsafe or the pass
//! is a dry run. It also implements the host integration points [`Syncer`]
//! and [`LinkChecker`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docsync_config::{Config, ConfigBuilder};
use docsync_sync::{
    content_hash, Collaborators, ConflictRecord, DeletionAction, PassPhase, PlanBuilder,
    PlanEntry, PlanInput, PlanWarning, PlannedAction, Probe, ProgressReporter, SyncPlan,
};
use docsync_types::{
    Cancellable, CrossDomainPolicy, DocumentId, DocumentMetadata, DocumentOutcome, Error,
    ErrorKind, LinkChecker, LocalDocument, PassContext, RemoteDocument, Result, SyncStats,
    Syncer,
};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// A document that failed during a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentError {
    /// Local path
    pub path: String,
    /// What went wrong
    pub message: String,
}

/// Summary of one pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    /// Counters
    pub stats: SyncStats,
    /// Plan warnings
    pub warnings: Vec<PlanWarning>,
    /// Conflicts found while planning
    pub conflicts: Vec<ConflictRecord>,
    /// Per-document failures
    pub errors: Vec<DocumentError>,
    /// Whether the plan was executed
    pub plan_safe: bool,
    /// Number of issues that made the plan unsafe
    pub blocking: usize,
    /// Whether writes were suppressed
    pub dry_run: bool,
    /// Whether the pass stopped early
    pub cancelled: bool,
}

impl PassReport {
    fn record_error(&mut self, path: &str, error: &Error) {
        self.stats.errors += 1;
        self.errors.push(DocumentError {
            path: path.to_string(),
            message: error.to_string(),
        });
    }

    /// Whether the pass ran to completion without failures or conflicts
    pub fn is_clean(&self) -> bool {
        self.plan_safe && !self.cancelled && self.errors.is_empty() && self.stats.conflicted == 0
    }
}

/// What executing one plan entry amounts to, for the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    Created,
    Updated { moved: bool },
    Moved,
    Archived,
    Unchanged,
    Skipped,
    Conflicted,
}

impl Effect {
    fn of(action: &PlannedAction) -> Self {
        match action {
            PlannedAction::CreateRemote { .. } | PlannedAction::CreateLocal { .. } => Self::Created,
            PlannedAction::Reconcile {
                movement, decision, ..
            } => {
                if decision.is_conflict() {
                    Self::Conflicted
                } else if decision.is_committed() {
                    Self::Updated {
                        moved: movement.is_move(),
                    }
                } else if movement.is_move() {
                    Self::Moved
                } else {
                    Self::Unchanged
                }
            }
            PlannedAction::RemoteDeleted { action, .. } => match action {
                DeletionAction::Recreate => Self::Created,
                DeletionAction::Archive | DeletionAction::Delete => Self::Archived,
                DeletionAction::Ignore => Self::Skipped,
            },
            PlannedAction::Skip { .. } => Self::Skipped,
        }
    }

    fn record(self, stats: &mut SyncStats) {
        match self {
            Self::Created => stats.created += 1,
            Self::Updated { moved } => {
                stats.updated += 1;
                if moved {
                    stats.moved += 1;
                }
            }
            Self::Moved => stats.moved += 1,
            Self::Archived => stats.archived += 1,
            Self::Unchanged | Self::Skipped => stats.skipped += 1,
            Self::Conflicted => stats.conflicted += 1,
        }
    }

    /// `None` when the document needs manual resolution
    fn outcome(self) -> Option<DocumentOutcome> {
        match self {
            Self::Created | Self::Updated { .. } | Self::Moved | Self::Archived => {
                Some(DocumentOutcome::Synced)
            }
            Self::Unchanged => Some(DocumentOutcome::Unchanged),
            Self::Skipped => Some(DocumentOutcome::Skipped),
            Self::Conflicted => None,
        }
    }
}

/// Runs passes and single-document syncs against the collaborators
#[derive(Debug, Clone)]
pub struct PassExecutor {
    collaborators: Collaborators,
    planner: PlanBuilder,
    cross_domain: CrossDomainPolicy,
    prefetch_concurrency: usize,
    retention_days: u32,
}

impl PassExecutor {
    /// Create a new executor; invalid configuration is rejected here
    pub fn new(config: &Config, collaborators: Collaborators) -> Result<Self> {
        ConfigBuilder::validate(config)?;
        Ok(Self {
            collaborators,
            planner: PlanBuilder::new(config),
            cross_domain: config.policy.cross_domain_policy,
            prefetch_concurrency: config.remote.prefetch_concurrency,
            retention_days: config.policy.archive_retention_days,
        })
    }

    /// Collaborators in use
    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Plan a pass without executing it
    pub async fn plan(&self, now: DateTime<Utc>) -> Result<SyncPlan> {
        let mut report = PassReport::default();
        let locals = self.scan_local(&PassContext::new(true), &mut report).await?;
        let remotes = self.scan_remote().await?;
        self.plan_snapshot(locals, remotes, now).await
    }

    /// Run a whole-corpus pass
    pub async fn run_pass(&self, ctx: &PassContext) -> Result<PassReport> {
        let progress = ProgressReporter::new(ctx.id());
        self.run_pass_with(ctx, &progress).await
    }

    /// Run a whole-corpus pass reporting to `progress`
    pub async fn run_pass_with(
        &self,
        ctx: &PassContext,
        progress: &ProgressReporter,
    ) -> Result<PassReport> {
        let started = Instant::now();
        let mut report = PassReport {
            dry_run: ctx.is_dry_run(),
            ..PassReport::default()
        };
        info!(
            "Starting pass {}{}",
            ctx.id(),
            if ctx.is_dry_run() { " (dry run)" } else { "" }
        );

        let result = self
            .run_phases(ctx, progress, &mut report, Utc::now())
            .await;
        report.stats.duration = started.elapsed();

        match result {
            Ok(()) if !report.plan_safe => {
                progress
                    .failed(format!("plan has {} blocking issues", report.blocking))
                    .await;
                Ok(report)
            }
            Ok(()) => {
                if report.cancelled {
                    progress.cancelled().await;
                } else {
                    progress.completed().await;
                }
                if report.stats.has_writes() {
                    info!("Pass {} finished: {}", ctx.id(), report.stats);
                } else {
                    info!("Pass {} finished with nothing to write", ctx.id());
                }
                Ok(report)
            }
            Err(e) => {
                error!("Pass {} aborted: {}", ctx.id(), e);
                progress.failed(e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn run_phases(
        &self,
        ctx: &PassContext,
        progress: &ProgressReporter,
        report: &mut PassReport,
        now: DateTime<Utc>,
    ) -> Result<()> {
        progress.set_phase(PassPhase::ScanningLocal).await;
        let locals = self.scan_local(ctx, report).await?;
        progress.set_phase(PassPhase::ScanningRemote).await;
        let remotes = self.scan_remote().await?;

        progress.set_phase(PassPhase::Planning).await;
        let plan = self.plan_snapshot(locals, remotes, now).await?;
        report.warnings.clone_from(&plan.warnings);
        report.conflicts.clone_from(&plan.conflicts);
        report.plan_safe = plan.safe;
        report.blocking = plan.blocking_count();

        if !plan.safe {
            Self::refuse(&plan, report);
            return Ok(());
        }

        self.execute(&plan, ctx, progress, report, now).await
    }

    async fn scan_local(
        &self,
        ctx: &PassContext,
        report: &mut PassReport,
    ) -> Result<Vec<LocalDocument>> {
        let mapper = self.planner.mapper();
        let paths = self
            .collaborators
            .local
            .list_documents(mapper.local_base())
            .await?;

        let mut locals = Vec::with_capacity(paths.len());
        for path in paths.iter().filter(|p| mapper.is_managed(p)) {
            match self.collaborators.observe_local(path).await {
                Ok(document) => locals.push(document),
                Err(e) => {
                    warn!("Cannot read '{}': {}", path, e);
                    report.record_error(path, &e);
                    report.stats.total += 1;
                    ctx.record_outcome(path, false);
                }
            }
        }
        debug!("Found {} local documents", locals.len());
        Ok(locals)
    }

    async fn scan_remote(&self) -> Result<Vec<RemoteDocument>> {
        let remotes = self
            .collaborators
            .remote
            .list_documents(self.planner.mapper().remote_root())
            .await?;
        debug!("Found {} remote documents", remotes.len());
        Ok(remotes)
    }

    async fn plan_snapshot(
        &self,
        locals: Vec<LocalDocument>,
        remotes: Vec<RemoteDocument>,
        now: DateTime<Utc>,
    ) -> Result<SyncPlan> {
        let probes = self.probe(&locals, &remotes).await?;
        let ancestors = self.load_ancestors(&locals).await;
        let input = PlanInput::new(locals, remotes, now)
            .with_probes(probes)
            .with_ancestors(ancestors);
        Ok(self.planner.build(input))
    }

    /// Look up linked identifiers the listing did not return
    async fn probe(
        &self,
        locals: &[LocalDocument],
        remotes: &[RemoteDocument],
    ) -> Result<HashMap<DocumentId, Probe>> {
        let listed: HashSet<&DocumentId> = remotes.iter().map(|r| &r.id).collect();
        let missing: BTreeSet<DocumentId> = locals
            .iter()
            .filter_map(LocalDocument::identifier)
            .filter(|id| !listed.contains(id))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(HashMap::new());
        }

        debug!("Probing {} unlisted identifiers", missing.len());
        let remote = &self.collaborators.remote;
        let lookups: Vec<(DocumentId, Result<Option<RemoteDocument>>)> = stream::iter(missing)
            .map(|id| async move {
                let result = remote.get_document(&id).await;
                (id, result)
            })
            .buffer_unordered(self.prefetch_concurrency.max(1))
            .collect()
            .await;

        lookups
            .into_iter()
            .map(|(id, result)| classify_lookup(&id, result).map(|probe| (id, probe)))
            .collect()
    }

    async fn load_ancestors(&self, locals: &[LocalDocument]) -> HashMap<DocumentId, String> {
        let mut ancestors = HashMap::new();
        for local in locals {
            let Some(id) = local.identifier() else {
                continue;
            };
            match self.collaborators.trusted_ancestor(id, &local.metadata).await {
                Ok(Some(snapshot)) => {
                    ancestors.insert(id.clone(), snapshot);
                }
                Ok(None) => {}
                Err(e) => warn!("Ignoring unreadable snapshot for {}: {}", id, e),
            }
        }
        ancestors
    }

    fn refuse(plan: &SyncPlan, report: &mut PassReport) {
        error!(
            "Refusing to execute plan with {} blocking issues; nothing was written",
            plan.blocking_count()
        );
        for warning in plan.blocking_warnings() {
            error!("{} [{}]", warning.message, warning.details.join(", "));
        }
        for entry in plan.manual_conflicts() {
            error!("'{}' needs manual conflict resolution", entry.path);
        }

        let conflicted = plan.manual_conflicts().count() as u64;
        report.stats.total += plan.entries.len() as u64;
        report.stats.conflicted += conflicted;
        report.stats.skipped += plan.entries.len() as u64 - conflicted;
    }

    async fn execute(
        &self,
        plan: &SyncPlan,
        ctx: &PassContext,
        progress: &ProgressReporter,
        report: &mut PassReport,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let total = plan.entries.len() as u64;
        ctx.set_total(total);
        progress.set_total(total).await;
        progress.set_phase(PassPhase::Executing).await;
        report.stats.total += total;

        for (index, entry) in plan.entries.iter().enumerate() {
            if ctx.is_cancelled() {
                let remaining = plan.entries.len() - index;
                info!("Pass {} cancelled with {} documents left", ctx.id(), remaining);
                report.cancelled = true;
                report.stats.skipped += remaining as u64;
                break;
            }

            progress.document_started(&entry.path).await;
            if ctx.is_excluded(&entry.path) {
                debug!("Skipping parked document '{}'", entry.path);
                report.stats.skipped += 1;
            } else {
                match self.execute_entry(entry, ctx, now).await {
                    Ok(effect) => {
                        effect.record(&mut report.stats);
                        if effect == Effect::Conflicted {
                            progress.conflict_encountered(&entry.path).await;
                        }
                        ctx.record_outcome(&entry.path, true);
                    }
                    Err(e) if e.kind() == ErrorKind::Authentication => return Err(e),
                    Err(e) => {
                        warn!("Failed to sync '{}': {}", entry.path, e);
                        progress
                            .error_encountered(format!("{}: {}", entry.path, e))
                            .await;
                        report.record_error(&entry.path, &e);
                        ctx.record_outcome(&entry.path, false);
                    }
                }
            }
            ctx.document_done();
            progress.document_completed(&entry.path).await;
        }
        Ok(())
    }

    async fn execute_entry(
        &self,
        entry: &PlanEntry,
        ctx: &PassContext,
        now: DateTime<Utc>,
    ) -> Result<Effect> {
        let effect = Effect::of(&entry.action);
        if ctx.is_dry_run() {
            debug!("Dry run: would {} '{}'", entry.action.label(), entry.path);
            return Ok(effect);
        }
        self.apply(entry, now).await?;
        Ok(effect)
    }

    async fn apply(&self, entry: &PlanEntry, now: DateTime<Utc>) -> Result<()> {
        let collaborators = &self.collaborators;
        match &entry.action {
            PlannedAction::CreateRemote {
                local,
                folder_scope,
                name,
            } => {
                let id = collaborators
                    .remote
                    .create_document(name, &local.body, folder_scope)
                    .await?;
                let metadata = local.metadata.committed(
                    id.clone(),
                    content_hash(&local.body),
                    &local.path,
                    now,
                );
                collaborators
                    .write_local(&local.path, &metadata, &local.body)
                    .await?;
                collaborators.snapshots.save(&id, &local.body).await?;
                info!("Created remote document {} for '{}'", id, local.path);
            }
            PlannedAction::CreateLocal { remote } => {
                if collaborators.local.exists(&entry.path).await? {
                    return Err(Error::path_collision(entry.path.as_str()));
                }
                let metadata = DocumentMetadata::default().committed(
                    remote.id.clone(),
                    content_hash(&remote.content),
                    &entry.path,
                    now,
                );
                collaborators
                    .write_local(&entry.path, &metadata, &remote.content)
                    .await?;
                collaborators.snapshots.save(&remote.id, &remote.content).await?;
                info!("Pulled new remote document {} to '{}'", remote.id, entry.path);
            }
            PlannedAction::Reconcile {
                local,
                remote,
                movement,
                decision,
                relinked_from,
            } => {
                self.planner
                    .lifecycle()
                    .apply_move(collaborators, &remote.id, movement)
                    .await?;
                self.planner
                    .decisions()
                    .apply(collaborators, &remote.id, &local.path, decision)
                    .await?;
                if let Some(previous) = relinked_from {
                    collaborators.snapshots.remove(previous).await?;
                    info!("Re-linked '{}' from {} to {}", local.path, previous, remote.id);
                }
            }
            PlannedAction::RemoteDeleted {
                local,
                state,
                action,
            } => {
                self.planner
                    .lifecycle()
                    .apply_deletion(collaborators, local, state, *action, now)
                    .await?;
            }
            PlannedAction::Skip { reason } => {
                debug!("Skipped '{}': {}", entry.path, reason);
            }
        }
        Ok(())
    }

    /// Other managed documents linked to `id`
    async fn other_claimants(&self, path: &str, id: &DocumentId) -> Result<Vec<LocalDocument>> {
        let mapper = self.planner.mapper();
        let paths = self
            .collaborators
            .local
            .list_documents(mapper.local_base())
            .await?;

        let mut claimants = Vec::new();
        for other in paths.iter().filter(|p| p.as_str() != path && mapper.is_managed(p)) {
            match self.collaborators.observe_local(other).await {
                Ok(document) if document.identifier() == Some(id) => claimants.push(document),
                Ok(_) => {}
                Err(e) => debug!("Cannot read '{}' while checking links: {}", other, e),
            }
        }
        Ok(claimants)
    }

    async fn probe_one(&self, id: &DocumentId) -> Result<Probe> {
        let result = self.collaborators.remote.get_document(id).await;
        classify_lookup(id, result)
    }

    /// Restore an archived document to its original path
    pub async fn restore(&self, archived_path: &str) -> Result<String> {
        self.planner
            .lifecycle()
            .restore(&self.collaborators, archived_path)
            .await
    }

    /// Delete archived documents older than the retention window
    pub async fn prune_archive(&self, now: DateTime<Utc>) -> Result<usize> {
        self.planner
            .lifecycle()
            .prune_archive(&self.collaborators, now, self.retention_days)
            .await
    }
}

fn classify_lookup(id: &DocumentId, result: Result<Option<RemoteDocument>>) -> Result<Probe> {
    match result {
        Ok(Some(document)) if document.trashed => Ok(Probe::Trashed(document)),
        Ok(Some(document)) => Ok(Probe::Found(document)),
        Ok(None) | Err(Error::NotFound { .. }) => Ok(Probe::Deleted),
        Err(Error::Forbidden { .. }) => Ok(Probe::Inaccessible),
        Err(e) if e.is_fatal_to_pass() => Err(e),
        Err(e) => {
            warn!("Lookup of {} failed: {}", id, e);
            Ok(Probe::Unavailable(e.to_string()))
        }
    }
}

#[async_trait]
impl Syncer for PassExecutor {
    async fn sync_document(&self, path: &str, ctx: &PassContext) -> Result<DocumentOutcome> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let local = self.collaborators.observe_local(path).await?;
        let Some(id) = local.identifier().cloned() else {
            debug!("'{}' is not linked; leaving it to the next full pass", path);
            return Ok(DocumentOutcome::Skipped);
        };

        let now = Utc::now();
        let mut remotes = Vec::new();
        let mut probes = HashMap::new();
        match self.probe_one(&id).await? {
            Probe::Found(document) => remotes.push(document),
            Probe::Inaccessible if self.cross_domain == CrossDomainPolicy::AutoRelink => {
                probes.insert(id.clone(), Probe::Inaccessible);
                remotes = self
                    .collaborators
                    .remote
                    .list_documents(self.planner.mapper().remote_root())
                    .await?;
            }
            other => {
                probes.insert(id.clone(), other);
            }
        }

        let ancestors = self.load_ancestors(std::slice::from_ref(&local)).await;
        let mut locals = self.other_claimants(path, &id).await?;
        locals.push(local);
        let input = PlanInput::new(locals, remotes, now)
            .with_probes(probes)
            .with_ancestors(ancestors)
            .documents_only();
        let plan = self.planner.build(input);

        let unresolved = || Error::ConflictUnresolved {
            path: path.to_string(),
            identifier: id.to_string(),
        };
        if plan.manual_conflicts().next().is_some() {
            warn!("'{}' needs manual conflict resolution", path);
            return Err(unresolved());
        }
        if !plan.safe {
            for warning in plan.blocking_warnings() {
                error!("{} [{}]", warning.message, warning.details.join(", "));
            }
            return Err(Error::PlanUnsafe {
                blocking: plan.blocking_count(),
            });
        }

        let mut outcome = DocumentOutcome::Skipped;
        for entry in plan.entries.iter().filter(|e| e.path == path) {
            let effect = self.execute_entry(entry, ctx, now).await?;
            outcome = effect.outcome().ok_or_else(unresolved)?;
        }
        ctx.document_done();
        Ok(outcome)
    }

    async fn sync_all(&self, ctx: &PassContext) -> Result<SyncStats> {
        let report = self.run_pass(ctx).await?;
        if !report.plan_safe {
            return Err(Error::PlanUnsafe {
                blocking: report.blocking,
            });
        }
        if report.cancelled {
            return Err(Error::Cancelled);
        }
        Ok(report.stats)
    }
}

#[async_trait]
impl LinkChecker for PassExecutor {
    async fn is_linked(&self, path: &str) -> Result<bool> {
        if !self.planner.mapper().is_managed(path) {
            return Ok(false);
        }
        let local = self.collaborators.observe_local(path).await?;
        Ok(local.metadata.is_linked())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_sync::{MoveResolution, SyncDecision, SyncState};
    use rstest::rstest;

    fn remote() -> RemoteDocument {
        RemoteDocument {
            id: DocumentId::new("R1"),
            content: "x".into(),
            modified_at: Utc::now(),
            derived_path: "a".into(),
            trashed: false,
        }
    }

    fn local() -> LocalDocument {
        LocalDocument::new("a.md", "x", Utc::now(), DocumentMetadata::default())
    }

    #[rstest]
    #[case(DeletionAction::Recreate, Effect::Created)]
    #[case(DeletionAction::Archive, Effect::Archived)]
    #[case(DeletionAction::Delete, Effect::Archived)]
    #[case(DeletionAction::Ignore, Effect::Skipped)]
    fn test_deletion_effects(#[case] action: DeletionAction, #[case] expected: Effect) {
        let planned = PlannedAction::RemoteDeleted {
            local: local(),
            state: SyncState::default(),
            action,
        };
        assert_eq!(Effect::of(&planned), expected);
    }

    #[test]
    fn test_move_without_content_change_counts_as_moved() {
        let planned = PlannedAction::Reconcile {
            local: local(),
            remote: remote(),
            movement: MoveResolution::MoveRemote {
                folder_scope: "b".into(),
                name: "a".into(),
            },
            decision: SyncDecision::unchanged(&DocumentMetadata::default()),
            relinked_from: None,
        };
        let effect = Effect::of(&planned);
        assert_eq!(effect, Effect::Moved);

        let mut stats = SyncStats::new();
        effect.record(&mut stats);
        assert_eq!(stats.moved, 1);
        assert_eq!(effect.outcome(), Some(DocumentOutcome::Synced));
    }

    #[test]
    fn test_unchanged_counts_as_skipped() {
        let mut stats = SyncStats::new();
        Effect::Unchanged.record(&mut stats);
        Effect::Updated { moved: true }.record(&mut stats);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.moved, 1);
        assert_eq!(Effect::Unchanged.outcome(), Some(DocumentOutcome::Unchanged));
        assert_eq!(Effect::Conflicted.outcome(), None);
    }

    #[rstest]
    #[case(Ok(None), "deleted")]
    #[case(Err(Error::not_found("R1")), "deleted")]
    #[case(Err(Error::forbidden("R1")), "inaccessible")]
    #[case(Err(Error::network("reset")), "unavailable")]
    fn test_lookup_classification(
        #[case] result: Result<Option<RemoteDocument>>,
        #[case] expected: &str,
    ) {
        let probe = classify_lookup(&DocumentId::new("R1"), result).unwrap();
        let kind = match probe {
            Probe::Found(_) => "found",
            Probe::Trashed(_) => "trashed",
            Probe::Deleted => "deleted",
            Probe::Inaccessible => "inaccessible",
            Probe::Unavailable(_) => "unavailable",
        };
        assert_eq!(kind, expected);
    }

    #[test]
    fn test_authentication_failure_aborts_lookup() {
        let result = classify_lookup(
            &DocumentId::new("R1"),
            Err(Error::authentication("expired")),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_trashed_lookup() {
        let mut document = remote();
        document.trashed = true;
        let probe = classify_lookup(&document.id.clone(), Ok(Some(document))).unwrap();
        assert!(matches!(probe, Probe::Trashed(_)));
    }
}
