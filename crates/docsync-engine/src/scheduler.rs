//! Background sync manager
//!
//! Edits are queued per document and synced once they have been quiet for the
//! debounce window. A periodic timer runs full passes. Manual "sync now"
//! requests share one run-lock with the timer, so only one pass is ever
//! active; a request arriving while a pass runs gets its progress instead.

use docsync_config::BackgroundConfig;
use docsync_types::{
    Cancellable, DocumentOutcome, ErrorKind, LinkChecker, PassContext, Result, SyncStats, Syncer,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// State of the background manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagerState {
    /// Waiting for work
    Idle,
    /// A pass or queued document sync is running
    Running,
    /// The last run failed
    Error,
}

/// Answer to a "sync now" request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequestOutcome {
    /// A pass ran to completion
    Completed(SyncStats),
    /// Another pass was already running
    Busy {
        /// Documents processed by the running pass
        processed: u64,
        /// Documents the running pass will visit
        total: u64,
    },
}

/// Debounced queue, periodic passes and failure parking on top of a [`Syncer`]
pub struct BackgroundSyncManager {
    syncer: Arc<dyn Syncer>,
    links: Arc<dyn LinkChecker>,
    config: BackgroundConfig,
    state: Arc<RwLock<ManagerState>>,
    last_error: Arc<RwLock<Option<String>>>,
    queue: Arc<Mutex<HashMap<String, Instant>>>,
    failures: Arc<RwLock<HashMap<String, u32>>>,
    parked: Arc<RwLock<HashSet<String>>>,
    run_lock: Arc<Mutex<()>>,
    current: Arc<RwLock<Option<PassContext>>>,
}

impl std::fmt::Debug for BackgroundSyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundSyncManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BackgroundSyncManager {
    /// Create a new background manager
    pub fn new(
        syncer: Arc<dyn Syncer>,
        links: Arc<dyn LinkChecker>,
        config: BackgroundConfig,
    ) -> Self {
        Self {
            syncer,
            links,
            config,
            state: Arc::new(RwLock::new(ManagerState::Idle)),
            last_error: Arc::new(RwLock::new(None)),
            queue: Arc::new(Mutex::new(HashMap::new())),
            failures: Arc::new(RwLock::new(HashMap::new())),
            parked: Arc::new(RwLock::new(HashSet::new())),
            run_lock: Arc::new(Mutex::new(())),
            current: Arc::new(RwLock::new(None)),
        }
    }

    /// Current state
    pub async fn state(&self) -> ManagerState {
        *self.state.read().await
    }

    /// Message of the last failed run
    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    /// Queue a document for syncing
    ///
    /// Queuing the same document again restarts its debounce window. Parked
    /// documents are ignored until [`Self::force_retry`] is called.
    pub async fn enqueue(&self, path: &str) {
        if self.parked.read().await.contains(path) {
            debug!("Ignoring edit to parked document '{}'", path);
            return;
        }
        self.queue
            .lock()
            .await
            .insert(path.to_string(), Instant::now());
    }

    /// Number of queued documents
    pub async fn pending(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Parked documents
    pub async fn parked(&self) -> Vec<String> {
        let mut parked: Vec<String> = self.parked.read().await.iter().cloned().collect();
        parked.sort();
        parked
    }

    /// Unpark a document and queue it again
    pub async fn force_retry(&self, path: &str) {
        self.parked.write().await.remove(path);
        self.failures.write().await.remove(path);
        info!("Retrying parked document '{}'", path);
        self.enqueue(path).await;
    }

    /// `(processed, total)` of the running pass, if any
    pub async fn progress(&self) -> Option<(u64, u64)> {
        self.current.read().await.as_ref().map(PassContext::progress)
    }

    /// Ask the running pass to stop after its current document
    pub async fn cancel(&self) -> bool {
        match self.current.read().await.as_ref() {
            Some(ctx) => {
                info!("Cancelling pass {}", ctx.id());
                ctx.cancel();
                true
            }
            None => false,
        }
    }

    /// Run a full pass now unless one is already running
    pub async fn sync_now(&self) -> Result<SyncRequestOutcome> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            let (processed, total) = self.progress().await.unwrap_or_default();
            info!("Sync already running ({}/{} documents)", processed, total);
            return Ok(SyncRequestOutcome::Busy { processed, total });
        };

        let parked = self.parked.read().await.clone();
        let ctx = PassContext::new(false).with_excluded(parked);
        self.begin(&ctx).await;

        let result = self.syncer.sync_all(&ctx).await;
        for (path, success) in ctx.outcomes() {
            if success {
                self.record_success(&path).await;
            } else {
                self.record_failure(&path).await;
            }
        }

        self.finish(result.as_ref().err()).await;
        result.map(SyncRequestOutcome::Completed)
    }

    /// Sync every queued document whose debounce window has passed
    ///
    /// Returns the number of documents synced. Nothing happens while a pass
    /// holds the run-lock; the queue is picked up on a later tick.
    pub async fn process_queue(&self) -> Result<usize> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            return Ok(0);
        };

        let settled = self.take_settled().await;
        if settled.is_empty() {
            return Ok(0);
        }

        let ctx = PassContext::new(false);
        ctx.set_total(settled.len() as u64);
        self.begin(&ctx).await;

        let mut synced = 0;
        let mut fatal = None;
        for (index, path) in settled.iter().enumerate() {
            if ctx.is_cancelled() {
                self.requeue(&settled[index..]).await;
                break;
            }

            match self.sync_queued(path, &ctx).await {
                Ok(true) => synced += 1,
                Ok(false) => {}
                Err(e) if e.kind() == ErrorKind::Authentication => {
                    self.requeue(&settled[index..]).await;
                    fatal = Some(e);
                    break;
                }
                Err(e) if e.kind() == ErrorKind::Cancelled => {
                    self.requeue(&settled[index..]).await;
                    break;
                }
                Err(e) => {
                    warn!("Failed to sync '{}': {}", path, e);
                    self.record_failure(path).await;
                }
            }
            ctx.document_done();
        }

        self.finish(fatal.as_ref()).await;
        match fatal {
            Some(e) => Err(e),
            None => Ok(synced),
        }
    }

    async fn sync_queued(&self, path: &str, ctx: &PassContext) -> Result<bool> {
        if !self.links.is_linked(path).await? {
            debug!("Dropping unlinked document '{}' from the queue", path);
            return Ok(false);
        }

        let outcome = self.syncer.sync_document(path, ctx).await?;
        self.record_success(path).await;
        debug!("Queued sync of '{}': {:?}", path, outcome);
        Ok(outcome == DocumentOutcome::Synced)
    }

    async fn take_settled(&self) -> Vec<String> {
        let now = Instant::now();
        let mut queue = self.queue.lock().await;
        let mut settled: Vec<String> = queue
            .iter()
            .filter(|(_, queued_at)| now.duration_since(**queued_at) >= self.config.debounce_window)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &settled {
            queue.remove(path);
        }
        settled.sort();
        settled
    }

    async fn requeue(&self, paths: &[String]) {
        let mut queue = self.queue.lock().await;
        let now = Instant::now();
        for path in paths {
            queue.entry(path.clone()).or_insert(now);
        }
    }

    async fn begin(&self, ctx: &PassContext) {
        *self.current.write().await = Some(ctx.clone());
        *self.state.write().await = ManagerState::Running;
    }

    async fn finish(&self, error: Option<&docsync_types::Error>) {
        *self.current.write().await = None;
        match error {
            Some(e) if e.kind() == ErrorKind::Cancelled => {
                info!("Background sync cancelled");
                *self.last_error.write().await = None;
                *self.state.write().await = ManagerState::Idle;
            }
            Some(e) => {
                error!("Background sync failed: {}", e);
                *self.last_error.write().await = Some(e.to_string());
                *self.state.write().await = ManagerState::Error;
            }
            None => {
                *self.last_error.write().await = None;
                *self.state.write().await = ManagerState::Idle;
            }
        }
    }

    async fn record_success(&self, path: &str) {
        self.failures.write().await.remove(path);
    }

    async fn record_failure(&self, path: &str) {
        let count = {
            let mut failures = self.failures.write().await;
            let count = failures.entry(path.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if count >= self.config.failure_threshold {
            warn!(
                "Parking '{}' after {} consecutive failures; it is skipped until retried",
                path, count
            );
            self.parked.write().await.insert(path.to_string());
            self.queue.lock().await.remove(path);
        }
    }

    /// Start the periodic pass and queue processing loop
    pub fn spawn(self: &Arc<Self>) -> BackgroundHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let manager = Arc::clone(self);

        let task = tokio::spawn(async move {
            let start = Instant::now();
            let mut poll = interval_at(start + manager.config.poll_interval, manager.config.poll_interval);
            poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut tick = interval_at(start + manager.config.tick_interval, manager.config.tick_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = poll.tick(), if manager.config.enabled => {
                        if let Err(e) = manager.sync_now().await {
                            debug!("Periodic pass failed: {}", e);
                        }
                    }
                    _ = tick.tick() => {
                        if let Err(e) = manager.process_queue().await {
                            debug!("Queue processing failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
            info!("Background sync stopped");
        });

        info!(
            "Background sync started (poll every {:?}, debounce {:?})",
            self.config.poll_interval, self.config.debounce_window
        );
        BackgroundHandle { shutdown_tx, task }
    }
}

/// Handle to a running background loop
#[derive(Debug)]
pub struct BackgroundHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl BackgroundHandle {
    /// Stop the loop and wait for it to exit
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docsync_types::Error;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeSyncer {
        synced: std::sync::Mutex<Vec<String>>,
        failing: HashSet<String>,
        pass_fails: std::sync::atomic::AtomicBool,
        passes: std::sync::atomic::AtomicU32,
        gate: Option<Arc<Notify>>,
        excluded_seen: std::sync::Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl Syncer for FakeSyncer {
        async fn sync_document(&self, path: &str, _ctx: &PassContext) -> Result<DocumentOutcome> {
            self.synced.lock().unwrap().push(path.to_string());
            if self.failing.contains(path) {
                return Err(Error::network("unreachable"));
            }
            Ok(DocumentOutcome::Synced)
        }

        async fn sync_all(&self, ctx: &PassContext) -> Result<SyncStats> {
            self.passes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.excluded_seen
                .lock()
                .unwrap()
                .push(ctx.is_excluded("bad.md"));
            if let Some(gate) = &self.gate {
                ctx.set_total(5);
                ctx.document_done();
                gate.notified().await;
            }
            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if self.pass_fails.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::network("offline"));
            }
            Ok(SyncStats::default())
        }
    }

    struct Links(HashSet<&'static str>);

    #[async_trait]
    impl LinkChecker for Links {
        async fn is_linked(&self, path: &str) -> Result<bool> {
            Ok(self.0.contains(path))
        }
    }

    fn manager(syncer: Arc<FakeSyncer>) -> BackgroundSyncManager {
        let links = Arc::new(Links(HashSet::from(["a.md", "b.md", "bad.md"])));
        BackgroundSyncManager::new(syncer, links, BackgroundConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_edits_coalesce_into_one_sync() {
        let syncer = Arc::new(FakeSyncer::default());
        let manager = manager(Arc::clone(&syncer));

        for _ in 0..3 {
            manager.enqueue("a.md").await;
            tokio::time::advance(Duration::from_millis(200)).await;
        }
        assert_eq!(manager.process_queue().await.unwrap(), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(manager.process_queue().await.unwrap(), 1);
        assert_eq!(*syncer.synced.lock().unwrap(), vec!["a.md".to_string()]);
        assert_eq!(manager.pending().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlinked_documents_are_dropped() {
        let syncer = Arc::new(FakeSyncer::default());
        let manager = manager(Arc::clone(&syncer));

        manager.enqueue("draft.md").await;
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(manager.process_queue().await.unwrap(), 0);
        assert!(syncer.synced.lock().unwrap().is_empty());
        assert_eq!(manager.pending().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_park_document() {
        let syncer = Arc::new(FakeSyncer {
            failing: HashSet::from(["bad.md".to_string()]),
            ..FakeSyncer::default()
        });
        let manager = manager(Arc::clone(&syncer));

        for _ in 0..3 {
            manager.enqueue("bad.md").await;
            tokio::time::advance(Duration::from_secs(2)).await;
            manager.process_queue().await.unwrap();
        }
        assert_eq!(manager.parked().await, vec!["bad.md".to_string()]);
        assert_eq!(manager.state().await, ManagerState::Idle);

        manager.enqueue("bad.md").await;
        assert_eq!(manager.pending().await, 0);

        let outcome = manager.sync_now().await.unwrap();
        assert_eq!(outcome, SyncRequestOutcome::Completed(SyncStats::default()));
        assert_eq!(*syncer.excluded_seen.lock().unwrap(), vec![true]);

        manager.force_retry("bad.md").await;
        assert!(manager.parked().await.is_empty());
        assert_eq!(manager.pending().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_sync_now_reports_progress() {
        let gate = Arc::new(Notify::new());
        let syncer = Arc::new(FakeSyncer {
            gate: Some(Arc::clone(&gate)),
            ..FakeSyncer::default()
        });
        let manager = Arc::new(manager(Arc::clone(&syncer)));

        let running = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.sync_now().await })
        };
        while manager.progress().await.is_none() {
            tokio::task::yield_now().await;
        }
        while manager.progress().await != Some((1, 5)) {
            tokio::task::yield_now().await;
        }

        let second = manager.sync_now().await.unwrap();
        assert_eq!(
            second,
            SyncRequestOutcome::Busy {
                processed: 1,
                total: 5
            }
        );
        assert_eq!(manager.state().await, ManagerState::Running);

        gate.notify_one();
        let first = running.await.unwrap().unwrap();
        assert!(matches!(first, SyncRequestOutcome::Completed(_)));
        assert_eq!(syncer.passes.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_pass_sets_error_state() {
        let syncer = Arc::new(FakeSyncer::default());
        syncer
            .pass_fails
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let manager = manager(Arc::clone(&syncer));

        assert!(manager.sync_now().await.is_err());
        assert_eq!(manager.state().await, ManagerState::Error);
        assert!(manager.last_error().await.is_some());

        syncer
            .pass_fails
            .store(false, std::sync::atomic::Ordering::SeqCst);
        manager.sync_now().await.unwrap();
        assert_eq!(manager.state().await, ManagerState::Idle);
        assert_eq!(manager.last_error().await, None);
    }

    #[tokio::test]
    async fn test_cancelled_pass_returns_to_idle() {
        let gate = Arc::new(Notify::new());
        let syncer = Arc::new(FakeSyncer {
            gate: Some(Arc::clone(&gate)),
            ..FakeSyncer::default()
        });
        let manager = Arc::new(manager(Arc::clone(&syncer)));

        let running = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.sync_now().await })
        };
        while manager.progress().await != Some((1, 5)) {
            tokio::task::yield_now().await;
        }

        assert!(manager.cancel().await);
        gate.notify_one();
        let result = running.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(manager.state().await, ManagerState::Idle);
        assert_eq!(manager.last_error().await, None);
    }

    #[tokio::test]
    async fn test_cancel_without_pass() {
        let manager = manager(Arc::new(FakeSyncer::default()));
        assert!(!manager.cancel().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_runs_periodic_pass() {
        let syncer = Arc::new(FakeSyncer::default());
        let manager = Arc::new(manager(Arc::clone(&syncer)));
        let handle = manager.spawn();

        tokio::time::sleep(Duration::from_secs(301)).await;
        handle.stop().await;
        assert_eq!(syncer.passes.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
