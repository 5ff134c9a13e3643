//! Progress tracking for sync passes

use chrono::{DateTime, Utc};
use docsync_types::PassId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// Phases of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassPhase {
    /// Setting up
    Initializing,
    /// Reading local documents
    ScanningLocal,
    /// Listing remote documents
    ScanningRemote,
    /// Building the plan
    Planning,
    /// Applying the plan
    Executing,
    /// Finished normally
    Completed,
    /// Stopped by a cancellation request
    Cancelled,
    /// Aborted
    Failed,
}

/// Progress information for one pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassProgress {
    /// Pass identifier
    pub pass_id: PassId,
    /// Current phase
    pub phase: PassPhase,
    /// Document being processed
    pub current_document: Option<String>,
    /// Documents processed so far
    pub documents_processed: u64,
    /// Documents the pass will visit
    pub total_documents: u64,
    /// Conflicts encountered
    pub conflicts_count: u64,
    /// Errors encountered
    pub errors_count: u64,
    /// When the pass started
    pub started_at: DateTime<Utc>,
}

impl PassProgress {
    /// Create a new pass progress
    pub fn new(pass_id: PassId) -> Self {
        Self {
            pass_id,
            phase: PassPhase::Initializing,
            current_document: None,
            documents_processed: 0,
            total_documents: 0,
            conflicts_count: 0,
            errors_count: 0,
            started_at: Utc::now(),
        }
    }

    /// Update the current phase
    pub fn set_phase(&mut self, phase: PassPhase) {
        self.phase = phase;
        debug!("Pass phase changed to: {:?}", phase);
    }

    /// Percentage of documents processed
    pub fn percent(&self) -> f64 {
        if self.total_documents > 0 {
            (self.documents_processed as f64 / self.total_documents as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Time since the pass started
    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }

    /// Estimated time remaining, from the average time per document
    pub fn eta(&self) -> Option<Duration> {
        if self.documents_processed == 0 || self.documents_processed >= self.total_documents {
            return None;
        }
        let per_document = self.elapsed().as_secs_f64() / self.documents_processed as f64;
        let remaining = (self.total_documents - self.documents_processed) as f64;
        Some(Duration::from_secs_f64(per_document * remaining))
    }

    /// Whether the pass has ended
    pub fn is_complete(&self) -> bool {
        matches!(
            self.phase,
            PassPhase::Completed | PassPhase::Cancelled | PassPhase::Failed
        )
    }

    /// One-line summary, e.g. `Executing 3/10 (30%), ETA 12s`
    pub fn summary(&self) -> String {
        let eta = self
            .eta()
            .map_or_else(|| "unknown".to_string(), format_duration);
        format!(
            "{:?} {}/{} ({:.0}%), ETA {}",
            self.phase,
            self.documents_processed,
            self.total_documents,
            self.percent(),
            eta
        )
    }
}

/// Progress event types
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Progress update
    Update(PassProgress),
    /// Phase changed
    PhaseChanged(PassPhase),
    /// Document started processing
    DocumentStarted(String),
    /// Document completed processing
    DocumentCompleted(String),
    /// Conflict encountered
    ConflictEncountered(String),
    /// Error encountered
    ErrorEncountered(String),
    /// Pass completed
    Completed(PassProgress),
    /// Pass failed
    Failed(String),
}

/// Events buffered for a subscriber before new ones are dropped
const EVENT_BUFFER: usize = 256;

/// Progress reporter shared by the steps of a pass
///
/// Events are only produced once [`ProgressReporter::subscribe`] has been
/// called. A subscriber that falls more than [`EVENT_BUFFER`] events behind
/// misses the newer ones; the shared [`PassProgress`] is always current.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    progress: Arc<RwLock<PassProgress>>,
    event_tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new(pass_id: PassId) -> Self {
        Self {
            progress: Arc::new(RwLock::new(PassProgress::new(pass_id))),
            event_tx: None,
        }
    }

    /// Get the current progress
    pub async fn get_progress(&self) -> PassProgress {
        self.progress.read().await.clone()
    }

    /// Start receiving events, replacing any earlier subscriber
    ///
    /// Clones made before this call keep reporting into the shared progress
    /// but send no events.
    pub fn subscribe(&mut self) -> mpsc::Receiver<ProgressEvent> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        self.event_tx = Some(event_tx);
        event_rx
    }

    fn emit(&self, event: ProgressEvent) {
        let Some(event_tx) = &self.event_tx else {
            return;
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = event_tx.try_send(event) {
            debug!("Progress subscriber is lagging; dropping event");
        }
    }

    async fn update<F: FnOnce(&mut PassProgress)>(&self, f: F) {
        let snapshot = {
            let mut progress = self.progress.write().await;
            f(&mut progress);
            progress.clone()
        };
        self.emit(ProgressEvent::Update(snapshot));
    }

    /// Update the current phase
    pub async fn set_phase(&self, phase: PassPhase) {
        self.emit(ProgressEvent::PhaseChanged(phase));
        self.update(|p| p.set_phase(phase)).await;
    }

    /// Set the number of documents the pass will visit
    pub async fn set_total(&self, total: u64) {
        self.update(|p| p.total_documents = total).await;
    }

    /// Report document started
    pub async fn document_started(&self, path: &str) {
        self.emit(ProgressEvent::DocumentStarted(path.to_string()));
        self.update(|p| p.current_document = Some(path.to_string()))
            .await;
    }

    /// Report document completed
    pub async fn document_completed(&self, path: &str) {
        self.emit(ProgressEvent::DocumentCompleted(path.to_string()));
        self.update(|p| {
            p.documents_processed += 1;
            p.current_document = None;
        })
        .await;
    }

    /// Report conflict encountered
    pub async fn conflict_encountered(&self, path: &str) {
        self.emit(ProgressEvent::ConflictEncountered(path.to_string()));
        self.update(|p| p.conflicts_count += 1).await;
    }

    /// Report error encountered
    pub async fn error_encountered(&self, error: String) {
        self.emit(ProgressEvent::ErrorEncountered(error));
        self.update(|p| p.errors_count += 1).await;
    }

    /// Report pass completed
    pub async fn completed(&self) {
        self.update(|p| p.set_phase(PassPhase::Completed)).await;
        let progress = self.get_progress().await;
        self.emit(ProgressEvent::Completed(progress));
        info!("Sync pass completed");
    }

    /// Report pass cancelled
    pub async fn cancelled(&self) {
        self.emit(ProgressEvent::PhaseChanged(PassPhase::Cancelled));
        self.update(|p| p.set_phase(PassPhase::Cancelled)).await;
        info!("Sync pass cancelled");
    }

    /// Report pass failed
    pub async fn failed(&self, error: String) {
        self.emit(ProgressEvent::Failed(error));
        self.update(|p| p.set_phase(PassPhase::Failed)).await;
    }
}

/// Format duration as human-readable string
fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
