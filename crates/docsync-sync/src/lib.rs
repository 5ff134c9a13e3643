//! Reconciliation core for docsync
//!
//! This crate decides what happens to every document in a sync pass:
//!
//! - **Metadata**: the frontmatter codec and BLAKE3 content fingerprints
//! - **Folder Mapping**: local paths to remote derived paths and back
//! - **Change Detection**: per-document local and remote change, move and deletion state
//! - **Three-way Merge**: line-based merge against the last synced ancestor
//! - **Conflict Resolution**: the four conflict policies
//! - **Decisions**: the per-document state machine and how decisions are applied
//! - **Lifecycle**: moves, deletions, archiving and restores
//! - **Planning**: whole-pass plans with safety checks
//! - **Progress Tracking**: pass phases and progress events
//!
//! Everything up to the plan is pure; writes go through the collaborator
//! traits from `docsync-types`.
//!
//! # Examples
//!
//! ```rust
//! use docsync_sync::{merge_three_way, MergeOutcome};
//!
//! let merged = merge_three_way("a\nb\nc\n", "A\nb\nc\n", "a\nb\nC\n");
//! assert_eq!(merged, MergeOutcome::Clean("A\nb\nC\n".to_string()));
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod collaborators;
pub mod conflict;
pub mod decision;
pub mod detect;
pub mod lifecycle;
pub mod mapping;
pub mod merge;
pub mod metadata;
pub mod plan;
pub mod progress;

pub use collaborators::Collaborators;
pub use conflict::{ConflictRecord, ConflictResolver, ConflictType, Resolution, Side};
pub use decision::{SyncAction, SyncDecision, SyncDecisionEngine, SyncOutcome};
pub use detect::{ChangeDetector, DeleteReason, SyncState};
pub use lifecycle::{DeletionAction, DeletionOutcome, LifecycleHandler, MoveResolution};
pub use mapping::FolderMapper;
pub use merge::{merge_three_way, whole_document_conflict, ConflictRegion, MergeOutcome};
pub use metadata::{content_hash, FrontmatterCodec};
pub use plan::{
    PlanBuilder, PlanEntry, PlanInput, PlanWarning, PlannedAction, Probe, SyncPlan, WarningKind,
};
pub use progress::{PassPhase, PassProgress, ProgressEvent, ProgressReporter};
