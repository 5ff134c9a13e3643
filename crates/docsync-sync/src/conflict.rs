//! Conflict resolution for documents changed on both sides

use crate::merge::{merge_three_way, whole_document_conflict, ConflictRegion, MergeOutcome};
use chrono::{DateTime, Utc};
use docsync_types::{ConflictPolicy, DocumentId};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One side of a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Side<'a> {
    /// Current content
    pub content: &'a str,
    /// Modification time
    pub modified_at: DateTime<Utc>,
}

impl<'a> Side<'a> {
    /// Create a side
    pub fn new(content: &'a str, modified_at: DateTime<Utc>) -> Self {
        Self {
            content,
            modified_at,
        }
    }
}

/// How a conflict was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the local content
    TakeLocal,
    /// Keep the remote content
    TakeRemote,
    /// Both sides combined
    Merged {
        /// Merged content
        content: String,
    },
    /// Overlapping edits need a human
    Unresolved {
        /// Content with conflict markers
        content: String,
        /// Each overlapping region
        markers: Vec<ConflictRegion>,
    },
}

impl Resolution {
    /// Whether the conflict needs manual resolution
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::Unresolved { .. })
    }

    /// Content both sides should hold after applying the resolution
    pub fn content<'a>(&'a self, local: &'a str, remote: &'a str) -> Option<&'a str> {
        match self {
            Self::TakeLocal => Some(local),
            Self::TakeRemote => Some(remote),
            Self::Merged { content } => Some(content),
            Self::Unresolved { .. } => None,
        }
    }
}

/// Pure conflict resolver selected by [`ConflictPolicy`]
///
/// Calling [`ConflictResolver::resolve`] has no side effects; identical
/// inputs always give identical output.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
}

impl ConflictResolver {
    /// Create a new conflict resolver
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    /// Policy this resolver applies
    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Resolve a conflict between `local` and `remote`
    ///
    /// `ancestor` is the content both sides agreed on at the last sync, if it
    /// is known.
    pub fn resolve(&self, local: Side<'_>, remote: Side<'_>, ancestor: Option<&str>) -> Resolution {
        let resolution = match self.policy {
            ConflictPolicy::PreferLocal => Resolution::TakeLocal,
            ConflictPolicy::PreferRemote => Resolution::TakeRemote,
            ConflictPolicy::LastWriteWins => Self::resolve_by_timestamp(local, remote),
            ConflictPolicy::Merge => Self::resolve_by_merge(local.content, remote.content, ancestor),
        };

        debug!(
            "Resolved conflict with {} policy: {}",
            self.policy,
            resolution_name(&resolution)
        );
        resolution
    }

    /// Newer side wins; equal timestamps favor local
    pub fn resolve_by_timestamp(local: Side<'_>, remote: Side<'_>) -> Resolution {
        if remote.modified_at > local.modified_at {
            Resolution::TakeRemote
        } else {
            Resolution::TakeLocal
        }
    }

    fn resolve_by_merge(local: &str, remote: &str, ancestor: Option<&str>) -> Resolution {
        if local == remote {
            return Resolution::TakeLocal;
        }

        let outcome = match ancestor {
            Some(ancestor) if ancestor == local => return Resolution::TakeRemote,
            Some(ancestor) if ancestor == remote => return Resolution::TakeLocal,
            Some(ancestor) => merge_three_way(ancestor, local, remote),
            None => whole_document_conflict(local, remote),
        };

        match outcome {
            MergeOutcome::Clean(content) => Resolution::Merged { content },
            MergeOutcome::Conflicted { content, regions } => Resolution::Unresolved {
                content,
                markers: regions,
            },
        }
    }
}

fn resolution_name(resolution: &Resolution) -> &'static str {
    match resolution {
        Resolution::TakeLocal => "take-local",
        Resolution::TakeRemote => "take-remote",
        Resolution::Merged { .. } => "merged",
        Resolution::Unresolved { .. } => "unresolved",
    }
}

/// Type of conflict reported to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictType {
    /// Both sides edited overlapping regions
    ContentOverlap,
    /// Both sides moved the document
    MoveMove,
    /// A local file already sits where a remote document would land
    PathCollision,
    /// One identifier is claimed by several local documents
    DuplicateIdentifier,
}

/// A conflict surfaced in a pass report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Local path concerned
    pub path: String,
    /// Remote identifier concerned, if any
    pub identifier: Option<DocumentId>,
    /// Type of conflict
    pub conflict_type: ConflictType,
    /// What happened, with enough detail to fix it by hand
    pub description: String,
    /// Whether the engine resolved it automatically
    pub resolved: bool,
}

impl ConflictRecord {
    /// Create a new unresolved conflict record
    pub fn new(
        path: impl Into<String>,
        identifier: Option<DocumentId>,
        conflict_type: ConflictType,
        detail: impl AsRef<str>,
    ) -> Self {
        let path = path.into();
        let description = Self::describe(&path, identifier.as_ref(), conflict_type, detail.as_ref());
        Self {
            path,
            identifier,
            conflict_type,
            description,
            resolved: false,
        }
    }

    /// Mark the record as resolved automatically
    pub fn resolved(mut self) -> Self {
        self.resolved = true;
        self
    }

    fn describe(
        path: &str,
        identifier: Option<&DocumentId>,
        conflict_type: ConflictType,
        detail: &str,
    ) -> String {
        let id = identifier.map_or_else(String::new, |id| format!(" ({id})"));
        let summary = match conflict_type {
            ConflictType::ContentOverlap => {
                format!("Document '{path}'{id} was edited on both sides")
            }
            ConflictType::MoveMove => {
                format!("Document '{path}'{id} was moved on both sides")
            }
            ConflictType::PathCollision => {
                format!("A different document already exists at '{path}'{id}")
            }
            ConflictType::DuplicateIdentifier => {
                format!("Identifier{id} is claimed by more than one document including '{path}'")
            }
        };
        if detail.is_empty() {
            summary
        } else {
            format!("{summary}: {detail}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use rstest::rstest;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(seconds)
    }

    #[rstest]
    #[case(ConflictPolicy::PreferLocal, 10, 20, Resolution::TakeLocal)]
    #[case(ConflictPolicy::PreferRemote, 20, 10, Resolution::TakeRemote)]
    #[case(ConflictPolicy::LastWriteWins, 10, 20, Resolution::TakeRemote)]
    #[case(ConflictPolicy::LastWriteWins, 20, 10, Resolution::TakeLocal)]
    #[case(ConflictPolicy::LastWriteWins, 15, 15, Resolution::TakeLocal)]
    fn test_policy_choices(
        #[case] policy: ConflictPolicy,
        #[case] local_at: i64,
        #[case] remote_at: i64,
        #[case] expected: Resolution,
    ) {
        let resolver = ConflictResolver::new(policy);
        let resolution = resolver.resolve(
            Side::new("local\n", at(local_at)),
            Side::new("remote\n", at(remote_at)),
            Some("base\n"),
        );
        assert_eq!(resolution, expected);
    }

    #[test]
    fn test_merge_takes_only_diverged_side() {
        let resolver = ConflictResolver::new(ConflictPolicy::Merge);
        let resolution = resolver.resolve(Side::new("base", at(1)), Side::new("new", at(2)), Some("base"));
        assert_eq!(resolution, Resolution::TakeRemote);

        let resolution = resolver.resolve(Side::new("new", at(1)), Side::new("base", at(2)), Some("base"));
        assert_eq!(resolution, Resolution::TakeLocal);
    }

    #[test]
    fn test_merge_overlap_is_unresolved() {
        let resolver = ConflictResolver::new(ConflictPolicy::Merge);
        let resolution = resolver.resolve(
            Side::new("a\nL\nc\n", at(1)),
            Side::new("a\nR\nc\n", at(2)),
            Some("a\nb\nc\n"),
        );
        let Resolution::Unresolved { content, markers } = resolution else {
            panic!("expected unresolved");
        };
        assert_eq!(markers.len(), 1);
        assert!(content.contains("<<<<<<< LOCAL"));
        assert_eq!(markers[0].describe(), "both sides changed lines 2-2");
    }

    #[test]
    fn test_merge_without_ancestor() {
        let resolver = ConflictResolver::new(ConflictPolicy::Merge);
        assert!(resolver
            .resolve(Side::new("x", at(1)), Side::new("y", at(1)), None)
            .is_unresolved());
        assert_eq!(
            resolver.resolve(Side::new("same", at(1)), Side::new("same", at(2)), None),
            Resolution::TakeLocal
        );
    }

    #[test]
    fn test_resolution_content() {
        assert_eq!(Resolution::TakeLocal.content("l", "r"), Some("l"));
        assert_eq!(Resolution::TakeRemote.content("l", "r"), Some("r"));
        let merged = Resolution::Merged {
            content: "m".into(),
        };
        assert_eq!(merged.content("l", "r"), Some("m"));
    }

    #[test]
    fn test_conflict_record_description() {
        let record = ConflictRecord::new(
            "notes/a.md",
            Some(DocumentId::new("R1")),
            ConflictType::ContentOverlap,
            "both sides changed lines 2-2",
        );
        assert!(!record.resolved);
        assert_eq!(
            record.description,
            "Document 'notes/a.md' (R1) was edited on both sides: both sides changed lines 2-2"
        );
        assert!(record.resolved().resolved);
    }

    proptest! {
        #[test]
        fn resolve_is_idempotent(
            local in "[ab\n]{0,16}",
            remote in "[ac\n]{0,16}",
            ancestor in proptest::option::of("[abc\n]{0,16}"),
            local_at in 0_i64..5,
            remote_at in 0_i64..5,
        ) {
            for policy in [
                ConflictPolicy::LastWriteWins,
                ConflictPolicy::PreferLocal,
                ConflictPolicy::PreferRemote,
                ConflictPolicy::Merge,
            ] {
                let resolver = ConflictResolver::new(policy);
                let l = Side::new(&local, at(local_at));
                let r = Side::new(&remote, at(remote_at));
                prop_assert_eq!(
                    resolver.resolve(l, r, ancestor.as_deref()),
                    resolver.resolve(l, r, ancestor.as_deref())
                );
            }
        }
    }
}
