//! Line-based three-way merge
//!
//! Both sides are diffed against the common ancestor. Changes that touch
//! disjoint ancestor regions are combined; changes whose regions overlap are
//! combined only when both sides made the identical change, otherwise the
//! region is emitted between conflict markers.

use serde::{Deserialize, Serialize};

/// Opens the local section of a conflict
pub const MARKER_LOCAL: &str = "<<<<<<< LOCAL";
/// Separates the local and remote sections of a conflict
pub const MARKER_SEPARATOR: &str = "=======";
/// Closes the remote section of a conflict
pub const MARKER_REMOTE: &str = ">>>>>>> REMOTE";

/// Above this many LCS cells a changed middle is treated as one replacement
const MAX_LCS_CELLS: usize = 4_000_000;

/// One ancestor region both sides changed differently
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRegion {
    /// First ancestor line of the region, 0-based
    pub ancestor_start: usize,
    /// One past the last ancestor line of the region
    pub ancestor_end: usize,
    /// Ancestor text of the region
    pub ancestor: String,
    /// Local text replacing the region
    pub local: String,
    /// Remote text replacing the region
    pub remote: String,
}

impl ConflictRegion {
    /// Human readable description, 1-based line numbers
    pub fn describe(&self) -> String {
        if self.ancestor_start == self.ancestor_end {
            format!("both sides inserted text after line {}", self.ancestor_start)
        } else {
            format!(
                "both sides changed lines {}-{}",
                self.ancestor_start + 1,
                self.ancestor_end
            )
        }
    }
}

/// Result of a three-way merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Every change was combined
    Clean(String),
    /// At least one region conflicts; `content` carries conflict markers
    Conflicted {
        /// Merged text with conflict markers around each region
        content: String,
        /// The conflicting regions, in document order
        regions: Vec<ConflictRegion>,
    },
}

impl MergeOutcome {
    /// Whether the merge produced conflict markers
    pub fn is_conflicted(&self) -> bool {
        matches!(self, Self::Conflicted { .. })
    }
}

/// Replacement of `base[start..end]` by `lines`
#[derive(Debug, Clone, PartialEq, Eq)]
struct Hunk<'a> {
    start: usize,
    end: usize,
    lines: Vec<&'a str>,
}

fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Hunks turning `base` into `other`, sorted and separated by unchanged lines
fn diff_hunks<'a>(base: &[&'a str], other: &[&'a str]) -> Vec<Hunk<'a>> {
    let prefix = base
        .iter()
        .zip(other)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = base[prefix..]
        .iter()
        .rev()
        .zip(other[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let b = &base[prefix..base.len() - suffix];
    let o = &other[prefix..other.len() - suffix];

    if b.is_empty() && o.is_empty() {
        return Vec::new();
    }
    if b.is_empty() || o.is_empty() || (b.len() + 1) * (o.len() + 1) > MAX_LCS_CELLS {
        return vec![Hunk {
            start: prefix,
            end: prefix + b.len(),
            lines: o.to_vec(),
        }];
    }

    // lcs[i * width + j] = length of the LCS of b[i..] and o[j..]
    let width = o.len() + 1;
    let mut lcs = vec![0_u32; (b.len() + 1) * width];
    for i in (0..b.len()).rev() {
        for j in (0..o.len()).rev() {
            lcs[i * width + j] = if b[i] == o[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let mut hunks = Vec::new();
    let mut pending: Option<Hunk<'a>> = None;
    let (mut i, mut j) = (0, 0);

    while i < b.len() || j < o.len() {
        if i < b.len() && j < o.len() && b[i] == o[j] {
            hunks.extend(pending.take());
            i += 1;
            j += 1;
            continue;
        }

        let hunk = pending.get_or_insert_with(|| Hunk {
            start: prefix + i,
            end: prefix + i,
            lines: Vec::new(),
        });

        let delete = j >= o.len()
            || (i < b.len() && lcs[(i + 1) * width + j] >= lcs[i * width + j + 1]);
        if delete {
            i += 1;
            hunk.end = prefix + i;
        } else {
            hunk.lines.push(o[j]);
            j += 1;
        }
    }
    hunks.extend(pending);

    hunks
}

/// Apply the hunks lying in `base[start..end]` to that slice
fn apply_in_region(base: &[&str], start: usize, end: usize, hunks: &[Hunk<'_>]) -> String {
    let mut out = String::new();
    let mut pos = start;
    for hunk in hunks {
        out.extend(base[pos..hunk.start].iter().copied());
        out.extend(hunk.lines.iter().copied());
        pos = hunk.end;
    }
    out.extend(base[pos..end].iter().copied());
    out
}

fn push_block(out: &mut String, text: &str) {
    out.push_str(text);
    if !text.is_empty() && !text.ends_with('\n') {
        out.push('\n');
    }
}

fn overlaps(region_start: usize, region_end: usize, hunk: &Hunk<'_>) -> bool {
    hunk.start < region_end || hunk.start == region_start
}

/// Three-way merge of `local` and `remote` against `ancestor`
pub fn merge_three_way(ancestor: &str, local: &str, remote: &str) -> MergeOutcome {
    let base = split_lines(ancestor);
    let local_lines = split_lines(local);
    let remote_lines = split_lines(remote);

    let local_hunks = diff_hunks(&base, &local_lines);
    let remote_hunks = diff_hunks(&base, &remote_lines);

    let mut out = String::new();
    let mut regions = Vec::new();
    let mut pos = 0;
    let (mut li, mut ri) = (0, 0);

    loop {
        let take_local = match (local_hunks.get(li), remote_hunks.get(ri)) {
            (None, None) => break,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(l), Some(r)) => l.start <= r.start,
        };

        let first = if take_local {
            &local_hunks[li]
        } else {
            &remote_hunks[ri]
        };
        let region_start = first.start;
        let mut region_end = first.end;
        let (local_from, remote_from) = (li, ri);
        if take_local {
            li += 1;
        } else {
            ri += 1;
        }

        loop {
            if let Some(hunk) = local_hunks
                .get(li)
                .filter(|h| overlaps(region_start, region_end, h))
            {
                region_end = region_end.max(hunk.end);
                li += 1;
            } else if let Some(hunk) = remote_hunks
                .get(ri)
                .filter(|h| overlaps(region_start, region_end, h))
            {
                region_end = region_end.max(hunk.end);
                ri += 1;
            } else {
                break;
            }
        }

        out.extend(base[pos..region_start].iter().copied());
        pos = region_end;

        let local_part = &local_hunks[local_from..li];
        let remote_part = &remote_hunks[remote_from..ri];

        if remote_part.is_empty() {
            out.push_str(&apply_in_region(&base, region_start, region_end, local_part));
            continue;
        }
        if local_part.is_empty() {
            out.push_str(&apply_in_region(&base, region_start, region_end, remote_part));
            continue;
        }

        let local_text = apply_in_region(&base, region_start, region_end, local_part);
        let remote_text = apply_in_region(&base, region_start, region_end, remote_part);
        if local_text == remote_text {
            out.push_str(&local_text);
            continue;
        }

        out.push_str(MARKER_LOCAL);
        out.push('\n');
        push_block(&mut out, &local_text);
        out.push_str(MARKER_SEPARATOR);
        out.push('\n');
        push_block(&mut out, &remote_text);
        out.push_str(MARKER_REMOTE);
        out.push('\n');

        regions.push(ConflictRegion {
            ancestor_start: region_start,
            ancestor_end: region_end,
            ancestor: base[region_start..region_end].concat(),
            local: local_text,
            remote: remote_text,
        });
    }

    out.extend(base[pos..].iter().copied());

    if regions.is_empty() {
        MergeOutcome::Clean(out)
    } else {
        MergeOutcome::Conflicted {
            content: out,
            regions,
        }
    }
}

/// Whole-document conflict, used when no trusted ancestor exists
pub fn whole_document_conflict(local: &str, remote: &str) -> MergeOutcome {
    let mut content = String::new();
    content.push_str(MARKER_LOCAL);
    content.push('\n');
    push_block(&mut content, local);
    content.push_str(MARKER_SEPARATOR);
    content.push('\n');
    push_block(&mut content, remote);
    content.push_str(MARKER_REMOTE);
    content.push('\n');

    MergeOutcome::Conflicted {
        content,
        regions: vec![ConflictRegion {
            ancestor_start: 0,
            ancestor_end: 0,
            ancestor: String::new(),
            local: local.to_string(),
            remote: remote.to_string(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn numbered(count: usize) -> Vec<String> {
        (1..=count).map(|i| format!("line {i}\n")).collect()
    }

    fn edit(lines: &[String], range: std::ops::RangeInclusive<usize>, tag: &str) -> String {
        lines
            .iter()
            .enumerate()
            .map(|(index, line)| {
                if range.contains(&(index + 1)) {
                    format!("{tag} {index}\n")
                } else {
                    line.clone()
                }
            })
            .collect()
    }

    #[test]
    fn test_disjoint_edits_merge_cleanly() {
        let lines = numbered(30);
        let ancestor: String = lines.concat();
        let local = edit(&lines, 1..=5, "local");
        let remote = edit(&lines, 20..=25, "remote");

        let MergeOutcome::Clean(merged) = merge_three_way(&ancestor, &local, &remote) else {
            panic!("expected a clean merge");
        };
        assert!(merged.contains("local 0\n"));
        assert!(merged.contains("remote 24\n"));
        assert!(!merged.contains(MARKER_LOCAL));
        assert_eq!(merged.lines().count(), 30);
    }

    #[test]
    fn test_same_line_conflicts() {
        let ancestor = "a\nb\nc\n";
        let outcome = merge_three_way(ancestor, "a\nB-local\nc\n", "a\nB-remote\nc\n");

        let MergeOutcome::Conflicted { content, regions } = outcome else {
            panic!("expected a conflict");
        };
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].ancestor_start, 1);
        assert_eq!(regions[0].ancestor_end, 2);
        assert_eq!(regions[0].ancestor, "b\n");
        assert_eq!(regions[0].describe(), "both sides changed lines 2-2");
        assert_eq!(
            content,
            "a\n<<<<<<< LOCAL\nB-local\n=======\nB-remote\n>>>>>>> REMOTE\nc\n"
        );
    }

    #[test]
    fn test_identical_changes_are_not_conflicts() {
        let outcome = merge_three_way("a\nb\n", "a\nB\n", "a\nB\n");
        assert_eq!(outcome, MergeOutcome::Clean("a\nB\n".into()));
    }

    #[test]
    fn test_insertions_at_same_point_conflict() {
        let outcome = merge_three_way("a\nb\n", "a\nx\nb\n", "a\ny\nb\n");
        assert!(outcome.is_conflicted());
    }

    #[test]
    fn test_insert_and_delete_elsewhere() {
        let outcome = merge_three_way("a\nb\nc\nd\n", "top\na\nb\nc\nd\n", "a\nb\nc\n");
        assert_eq!(outcome, MergeOutcome::Clean("top\na\nb\nc\n".into()));
    }

    #[test]
    fn test_missing_trailing_newline() {
        let outcome = merge_three_way("a\nb", "a\nlocal", "a\nremote");
        let MergeOutcome::Conflicted { content, .. } = outcome else {
            panic!("expected a conflict");
        };
        assert_eq!(
            content,
            "a\n<<<<<<< LOCAL\nlocal\n=======\nremote\n>>>>>>> REMOTE\n"
        );
    }

    #[test]
    fn test_whole_document_conflict() {
        let MergeOutcome::Conflicted { content, regions } = whole_document_conflict("l", "r\n")
        else {
            panic!("expected a conflict");
        };
        assert_eq!(content, "<<<<<<< LOCAL\nl\n=======\nr\n>>>>>>> REMOTE\n");
        assert_eq!(regions.len(), 1);
    }

    proptest! {
        #[test]
        fn one_sided_change_is_taken(base in "[abc\n]{0,40}", changed in "[abcd\n]{0,40}") {
            prop_assert_eq!(merge_three_way(&base, &changed, &base), MergeOutcome::Clean(changed.clone()));
            prop_assert_eq!(merge_three_way(&base, &base, &changed), MergeOutcome::Clean(changed));
        }

        #[test]
        fn disjoint_edits_keep_both(
            count in 12_usize..40,
            local_at in 0_usize..4,
            remote_offset in 6_usize..8,
        ) {
            let lines = numbered(count);
            let ancestor = lines.concat();
            let local_line = local_at + 1;
            let remote_line = local_line + remote_offset;
            let local = edit(&lines, local_line..=local_line, "L");
            let remote = edit(&lines, remote_line..=remote_line, "R");

            match merge_three_way(&ancestor, &local, &remote) {
                MergeOutcome::Clean(merged) => {
                    let local_tag = format!("L {local_at}\n");
                    let remote_tag = format!("R {}\n", remote_line - 1);
                    prop_assert!(merged.contains(&local_tag));
                    prop_assert!(merged.contains(&remote_tag));
                }
                MergeOutcome::Conflicted { .. } => prop_assert!(false, "unexpected conflict"),
            }
        }

        #[test]
        fn merge_is_deterministic(a in "[ab\n]{0,20}", l in "[abc\n]{0,20}", r in "[abd\n]{0,20}") {
            prop_assert_eq!(merge_three_way(&a, &l, &r), merge_three_way(&a, &l, &r));
        }
    }
}
