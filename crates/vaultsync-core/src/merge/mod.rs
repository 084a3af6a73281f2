//! Three-way text merge.
//!
//! Both edits are reduced to per-line change maps against the common
//! ancestor. Overlapping changes that disagree are reported as conflicts;
//! everything else is applied as two sequential patch sets.

mod changes;
mod patch;

use serde::{Deserialize, Serialize};

pub use changes::{ChangeSet, Insertion, LineChange};
pub use patch::{Patch, PatchError};

/// Which edit is applied to the ancestor first. It decides the order of
/// simultaneous end-of-file appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    AFirst,
    BFirst,
}

impl From<bool> for TieBreak {
    fn from(a_first: bool) -> Self {
        if a_first {
            Self::AFirst
        } else {
            Self::BFirst
        }
    }
}

/// One region both edits changed incompatibly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRegion {
    /// 1-based ancestor line number
    pub line: usize,
    /// Ancestor text; `None` when both sides inserted new lines here
    pub base: Option<String>,
    /// Text from edit A; `None` when A deleted the line
    pub ours: Option<String>,
    /// Text from edit B; `None` when B deleted the line
    pub theirs: Option<String>,
}

/// Result of a three-way merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Clean(String),
    Conflict(Vec<ConflictRegion>),
}

impl MergeOutcome {
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Merged text, if the merge was clean
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Clean(text) => Some(text),
            Self::Conflict(_) => None,
        }
    }
}

/// Merge two divergent edits of `base`.
pub fn merge(base: &str, a: &str, b: &str, tie_break: TieBreak) -> MergeOutcome {
    if a == b || b == base {
        return MergeOutcome::Clean(a.to_string());
    }
    if a == base {
        return MergeOutcome::Clean(b.to_string());
    }

    let base_lines: Vec<&str> = base.split('\n').collect();
    // Nothing to anchor either edit to: two different first drafts.
    if base_lines.iter().all(|line| line.is_empty()) {
        return MergeOutcome::Conflict(vec![ConflictRegion {
            line: 1,
            base: None,
            ours: Some(a.to_string()),
            theirs: Some(b.to_string()),
        }]);
    }

    let mut ours = ChangeSet::between(&base_lines, &a.split('\n').collect::<Vec<_>>());
    let mut theirs = ChangeSet::between(&base_lines, &b.split('\n').collect::<Vec<_>>());

    let conflicts = detect_conflicts(&base_lines, &ours, &theirs);
    if !conflicts.is_empty() {
        return MergeOutcome::Conflict(conflicts);
    }
    fold_trailing_newline(&mut ours, &mut theirs);
    fold_trailing_newline(&mut theirs, &mut ours);

    let (first, second) = match tie_break {
        TieBreak::AFirst => (&ours, &theirs),
        TieBreak::BFirst => (&theirs, &ours),
    };
    let first = first.to_patches(&base_lines);
    let second: Vec<Patch> = second
        .to_patches(&base_lines)
        .into_iter()
        .filter(|patch| !first.contains(patch))
        .collect();

    let mut lines: Vec<String> = base_lines.iter().map(|line| (*line).to_string()).collect();
    let applied = patch::apply(&mut lines, &first, &[])
        .and_then(|()| patch::apply(&mut lines, &second, &first));
    match applied {
        Ok(()) => MergeOutcome::Clean(lines.join("\n")),
        Err(err) => {
            tracing::debug!(line = err.line, "merge patch failed to apply");
            MergeOutcome::Conflict(vec![ConflictRegion {
                line: err.line + 1,
                base: base_lines.get(err.line).map(|line| (*line).to_string()),
                ours: None,
                theirs: None,
            }])
        }
    }
}

fn detect_conflicts(base: &[&str], ours: &ChangeSet, theirs: &ChangeSet) -> Vec<ConflictRegion> {
    let mut conflicts = Vec::new();

    for (&line, mine) in &ours.replaced {
        let Some(other) = theirs.replaced.get(&line) else {
            continue;
        };
        let compatible = match (mine, other) {
            (LineChange::Deleted, LineChange::Deleted) => true,
            (LineChange::Modified { text: left }, LineChange::Modified { text: right }) => {
                left == right
            }
            _ => false,
        };
        if !compatible {
            conflicts.push(ConflictRegion {
                line: line + 1,
                base: Some(base[line].to_string()),
                ours: changed_text(mine),
                theirs: changed_text(other),
            });
        }
    }

    for (&at, mine) in &ours.inserted {
        let Some(other) = theirs.inserted.get(&at) else {
            continue;
        };
        if mine.text == other.text || (mine.at_eof && other.at_eof) {
            continue;
        }
        conflicts.push(ConflictRegion {
            line: at + 1,
            base: None,
            ours: Some(mine.text.clone()),
            theirs: Some(other.text.clone()),
        });
    }

    conflicts.sort_by_key(|region| region.line);
    conflicts
}

/// A side that only added a final line break where the other side appended
/// lines is folded into that append, so the result ends with one line break
/// whichever side goes first.
fn fold_trailing_newline(bare: &mut ChangeSet, other: &mut ChangeSet) {
    let points: Vec<usize> = bare
        .inserted
        .iter()
        .filter(|(_, insertion)| insertion.at_eof && insertion.text.is_empty())
        .map(|(&at, _)| at)
        .collect();
    for at in points {
        let Some(append) = other
            .inserted
            .get_mut(&at)
            .filter(|insertion| insertion.at_eof && !insertion.text.is_empty())
        else {
            continue;
        };
        if !append.text.ends_with('\n') {
            append.text.push('\n');
        }
        bare.inserted.remove(&at);
    }
}

fn changed_text(change: &LineChange) -> Option<String> {
    match change {
        LineChange::Modified { text } => Some(text.clone()),
        LineChange::Deleted => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn clean(outcome: MergeOutcome) -> String {
        match outcome {
            MergeOutcome::Clean(text) => text,
            MergeOutcome::Conflict(regions) => panic!("unexpected conflict: {regions:?}"),
        }
    }

    #[test]
    fn test_modify_and_append_merge() {
        let merged = merge("A\nB\nC", "A\nB2\nC", "A\nB\nC\nD", TieBreak::AFirst);
        assert_eq!(clean(merged), "A\nB2\nC\nD");
    }

    #[test]
    fn test_same_line_modified_differently_conflicts() {
        let merged = merge("A\nB\nC", "A\nB2\nC", "A\nB3\nC", TieBreak::AFirst);
        assert_eq!(
            merged,
            MergeOutcome::Conflict(vec![ConflictRegion {
                line: 2,
                base: Some("B".to_string()),
                ours: Some("B2".to_string()),
                theirs: Some("B3".to_string()),
            }])
        );
    }

    #[test]
    fn test_identical_edits() {
        for text in ["", "x", "A\nB", "A\n\nB\n"] {
            assert_eq!(clean(merge("base", text, text, TieBreak::AFirst)), text);
            assert_eq!(clean(merge("base", text, text, TieBreak::BFirst)), text);
        }
    }

    #[test]
    fn test_one_side_unchanged() {
        assert_eq!(clean(merge("A\nB", "A\nB", "X\nY\nZ", TieBreak::AFirst)), "X\nY\nZ");
        assert_eq!(clean(merge("A\nB", "X", "A\nB", TieBreak::BFirst)), "X");
    }

    #[test]
    fn test_disjoint_edits_commute() {
        let base = "one\ntwo\nthree\nfour\nfive";
        let a = "ONE\ntwo\nthree\nfour\nfive";
        let b = "one\ntwo\nthree\nfour\nFIVE\nsix";
        let forward = clean(merge(base, a, b, true.into()));
        let backward = clean(merge(base, a, b, false.into()));
        assert_eq!(forward, "ONE\ntwo\nthree\nfour\nFIVE\nsix");
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_both_delete_same_line() {
        let merged = merge("A\nB\nC\nD", "A\nC\nD", "A\nC\nD2", TieBreak::AFirst);
        assert_eq!(clean(merged), "A\nC\nD2");
    }

    #[test]
    fn test_delete_versus_modify_conflicts() {
        let merged = merge("A\nB\nC", "A\nC", "A\nB2\nC", TieBreak::AFirst);
        let MergeOutcome::Conflict(regions) = merged else {
            panic!("expected conflict");
        };
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].line, 2);
        assert_eq!(regions[0].ours, None);
        assert_eq!(regions[0].theirs.as_deref(), Some("B2"));
    }

    #[test]
    fn test_deletion_is_not_resurrected() {
        let merged = merge("A\nB\nC\nD", "A\nC\nD", "A\nB\nC\nD\nE", TieBreak::BFirst);
        assert_eq!(clean(merged), "A\nC\nD\nE");
    }

    #[test]
    fn test_simultaneous_appends_keep_both() {
        let base = "title\nbody";
        let a = "title\nbody\nfrom laptop";
        let b = "title\nbody\nfrom phone";
        assert_eq!(
            clean(merge(base, a, b, TieBreak::AFirst)),
            "title\nbody\nfrom laptop\nfrom phone"
        );
        assert_eq!(
            clean(merge(base, a, b, TieBreak::BFirst)),
            "title\nbody\nfrom phone\nfrom laptop"
        );
    }

    #[test]
    fn test_simultaneous_appends_with_trailing_newline() {
        let merged = merge("a\nb\n", "a\nb\nc\n", "a\nb\nd\n", TieBreak::AFirst);
        assert_eq!(clean(merged), "a\nb\nc\nd\n");
    }

    #[test]
    fn test_empty_base_with_trailing_newlines_conflicts() {
        for tie_break in [TieBreak::AFirst, TieBreak::BFirst] {
            let merged = merge("", "x\n", "y\n", tie_break);
            let MergeOutcome::Conflict(regions) = merged else {
                panic!("expected conflict, got {merged:?}");
            };
            assert_eq!(regions[0].line, 1);
            assert_eq!(regions[0].ours.as_deref(), Some("x\n"));
            assert!(merge("", "x", "y\n", tie_break).is_conflict());
            assert!(merge("\n", "x\n", "\ny\n", tie_break).is_conflict());
        }
    }

    #[test]
    fn test_empty_base_with_one_populated_side_is_clean() {
        assert_eq!(clean(merge("", "", "draft\n", TieBreak::AFirst)), "draft\n");
    }

    #[test]
    fn test_trailing_newline_and_append_commute() {
        let base = "a\nb";
        let a = "a\nb\n";
        let b = "a\nb\nc";
        let forward = clean(merge(base, a, b, TieBreak::AFirst));
        let backward = clean(merge(base, a, b, TieBreak::BFirst));
        assert_eq!(forward, "a\nb\nc\n");
        assert_eq!(forward, backward);
        assert_eq!(clean(merge(base, b, a, TieBreak::AFirst)), "a\nb\nc\n");
    }

    #[test]
    fn test_conflicting_insertions_mid_file() {
        let merged = merge("A\nC", "A\nB1\nC", "A\nB2\nC", TieBreak::AFirst);
        let MergeOutcome::Conflict(regions) = merged else {
            panic!("expected conflict");
        };
        assert_eq!(regions[0].line, 2);
        assert_eq!(regions[0].base, None);
    }

    #[test]
    fn test_empty_base_with_different_content_conflicts() {
        assert!(merge("", "first draft", "other draft", TieBreak::AFirst).is_conflict());
    }

    #[test]
    fn test_insertion_inside_deleted_block() {
        let base = "keep\nx\ny\nz\nend";
        let a = "keep\nend";
        let b = "keep\nx\nnew\ny\nz\nend";
        let forward = clean(merge(base, a, b, TieBreak::AFirst));
        let backward = clean(merge(base, a, b, TieBreak::BFirst));
        assert_eq!(forward, "keep\nnew\nend");
        assert_eq!(forward, backward);
    }
}
