//! Line-level change maps derived from a diff against the common ancestor.

use std::collections::BTreeMap;
use std::ops::Range;

use similar::{capture_diff_slices, Algorithm, DiffTag};

use super::patch::Patch;

/// What one side did to a single ancestor line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineChange {
    /// The line was replaced; `text` may span several lines when the edit grew.
    Modified { text: String },
    /// The line was removed.
    Deleted,
}

/// New lines inserted in front of an ancestor position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insertion {
    pub text: String,
    /// The insertion lands after the last non-empty ancestor line
    pub at_eof: bool,
}

/// All changes one side made relative to the ancestor, keyed by ancestor line index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub replaced: BTreeMap<usize, LineChange>,
    pub inserted: BTreeMap<usize, Insertion>,
}

impl ChangeSet {
    /// Diff `base` against `edited` and classify every affected ancestor line.
    ///
    /// Deletions are kept as first-class entries; dropping them would let a
    /// merge resurrect text one side removed.
    pub fn between(base: &[&str], edited: &[&str]) -> Self {
        let eof_start = base
            .iter()
            .rposition(|line| !line.is_empty())
            .map_or(0, |idx| idx + 1);

        let mut changes = Self::default();
        for (old, new) in hunks(base, edited) {
            let added = &edited[new];
            if old.is_empty() {
                changes.inserted.insert(
                    old.start,
                    Insertion {
                        text: added.join("\n"),
                        at_eof: old.start >= eof_start,
                    },
                );
                continue;
            }

            let old_len = old.len();
            for (offset, line) in old.enumerate() {
                let change = if offset + 1 == old_len && added.len() > old_len {
                    LineChange::Modified {
                        text: added[offset..].join("\n"),
                    }
                } else if let Some(text) = added.get(offset) {
                    LineChange::Modified {
                        text: (*text).to_string(),
                    }
                } else {
                    LineChange::Deleted
                };
                changes.replaced.insert(line, change);
            }
        }
        changes
    }

    pub fn is_empty(&self) -> bool {
        self.replaced.is_empty() && self.inserted.is_empty()
    }

    /// One patch per changed ancestor line or insertion point, in ancestor order.
    pub fn to_patches(&self, base: &[&str]) -> Vec<Patch> {
        let mut patches: Vec<Patch> = self
            .inserted
            .iter()
            .map(|(&at, insertion)| Patch::insert(at, &insertion.text))
            .chain(self.replaced.iter().map(|(&line, change)| match change {
                LineChange::Modified { text } => Patch::replace(line, base[line], Some(text)),
                LineChange::Deleted => Patch::replace(line, base[line], None),
            }))
            .collect();
        patches.sort_by_key(|patch| (patch.old_start, patch.removed.len()));
        patches
    }
}

/// Contiguous non-equal regions of the diff, as (ancestor range, edited range).
fn hunks(base: &[&str], edited: &[&str]) -> Vec<(Range<usize>, Range<usize>)> {
    let mut hunks: Vec<(Range<usize>, Range<usize>)> = Vec::new();
    for op in capture_diff_slices(Algorithm::Myers, base, edited) {
        let (tag, old, new) = op.as_tag_tuple();
        if tag == DiffTag::Equal {
            continue;
        }
        match hunks.last_mut() {
            Some((last_old, last_new)) if last_old.end == old.start && last_new.end == new.start => {
                last_old.end = old.end;
                last_new.end = new.end;
            }
            _ => hunks.push((old, new)),
        }
    }
    hunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lines(text: &str) -> Vec<&str> {
        text.split('\n').collect()
    }

    #[test]
    fn test_modified_line() {
        let base = lines("A\nB\nC");
        let changes = ChangeSet::between(&base, &lines("A\nB2\nC"));
        assert_eq!(
            changes.replaced.get(&1),
            Some(&LineChange::Modified {
                text: "B2".to_string()
            })
        );
        assert!(changes.inserted.is_empty());
    }

    #[test]
    fn test_deleted_line_is_retained() {
        let base = lines("A\nB\nC");
        let changes = ChangeSet::between(&base, &lines("A\nC"));
        assert_eq!(changes.replaced.get(&1), Some(&LineChange::Deleted));
        assert_eq!(changes.replaced.len(), 1);
    }

    #[test]
    fn test_append_is_eof_insertion() {
        let base = lines("A\nB\nC");
        let changes = ChangeSet::between(&base, &lines("A\nB\nC\nD"));
        assert_eq!(
            changes.inserted.get(&3),
            Some(&Insertion {
                text: "D".to_string(),
                at_eof: true
            })
        );
    }

    #[test]
    fn test_append_before_trailing_newline_is_eof() {
        let base = lines("A\nB\n");
        let changes = ChangeSet::between(&base, &lines("A\nB\nC\n"));
        let (_, insertion) = changes.inserted.iter().next().unwrap();
        assert!(insertion.at_eof);
    }

    #[test]
    fn test_growing_replacement_folds_into_last_line() {
        let base = lines("A\nB\nC");
        let changes = ChangeSet::between(&base, &lines("A\nX\nY\nZ\nC"));
        assert_eq!(
            changes.replaced.get(&1),
            Some(&LineChange::Modified {
                text: "X\nY\nZ".to_string()
            })
        );
    }

    #[test]
    fn test_patches_follow_ancestor_order() {
        let base = lines("A\nB\nC");
        let changes = ChangeSet::between(&base, &lines("Z\nA\nC"));
        let patches = changes.to_patches(&base);
        let starts: Vec<usize> = patches.iter().map(|patch| patch.old_start).collect();
        assert_eq!(starts, vec![0, 1]);
    }
}
