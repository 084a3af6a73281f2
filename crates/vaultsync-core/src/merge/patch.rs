//! Line patches computed against the ancestor and applied to drifted text.

use thiserror::Error;

/// How far from the expected position a patch may be relocated.
const SEARCH_WINDOW: usize = 8;

/// Replace `removed` at ancestor line `old_start` with `added`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub old_start: usize,
    pub removed: Vec<String>,
    pub added: Vec<String>,
}

/// The target text no longer contains what a patch expects to replace.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("patch for ancestor line {line} could not be located")]
pub struct PatchError {
    pub line: usize,
}

impl Patch {
    pub fn insert(at: usize, text: &str) -> Self {
        Self {
            old_start: at,
            removed: Vec::new(),
            added: text.split('\n').map(str::to_string).collect(),
        }
    }

    pub fn replace(line: usize, old: &str, new: Option<&str>) -> Self {
        Self {
            old_start: line,
            removed: vec![old.to_string()],
            added: new
                .map(|text| text.split('\n').map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }

    fn old_end(&self) -> usize {
        self.old_start + self.removed.len()
    }

    #[allow(clippy::cast_possible_wrap)]
    fn delta(&self) -> isize {
        self.added.len() as isize - self.removed.len() as isize
    }
}

/// Apply `patches` (sorted by ancestor position) to `lines`, which already
/// carries the effect of `applied`. Fails without modifying `lines` if any
/// patch cannot be located.
pub fn apply(lines: &mut Vec<String>, patches: &[Patch], applied: &[Patch]) -> Result<(), PatchError> {
    let mut working = lines.clone();
    let mut running: isize = 0;

    for patch in patches {
        let shift: isize = applied
            .iter()
            .filter(|prior| prior.old_end() <= patch.old_start)
            .map(Patch::delta)
            .sum();
        let expected = patch
            .old_start
            .checked_add_signed(shift + running)
            .ok_or(PatchError {
                line: patch.old_start,
            })?;
        let at = locate(&working, patch, expected).ok_or(PatchError {
            line: patch.old_start,
        })?;
        working.splice(at..at + patch.removed.len(), patch.added.iter().cloned());
        running += patch.delta();
    }

    *lines = working;
    Ok(())
}

fn locate(lines: &[String], patch: &Patch, expected: usize) -> Option<usize> {
    if patch.removed.is_empty() {
        return (expected <= lines.len()).then_some(expected);
    }
    let matches_at = |at: usize| {
        lines
            .get(at..at + patch.removed.len())
            .is_some_and(|window| window == patch.removed.as_slice())
    };
    if matches_at(expected) {
        return Some(expected);
    }
    (1..=SEARCH_WINDOW).find_map(|distance| {
        expected
            .checked_sub(distance)
            .filter(|&at| matches_at(at))
            .or_else(|| Some(expected + distance).filter(|&at| matches_at(at)))
    })
}
