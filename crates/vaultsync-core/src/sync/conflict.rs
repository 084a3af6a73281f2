//! Naming for conflict copies of notes that could not be merged.

use chrono::{DateTime, Utc};

/// Path for a conflict copy of `path` made at `now`.
///
/// `notes/today.md` becomes `notes/today.conflict.20240102030405.md`. The
/// `attempt` counter disambiguates copies made within the same second.
pub fn conflict_path(path: &str, now: DateTime<Utc>, attempt: usize) -> String {
    let (dir, file) = match path.rfind('/') {
        Some(split) => path.split_at(split + 1),
        None => ("", path),
    };
    let (stem, ext) = match file.rfind('.') {
        Some(dot) if dot > 0 => file.split_at(dot),
        _ => (file, ""),
    };
    let stamp = now.format("%Y%m%d%H%M%S");
    if attempt == 0 {
        format!("{dir}{stem}.conflict.{stamp}{ext}")
    } else {
        format!("{dir}{stem}.conflict.{stamp}-{attempt}{ext}")
    }
}
