//! Capturing note versions into history.

use similar::TextDiff;

use crate::error::Result;
use crate::models::{HistoryId, NoteHistory, NoteId};
use crate::services::Store;

/// Turns a note's current content into an immutable history row.
#[derive(Clone)]
pub struct Snapshotter {
    store: Store,
}

impl Snapshotter {
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// Capture the note's current content if it changed since the last capture.
    ///
    /// Safe to call repeatedly: once a version is captured, later calls are no-ops.
    pub async fn capture(&self, note_id: &NoteId) -> Result<Option<NoteHistory>> {
        let Some(note) = self.store.get_note(note_id).await? else {
            return Ok(None);
        };
        if note.version <= note.snapshot_version {
            return Ok(None);
        }
        if note.content_hash == note.snapshot_hash && note.content == note.snapshot_content {
            self.store.record_snapshot(&note, None).await?;
            return Ok(None);
        }

        let history = NoteHistory {
            id: HistoryId::new(),
            note_id: note.id,
            vault_id: note.vault_id,
            path: note.path.clone(),
            content: note.content.clone(),
            content_hash: note.content_hash.clone(),
            diff_patch: unified_patch(&note.snapshot_content, &note.content),
            client_name: note.client_name.clone(),
            version: note.version,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        self.store.record_snapshot(&note, Some(&history)).await?;
        tracing::debug!(note_id = %note.id, version = note.version, "Captured history version");
        Ok(Some(history))
    }
}

/// Unified diff between two captured versions
pub fn unified_patch(previous: &str, current: &str) -> String {
    TextDiff::from_lines(previous, current)
        .unified_diff()
        .context_radius(3)
        .header("previous", "current")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::CursorClock;
    use crate::db::Database;
    use crate::models::{EntityAction, NoteWrite};

    async fn store() -> Store {
        let db = Database::open_in_memory().await.unwrap();
        Store::with_clock(db, CursorClock::logical(0)).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_capture_records_version_once() {
        let store = store().await;
        let vault = store.vault("alice", "notes").await.unwrap();
        let write = NoteWrite::new("a.md", "line one\n", "laptop", 0, 0).unwrap();
        let note = store.create_note(&vault.id, &write).await.unwrap();
        let snapshotter = Snapshotter::new(store.clone());

        let history = snapshotter.capture(&note.id).await.unwrap().unwrap();
        assert_eq!(history.version, 1);
        assert_eq!(history.content, "line one\n");
        assert!(history.diff_patch.contains("+line one"));

        assert!(snapshotter.capture(&note.id).await.unwrap().is_none());
        let note = store.get_note(&note.id).await.unwrap().unwrap();
        assert_eq!(note.snapshot_version, 1);
        assert_eq!(note.snapshot_content, "line one\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_capture_skips_content_that_returned_to_snapshot() {
        let store = store().await;
        let vault = store.vault("alice", "notes").await.unwrap();
        let note = store
            .create_note(&vault.id, &NoteWrite::new("a.md", "A", "laptop", 0, 0).unwrap())
            .await
            .unwrap();
        let snapshotter = Snapshotter::new(store.clone());
        snapshotter.capture(&note.id).await.unwrap();

        let b = NoteWrite::new("a.md", "B", "laptop", 0, 1).unwrap();
        let a = NoteWrite::new("a.md", "A", "laptop", 0, 2).unwrap();
        store.update_note_content(&note.id, 1, &b, EntityAction::Modify).await.unwrap();
        store.update_note_content(&note.id, 2, &a, EntityAction::Modify).await.unwrap();

        assert!(snapshotter.capture(&note.id).await.unwrap().is_none());
        let note = store.get_note(&note.id).await.unwrap().unwrap();
        assert!(!note.needs_snapshot());
        assert_eq!(store.list_history(&note.id, 10, 0).await.unwrap().len(), 1);
    }

    #[test]
    fn test_unified_patch() {
        let patch = unified_patch("a\nb\n", "a\nc\n");
        assert!(patch.contains("-b"));
        assert!(patch.contains("+c"));
    }
}
