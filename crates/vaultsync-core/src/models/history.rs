//! Note history model

use serde::{Deserialize, Serialize};

use super::{HistoryId, NoteId, VaultId};

/// An immutable captured version of a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteHistory {
    pub id: HistoryId,
    pub note_id: NoteId,
    pub vault_id: VaultId,
    /// Path at capture time
    pub path: String,
    pub content: String,
    pub content_hash: String,
    /// Unified diff from the previously captured version
    pub diff_patch: String,
    pub client_name: String,
    /// Note version this row captured
    pub version: i64,
    pub created_at: i64,
}
