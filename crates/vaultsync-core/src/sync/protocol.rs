//! Wire messages exchanged with connected clients.
//!
//! Every frame is `{"type": "<Kind>", "data": {...}}` with camelCase fields.

use serde::{Deserialize, Serialize};

use crate::fingerprint::path_fingerprint;
use crate::merge::ConflictRegion;
use crate::models::{Folder, HistoryId, Note, NoteHistory};

/// A path and its fingerprint as reported by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRef {
    pub path: String,
    #[serde(default)]
    pub path_hash: String,
}

impl PathRef {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            path_hash: path_fingerprint(&path),
            path,
        }
    }

    /// The client-supplied fingerprint, or one computed from the path.
    pub fn resolved_hash(&self) -> String {
        if self.path_hash.is_empty() {
            path_fingerprint(&self.path)
        } else {
            self.path_hash.clone()
        }
    }
}

/// A note as the client currently holds it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteFingerprint {
    pub path: String,
    #[serde(default)]
    pub path_hash: String,
    pub content_hash: String,
    #[serde(default)]
    pub mtime: i64,
}

impl NoteFingerprint {
    pub fn resolved_hash(&self) -> String {
        if self.path_hash.is_empty() {
            path_fingerprint(&self.path)
        } else {
            self.path_hash.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FolderSyncRequest {
    pub vault: String,
    pub last_cursor: i64,
    pub folders: Vec<PathRef>,
    pub deleted_folders: Vec<PathRef>,
    pub missing_folders: Vec<PathRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NoteSyncRequest {
    pub vault: String,
    pub last_cursor: i64,
    pub notes: Vec<NoteFingerprint>,
    pub deleted_notes: Vec<PathRef>,
    pub missing_notes: Vec<PathRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderModifyRequest {
    pub path: String,
    #[serde(default)]
    pub ctime: i64,
    #[serde(default)]
    pub mtime: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderRenameRequest {
    pub path: String,
    pub old_path: String,
    #[serde(default)]
    pub old_path_hash: String,
    #[serde(default)]
    pub ctime: i64,
    #[serde(default)]
    pub mtime: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteModifyRequest {
    pub path: String,
    #[serde(default)]
    pub path_hash: String,
    pub content: String,
    #[serde(default)]
    pub content_hash: String,
    #[serde(default)]
    pub ctime: i64,
    #[serde(default)]
    pub mtime: i64,
    /// Server version the edit was based on
    #[serde(default)]
    pub base_version: Option<i64>,
    /// Fingerprint of the content the edit was based on
    #[serde(default)]
    pub base_content_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteRenameRequest {
    pub path: String,
    pub old_path: String,
    #[serde(default)]
    pub old_path_hash: String,
    /// New content, when the rename also carries an edit
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub ctime: i64,
    #[serde(default)]
    pub mtime: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryListRequest {
    pub path: String,
    #[serde(default)]
    pub path_hash: String,
    #[serde(default = "default_history_page")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

const fn default_history_page() -> usize {
    20
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRestoreRequest {
    pub history_id: HistoryId,
}

/// Messages sent by clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    FolderSync(FolderSyncRequest),
    FolderModify(FolderModifyRequest),
    FolderDelete(PathRef),
    FolderRename(FolderRenameRequest),
    NoteSync(NoteSyncRequest),
    NoteModify(NoteModifyRequest),
    NoteDelete(PathRef),
    NoteRename(NoteRenameRequest),
    HistoryList(HistoryListRequest),
    HistoryRestore(HistoryRestoreRequest),
}

/// End-of-sync marker. Every change with a cursor at or below `new_cursor`
/// has been delivered once the client drains the items that follow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEnd {
    pub new_cursor: i64,
    pub pending_modify_count: usize,
    pub pending_delete_count: usize,
    #[serde(default)]
    pub pending_upload_count: usize,
    #[serde(default)]
    pub pending_mtime_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderItem {
    pub path: String,
    pub path_hash: String,
    pub created_time: i64,
    pub modified_time: i64,
    pub update_cursor: i64,
}

impl From<&Folder> for FolderItem {
    fn from(folder: &Folder) -> Self {
        Self {
            path: folder.path.clone(),
            path_hash: folder.path_hash.clone(),
            created_time: folder.ctime,
            modified_time: folder.mtime,
            update_cursor: folder.updated_timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteItem {
    pub path: String,
    pub path_hash: String,
    pub content: String,
    pub content_hash: String,
    pub version: i64,
    pub created_time: i64,
    pub modified_time: i64,
    pub update_cursor: i64,
}

impl From<&Note> for NoteItem {
    fn from(note: &Note) -> Self {
        Self {
            path: note.path.clone(),
            path_hash: note.path_hash.clone(),
            content: note.content.clone(),
            content_hash: note.content_hash.clone(),
            version: note.version,
            created_time: note.ctime,
            modified_time: note.mtime,
            update_cursor: note.updated_timestamp,
        }
    }
}

/// A tombstone delivered to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteItem {
    pub path: String,
    pub path_hash: String,
    pub update_cursor: i64,
    /// The entity moved elsewhere; a matching modify or rename carries it
    #[serde(default)]
    pub renamed: bool,
}

impl DeleteItem {
    /// A delete for an identity the server holds no live row for
    pub fn from_ref(entry: &PathRef) -> Self {
        Self {
            path: entry.path.clone(),
            path_hash: entry.resolved_hash(),
            update_cursor: 0,
            renamed: false,
        }
    }
}

impl From<&Note> for DeleteItem {
    fn from(note: &Note) -> Self {
        Self {
            path: note.path.clone(),
            path_hash: note.path_hash.clone(),
            update_cursor: note.updated_timestamp,
            renamed: note.rename,
        }
    }
}

impl From<&Folder> for DeleteItem {
    fn from(folder: &Folder) -> Self {
        Self {
            path: folder.path.clone(),
            path_hash: folder.path_hash.clone(),
            update_cursor: folder.updated_timestamp,
            renamed: folder.rename,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderRenameItem {
    #[serde(flatten)]
    pub folder: FolderItem,
    pub old_path: String,
    pub old_path_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteRenameItem {
    #[serde(flatten)]
    pub note: NoteItem,
    pub old_path: String,
    pub old_path_hash: String,
}

/// Content is unchanged; only the modification time moved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MtimeItem {
    pub path: String,
    pub path_hash: String,
    pub created_time: i64,
    pub modified_time: i64,
    pub update_cursor: i64,
}

impl From<&Note> for MtimeItem {
    fn from(note: &Note) -> Self {
        Self {
            path: note.path.clone(),
            path_hash: note.path_hash.clone(),
            created_time: note.ctime,
            modified_time: note.mtime,
            update_cursor: note.updated_timestamp,
        }
    }
}

/// Confirms a client write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckItem {
    pub path: String,
    pub path_hash: String,
    /// Note version after the write; zero for folders
    pub version: i64,
    pub update_cursor: i64,
}

impl From<&Note> for AckItem {
    fn from(note: &Note) -> Self {
        Self {
            path: note.path.clone(),
            path_hash: note.path_hash.clone(),
            version: note.version,
            update_cursor: note.updated_timestamp,
        }
    }
}

impl From<&Folder> for AckItem {
    fn from(folder: &Folder) -> Self {
        Self {
            path: folder.path.clone(),
            path_hash: folder.path_hash.clone(),
            version: 0,
            update_cursor: folder.updated_timestamp,
        }
    }
}

/// The client's edit could not be merged with the server's copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictNotice {
    pub path: String,
    pub path_hash: String,
    /// The server's current copy, left untouched
    pub server: NoteItem,
    /// Where the client's text was preserved
    pub conflict_path: Option<String>,
    pub regions: Vec<ConflictRegion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub id: HistoryId,
    pub path: String,
    pub version: i64,
    pub content_hash: String,
    pub client_name: String,
    pub created_at: i64,
}

impl From<&NoteHistory> for HistorySummary {
    fn from(history: &NoteHistory) -> Self {
        Self {
            id: history.id,
            path: history.path.clone(),
            version: history.version,
            content_hash: history.content_hash.clone(),
            client_name: history.client_name.clone(),
            created_at: history.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub path: String,
    pub path_hash: String,
    pub items: Vec<HistorySummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotice {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_hash: Option<String>,
}

/// Messages sent to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    FolderSyncEnd(SyncEnd),
    FolderSyncModify(FolderItem),
    FolderSyncDelete(DeleteItem),
    FolderSyncRename(FolderRenameItem),
    NoteSyncEnd(SyncEnd),
    NoteSyncModify(NoteItem),
    NoteSyncDelete(DeleteItem),
    NoteSyncRename(NoteRenameItem),
    NoteSyncMtime(MtimeItem),
    NoteSyncNeedPush(PathRef),
    NoteConflict(ConflictNotice),
    HistoryList(HistoryPage),
    Ack(AckItem),
    Error(ErrorNotice),
}

impl ServerMessage {
    pub fn error(message: impl Into<String>, path_hash: Option<String>) -> Self {
        Self::Error(ErrorNotice {
            message: message.into(),
            path_hash,
        })
    }
}
