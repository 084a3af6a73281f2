//! Note model

use serde::{Deserialize, Serialize};

use super::{EntityAction, NoteId, VaultId};
use crate::error::{Error, Result};
use crate::fingerprint::{content_fingerprint, normalize_path, path_fingerprint};

/// A synchronized note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Unique identifier
    pub id: NoteId,
    /// Owning vault
    pub vault_id: VaultId,
    /// Last action; `Delete` marks a tombstone
    pub action: EntityAction,
    /// Set when the note was tombstoned by a rename rather than a delete
    pub rename: bool,
    /// Vault-relative path
    pub path: String,
    /// Fingerprint of `path`
    pub path_hash: String,
    /// Full text content
    pub content: String,
    /// Fingerprint of `content`
    pub content_hash: String,
    /// Content as of the last history snapshot; the merge ancestor
    pub snapshot_content: String,
    /// Fingerprint of `snapshot_content`
    pub snapshot_hash: String,
    /// `version` at the time of the last history snapshot
    pub snapshot_version: i64,
    /// Increases on every accepted content change
    pub version: i64,
    /// Client that made the last change
    pub client_name: String,
    /// Content size in bytes
    pub size: i64,
    /// Client-reported creation time (Unix ms)
    pub ctime: i64,
    /// Client-reported modification time (Unix ms)
    pub mtime: i64,
    /// Update cursor
    pub updated_timestamp: i64,
    /// Server creation timestamp (Unix ms)
    pub created_at: i64,
    /// Server update timestamp (Unix ms)
    pub updated_at: i64,
}

impl Note {
    pub const fn is_deleted(&self) -> bool {
        self.action.is_delete()
    }

    /// Whether content changed since the last history snapshot
    pub const fn needs_snapshot(&self) -> bool {
        !self.is_deleted() && self.version > self.snapshot_version
    }
}

/// A client-submitted note body, validated and fingerprinted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteWrite {
    pub path: String,
    pub path_hash: String,
    pub content: String,
    pub content_hash: String,
    pub client_name: String,
    pub ctime: i64,
    pub mtime: i64,
}

impl NoteWrite {
    /// Build a write, normalizing the path and computing fingerprints.
    pub fn new(
        path: &str,
        content: impl Into<String>,
        client_name: impl Into<String>,
        ctime: i64,
        mtime: i64,
    ) -> Result<Self> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Err(Error::InvalidInput("note path is empty".to_string()));
        }
        let content = content.into();
        Ok(Self {
            path_hash: path_fingerprint(&path),
            content_hash: content_fingerprint(&content),
            path,
            content,
            client_name: client_name.into(),
            ctime,
            mtime,
        })
    }

    #[allow(clippy::cast_possible_wrap)]
    pub fn size(&self) -> i64 {
        self.content.len() as i64
    }
}
