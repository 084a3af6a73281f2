//! Folder model

use serde::{Deserialize, Serialize};

use super::{EntityAction, FolderId, VaultId};

/// A directory marker. Folders only exist as rows so empty directories and
/// directory deletions can be synchronized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: FolderId,
    pub vault_id: VaultId,
    pub action: EntityAction,
    pub rename: bool,
    pub path: String,
    pub path_hash: String,
    /// Depth of the path, 1 for top-level folders
    pub level: i64,
    pub ctime: i64,
    pub mtime: i64,
    pub updated_timestamp: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Folder {
    pub const fn is_deleted(&self) -> bool {
        self.action.is_delete()
    }

    /// Depth of a normalized path
    #[allow(clippy::cast_possible_wrap)]
    pub fn level_of(path: &str) -> i64 {
        if path.is_empty() {
            0
        } else {
            path.split('/').count() as i64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_of() {
        assert_eq!(Folder::level_of(""), 0);
        assert_eq!(Folder::level_of("projects"), 1);
        assert_eq!(Folder::level_of("projects/2024/q1"), 3);
    }
}
