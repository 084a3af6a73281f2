//! Folder repository implementation

use libsql::{params, Connection, Row};

use super::parse_column;
use crate::error::Result;
use crate::models::{EntityAction, Folder, FolderId, VaultId};

const FOLDER_COLUMNS: &str = "id, vault_id, action, rename, path, path_hash, level, ctime, mtime, \
    updated_timestamp, created_at, updated_at";

/// Trait for folder storage operations (async)
#[allow(async_fn_in_trait)]
pub trait FolderRepository {
    /// Find the folder at a path fingerprint, tombstones included
    async fn find_by_path_hash(&self, vault: &VaultId, path_hash: &str) -> Result<Option<Folder>>;

    /// Insert a new folder row
    async fn insert(&self, folder: &Folder) -> Result<()>;

    /// Mark a folder live again (or touch a live one)
    async fn revive(&self, id: &FolderId, action: EntityAction, path: &str, mtime: i64, cursor: i64)
        -> Result<()>;

    /// Tombstone a live folder. Returns false when it was already deleted.
    async fn mark_deleted(&self, id: &FolderId, rename: bool, cursor: i64) -> Result<bool>;

    /// Folders of a vault with `after < updated_timestamp <= upto`, oldest change first
    async fn list_changed(&self, vault: &VaultId, after: i64, upto: i64) -> Result<Vec<Folder>>;

    /// Live folder count for a vault
    async fn live_count(&self, vault: &VaultId) -> Result<i64>;

    /// Physically remove tombstones last changed before `before` (Unix ms)
    async fn purge_deleted(&self, before: i64) -> Result<u64>;

    /// Highest cursor ever issued to a folder
    async fn max_cursor(&self) -> Result<i64>;
}

/// libSQL implementation of `FolderRepository`
pub struct LibSqlFolderRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlFolderRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_folder(row: &Row) -> Result<Folder> {
        Ok(Folder {
            id: parse_column(&row.get::<String>(0)?)?,
            vault_id: parse_column(&row.get::<String>(1)?)?,
            action: parse_column(&row.get::<String>(2)?)?,
            rename: row.get::<i64>(3)? != 0,
            path: row.get(4)?,
            path_hash: row.get(5)?,
            level: row.get(6)?,
            ctime: row.get(7)?,
            mtime: row.get(8)?,
            updated_timestamp: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

impl FolderRepository for LibSqlFolderRepository<'_> {
    async fn find_by_path_hash(&self, vault: &VaultId, path_hash: &str) -> Result<Option<Folder>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {FOLDER_COLUMNS} FROM folders WHERE vault_id = ? AND path_hash = ?"
                ),
                params![vault.as_str(), path_hash],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_folder(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, folder: &Folder) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO folders ({FOLDER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    folder.id.as_str(),
                    folder.vault_id.as_str(),
                    folder.action.as_str(),
                    i64::from(folder.rename),
                    folder.path.as_str(),
                    folder.path_hash.as_str(),
                    folder.level,
                    folder.ctime,
                    folder.mtime,
                    folder.updated_timestamp,
                    folder.created_at,
                    folder.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn revive(
        &self,
        id: &FolderId,
        action: EntityAction,
        path: &str,
        mtime: i64,
        cursor: i64,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE folders SET action = ?, rename = 0, path = ?, mtime = ?, updated_timestamp = ?,
                     updated_at = ?
                 WHERE id = ?",
                params![
                    action.as_str(),
                    path,
                    mtime,
                    cursor,
                    chrono::Utc::now().timestamp_millis(),
                    id.as_str()
                ],
            )
            .await?;
        Ok(())
    }

    async fn mark_deleted(&self, id: &FolderId, rename: bool, cursor: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE folders SET action = 'delete', rename = ?, updated_timestamp = ?, updated_at = ?
                 WHERE id = ? AND action != 'delete'",
                params![
                    i64::from(rename),
                    cursor,
                    chrono::Utc::now().timestamp_millis(),
                    id.as_str()
                ],
            )
            .await?;
        Ok(changed == 1)
    }

    async fn list_changed(&self, vault: &VaultId, after: i64, upto: i64) -> Result<Vec<Folder>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {FOLDER_COLUMNS} FROM folders
                     WHERE vault_id = ? AND updated_timestamp > ? AND updated_timestamp <= ?
                     ORDER BY updated_timestamp ASC"
                ),
                params![vault.as_str(), after, upto],
            )
            .await?;

        let mut folders = Vec::new();
        while let Some(row) = rows.next().await? {
            match Self::parse_folder(&row) {
                Ok(folder) => folders.push(folder),
                Err(e) => {
                    tracing::warn!(vault = %vault, error = %e, "Skipping unreadable folder row");
                }
            }
        }
        Ok(folders)
    }

    async fn live_count(&self, vault: &VaultId) -> Result<i64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM folders WHERE vault_id = ? AND action != 'delete'",
                [vault.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    async fn purge_deleted(&self, before: i64) -> Result<u64> {
        Ok(self
            .conn
            .execute(
                "DELETE FROM folders WHERE action = 'delete' AND updated_at < ?",
                [before],
            )
            .await?)
    }

    async fn max_cursor(&self) -> Result<i64> {
        let mut rows = self
            .conn
            .query("SELECT COALESCE(MAX(updated_timestamp), 0) FROM folders", ())
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }
}
