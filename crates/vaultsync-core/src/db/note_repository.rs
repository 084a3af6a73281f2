//! Note repository implementation

use libsql::{params, Connection, Row};

use super::parse_column;
use crate::error::Result;
use crate::models::{EntityAction, Note, NoteId, NoteWrite, VaultId};

const NOTE_COLUMNS: &str = "id, vault_id, action, rename, path, path_hash, content, content_hash, \
    snapshot_content, snapshot_hash, snapshot_version, version, client_name, size, ctime, mtime, \
    updated_timestamp, created_at, updated_at";

/// Trait for note storage operations (async)
#[allow(async_fn_in_trait)]
pub trait NoteRepository {
    /// Get a note by ID, tombstones included
    async fn get(&self, id: &NoteId) -> Result<Option<Note>>;

    /// Find the note at a path fingerprint, tombstones included
    async fn find_by_path_hash(&self, vault: &VaultId, path_hash: &str) -> Result<Option<Note>>;

    /// Insert a new note row
    async fn insert(&self, note: &Note) -> Result<()>;

    /// Replace content and bump the version if the stored version still equals `expected_version`
    async fn update_content(
        &self,
        id: &NoteId,
        expected_version: i64,
        write: &NoteWrite,
        action: EntityAction,
        cursor: i64,
    ) -> Result<bool>;

    /// Record a new modification time without touching content or version
    async fn update_mtime(&self, id: &NoteId, mtime: i64, client_name: &str, cursor: i64)
        -> Result<()>;

    /// Bring a tombstone back to life at an explicit version. Returns false when it is live.
    async fn revive(&self, id: &NoteId, write: &NoteWrite, version: i64, cursor: i64)
        -> Result<bool>;

    /// Tombstone a live note. Returns false when it was already deleted.
    async fn mark_deleted(&self, id: &NoteId, rename: bool, cursor: i64) -> Result<bool>;

    /// Notes of a vault with `after < updated_timestamp <= upto`, oldest change first
    async fn list_changed(&self, vault: &VaultId, after: i64, upto: i64) -> Result<Vec<Note>>;

    /// Live notes whose version moved past their last snapshot, with the vault owner
    async fn list_needing_snapshot(&self) -> Result<Vec<(String, NoteId)>>;

    /// Record the content captured by the latest history snapshot
    async fn update_snapshot(
        &self,
        id: &NoteId,
        content: &str,
        content_hash: &str,
        version: i64,
    ) -> Result<()>;

    /// Live note count and byte total for a vault
    async fn live_stats(&self, vault: &VaultId) -> Result<(i64, i64)>;

    /// Physically remove tombstones last changed before `before` (Unix ms)
    async fn purge_deleted(&self, before: i64) -> Result<Vec<NoteId>>;

    /// Highest cursor ever issued to a note
    async fn max_cursor(&self) -> Result<i64>;
}

/// libSQL implementation of `NoteRepository`
pub struct LibSqlNoteRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlNoteRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_note(row: &Row) -> Result<Note> {
        Ok(Note {
            id: parse_column(&row.get::<String>(0)?)?,
            vault_id: parse_column(&row.get::<String>(1)?)?,
            action: parse_column(&row.get::<String>(2)?)?,
            rename: row.get::<i64>(3)? != 0,
            path: row.get(4)?,
            path_hash: row.get(5)?,
            content: row.get(6)?,
            content_hash: row.get(7)?,
            snapshot_content: row.get(8)?,
            snapshot_hash: row.get(9)?,
            snapshot_version: row.get(10)?,
            version: row.get(11)?,
            client_name: row.get(12)?,
            size: row.get(13)?,
            ctime: row.get(14)?,
            mtime: row.get(15)?,
            updated_timestamp: row.get(16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
        })
    }

    async fn query_one(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<Option<Note>> {
        let mut rows = self.conn.query(sql, params).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_note(&row)?)),
            None => Ok(None),
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl NoteRepository for LibSqlNoteRepository<'_> {
    async fn get(&self, id: &NoteId) -> Result<Option<Note>> {
        self.query_one(
            &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?"),
            [id.as_str()],
        )
        .await
    }

    async fn find_by_path_hash(&self, vault: &VaultId, path_hash: &str) -> Result<Option<Note>> {
        self.query_one(
            &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE vault_id = ? AND path_hash = ?"),
            params![vault.as_str(), path_hash],
        )
        .await
    }

    async fn insert(&self, note: &Note) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO notes ({NOTE_COLUMNS}) VALUES \
                     (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    note.id.as_str(),
                    note.vault_id.as_str(),
                    note.action.as_str(),
                    i64::from(note.rename),
                    note.path.as_str(),
                    note.path_hash.as_str(),
                    note.content.as_str(),
                    note.content_hash.as_str(),
                    note.snapshot_content.as_str(),
                    note.snapshot_hash.as_str(),
                    note.snapshot_version,
                    note.version,
                    note.client_name.as_str(),
                    note.size,
                    note.ctime,
                    note.mtime,
                    note.updated_timestamp,
                    note.created_at,
                    note.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn update_content(
        &self,
        id: &NoteId,
        expected_version: i64,
        write: &NoteWrite,
        action: EntityAction,
        cursor: i64,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE notes SET action = ?, rename = 0, path = ?, content = ?, content_hash = ?,
                     version = version + 1, client_name = ?, size = ?, ctime = ?, mtime = ?,
                     updated_timestamp = ?, updated_at = ?
                 WHERE id = ? AND version = ?",
                params![
                    action.as_str(),
                    write.path.as_str(),
                    write.content.as_str(),
                    write.content_hash.as_str(),
                    write.client_name.as_str(),
                    write.size(),
                    write.ctime,
                    write.mtime,
                    cursor,
                    now_ms(),
                    id.as_str(),
                    expected_version,
                ],
            )
            .await?;
        Ok(changed == 1)
    }

    async fn update_mtime(
        &self,
        id: &NoteId,
        mtime: i64,
        client_name: &str,
        cursor: i64,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE notes SET mtime = ?, client_name = ?, updated_timestamp = ?, updated_at = ?
                 WHERE id = ?",
                params![mtime, client_name, cursor, now_ms(), id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn revive(
        &self,
        id: &NoteId,
        write: &NoteWrite,
        version: i64,
        cursor: i64,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE notes SET action = 'create', rename = 0, path = ?, content = ?,
                     content_hash = ?, version = ?, client_name = ?, size = ?, ctime = ?,
                     mtime = ?, updated_timestamp = ?, updated_at = ?
                 WHERE id = ? AND action = 'delete'",
                params![
                    write.path.as_str(),
                    write.content.as_str(),
                    write.content_hash.as_str(),
                    version,
                    write.client_name.as_str(),
                    write.size(),
                    write.ctime,
                    write.mtime,
                    cursor,
                    now_ms(),
                    id.as_str(),
                ],
            )
            .await?;
        Ok(changed == 1)
    }

    async fn mark_deleted(&self, id: &NoteId, rename: bool, cursor: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE notes SET action = 'delete', rename = ?, updated_timestamp = ?, updated_at = ?
                 WHERE id = ? AND action != 'delete'",
                params![i64::from(rename), cursor, now_ms(), id.as_str()],
            )
            .await?;
        Ok(changed == 1)
    }

    async fn list_changed(&self, vault: &VaultId, after: i64, upto: i64) -> Result<Vec<Note>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {NOTE_COLUMNS} FROM notes
                     WHERE vault_id = ? AND updated_timestamp > ? AND updated_timestamp <= ?
                     ORDER BY updated_timestamp ASC"
                ),
                params![vault.as_str(), after, upto],
            )
            .await?;

        let mut notes = Vec::new();
        while let Some(row) = rows.next().await? {
            match Self::parse_note(&row) {
                Ok(note) => notes.push(note),
                Err(e) => tracing::warn!(vault = %vault, error = %e, "Skipping unreadable note row"),
            }
        }
        Ok(notes)
    }

    async fn list_needing_snapshot(&self) -> Result<Vec<(String, NoteId)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT v.owner, n.id FROM notes n JOIN vaults v ON v.id = n.vault_id
                 WHERE n.action != 'delete' AND n.version > n.snapshot_version
                 ORDER BY n.updated_timestamp ASC",
                (),
            )
            .await?;

        let mut pending = Vec::new();
        while let Some(row) = rows.next().await? {
            pending.push((row.get::<String>(0)?, parse_column(&row.get::<String>(1)?)?));
        }
        Ok(pending)
    }

    async fn update_snapshot(
        &self,
        id: &NoteId,
        content: &str,
        content_hash: &str,
        version: i64,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE notes SET snapshot_content = ?, snapshot_hash = ?, snapshot_version = ?
                 WHERE id = ?",
                params![content, content_hash, version, id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn live_stats(&self, vault: &VaultId) -> Result<(i64, i64)> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM notes
                 WHERE vault_id = ? AND action != 'delete'",
                [vault.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok((row.get(0)?, row.get(1)?)),
            None => Ok((0, 0)),
        }
    }

    async fn purge_deleted(&self, before: i64) -> Result<Vec<NoteId>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM notes WHERE action = 'delete' AND updated_at < ?",
                [before],
            )
            .await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(parse_column::<NoteId>(&row.get::<String>(0)?)?);
        }
        for id in &ids {
            self.conn
                .execute(
                    "DELETE FROM notes WHERE id = ? AND action = 'delete'",
                    [id.as_str()],
                )
                .await?;
        }
        Ok(ids)
    }

    async fn max_cursor(&self) -> Result<i64> {
        let mut rows = self
            .conn
            .query("SELECT COALESCE(MAX(updated_timestamp), 0) FROM notes", ())
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }
}
