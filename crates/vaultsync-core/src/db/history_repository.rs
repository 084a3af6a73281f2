//! Note history repository implementation

use libsql::{params, Connection, Row};

use super::parse_column;
use crate::error::Result;
use crate::models::{HistoryId, NoteHistory, NoteId};

const HISTORY_COLUMNS: &str =
    "id, note_id, vault_id, path, content, content_hash, diff_patch, client_name, version, created_at";

/// Trait for history storage operations (async)
#[allow(async_fn_in_trait)]
pub trait HistoryRepository {
    /// Insert an immutable history row
    async fn insert(&self, history: &NoteHistory) -> Result<()>;

    /// Get a history row by ID
    async fn get(&self, id: &HistoryId) -> Result<Option<NoteHistory>>;

    /// The most recently captured version of a note
    async fn latest(&self, note_id: &NoteId) -> Result<Option<NoteHistory>>;

    /// The newest captured version of a note with the given content fingerprint
    async fn find_by_content_hash(
        &self,
        note_id: &NoteId,
        content_hash: &str,
    ) -> Result<Option<NoteHistory>>;

    /// History of a note, newest first
    async fn list(&self, note_id: &NoteId, limit: usize, offset: usize) -> Result<Vec<NoteHistory>>;

    /// Re-point every history row of `from` to `to`
    async fn migrate(&self, from: &NoteId, to: &NoteId) -> Result<u64>;

    /// Keep only the newest `keep` versions of every note
    async fn prune(&self, keep: usize) -> Result<u64>;

    /// Remove all history of a note
    async fn delete_for_note(&self, note_id: &NoteId) -> Result<u64>;
}

/// libSQL implementation of `HistoryRepository`
pub struct LibSqlHistoryRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlHistoryRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_history(row: &Row) -> Result<NoteHistory> {
        Ok(NoteHistory {
            id: parse_column(&row.get::<String>(0)?)?,
            note_id: parse_column(&row.get::<String>(1)?)?,
            vault_id: parse_column(&row.get::<String>(2)?)?,
            path: row.get(3)?,
            content: row.get(4)?,
            content_hash: row.get(5)?,
            diff_patch: row.get(6)?,
            client_name: row.get(7)?,
            version: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    async fn collect(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<Vec<NoteHistory>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(Self::parse_history(&row)?);
        }
        Ok(items)
    }
}

#[allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET
impl HistoryRepository for LibSqlHistoryRepository<'_> {
    async fn insert(&self, history: &NoteHistory) -> Result<()> {
        self.conn
            .execute(
                &format!("INSERT INTO note_histories ({HISTORY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
                params![
                    history.id.as_str(),
                    history.note_id.as_str(),
                    history.vault_id.as_str(),
                    history.path.as_str(),
                    history.content.as_str(),
                    history.content_hash.as_str(),
                    history.diff_patch.as_str(),
                    history.client_name.as_str(),
                    history.version,
                    history.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: &HistoryId) -> Result<Option<NoteHistory>> {
        let mut items = self
            .collect(
                &format!("SELECT {HISTORY_COLUMNS} FROM note_histories WHERE id = ?"),
                [id.as_str()],
            )
            .await?;
        Ok(items.pop())
    }

    async fn latest(&self, note_id: &NoteId) -> Result<Option<NoteHistory>> {
        let mut items = self
            .collect(
                &format!(
                    "SELECT {HISTORY_COLUMNS} FROM note_histories WHERE note_id = ?
                     ORDER BY version DESC, created_at DESC LIMIT 1"
                ),
                [note_id.as_str()],
            )
            .await?;
        Ok(items.pop())
    }

    async fn find_by_content_hash(
        &self,
        note_id: &NoteId,
        content_hash: &str,
    ) -> Result<Option<NoteHistory>> {
        let mut items = self
            .collect(
                &format!(
                    "SELECT {HISTORY_COLUMNS} FROM note_histories WHERE note_id = ? AND content_hash = ?
                     ORDER BY version DESC LIMIT 1"
                ),
                params![note_id.as_str(), content_hash],
            )
            .await?;
        Ok(items.pop())
    }

    async fn list(&self, note_id: &NoteId, limit: usize, offset: usize) -> Result<Vec<NoteHistory>> {
        self.collect(
            &format!(
                "SELECT {HISTORY_COLUMNS} FROM note_histories WHERE note_id = ?
                 ORDER BY version DESC, created_at DESC LIMIT ? OFFSET ?"
            ),
            params![note_id.as_str(), limit as i64, offset as i64],
        )
        .await
    }

    async fn migrate(&self, from: &NoteId, to: &NoteId) -> Result<u64> {
        Ok(self
            .conn
            .execute(
                "UPDATE note_histories SET note_id = ? WHERE note_id = ?",
                params![to.as_str(), from.as_str()],
            )
            .await?)
    }

    async fn prune(&self, keep: usize) -> Result<u64> {
        Ok(self
            .conn
            .execute(
                "DELETE FROM note_histories WHERE id IN (
                     SELECT id FROM (
                         SELECT id, ROW_NUMBER() OVER (
                             PARTITION BY note_id ORDER BY version DESC, created_at DESC
                         ) AS position
                         FROM note_histories
                     ) WHERE position > ?
                 )",
                [keep as i64],
            )
            .await?)
    }

    async fn delete_for_note(&self, note_id: &NoteId) -> Result<u64> {
        Ok(self
            .conn
            .execute(
                "DELETE FROM note_histories WHERE note_id = ?",
                [note_id.as_str()],
            )
            .await?)
    }
}
