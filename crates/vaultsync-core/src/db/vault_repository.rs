//! Vault repository implementation

use libsql::{params, Connection, Row};

use super::parse_column;
use crate::error::Result;
use crate::models::{Vault, VaultId};

const VAULT_COLUMNS: &str =
    "id, owner, name, note_count, note_size, folder_count, is_deleted, created_at, updated_at";

/// Trait for vault storage operations (async)
#[allow(async_fn_in_trait)]
pub trait VaultRepository {
    /// Find a vault by owner and name
    async fn find(&self, owner: &str, name: &str) -> Result<Option<Vault>>;

    /// Get a vault by ID
    async fn get(&self, id: &VaultId) -> Result<Option<Vault>>;

    /// Insert a new vault
    async fn insert(&self, vault: &Vault) -> Result<()>;

    /// Overwrite the display counters of a vault
    async fn update_stats(
        &self,
        id: &VaultId,
        note_count: i64,
        note_size: i64,
        folder_count: i64,
    ) -> Result<()>;
}

/// libSQL implementation of `VaultRepository`
pub struct LibSqlVaultRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlVaultRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_vault(row: &Row) -> Result<Vault> {
        Ok(Vault {
            id: parse_column(&row.get::<String>(0)?)?,
            owner: row.get(1)?,
            name: row.get(2)?,
            note_count: row.get(3)?,
            note_size: row.get(4)?,
            folder_count: row.get(5)?,
            is_deleted: row.get::<i64>(6)? != 0,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

impl VaultRepository for LibSqlVaultRepository<'_> {
    async fn find(&self, owner: &str, name: &str) -> Result<Option<Vault>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {VAULT_COLUMNS} FROM vaults WHERE owner = ? AND name = ?"),
                params![owner, name],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_vault(&row)?)),
            None => Ok(None),
        }
    }

    async fn get(&self, id: &VaultId) -> Result<Option<Vault>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {VAULT_COLUMNS} FROM vaults WHERE id = ?"),
                [id.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_vault(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, vault: &Vault) -> Result<()> {
        self.conn
            .execute(
                &format!("INSERT INTO vaults ({VAULT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"),
                params![
                    vault.id.as_str(),
                    vault.owner.as_str(),
                    vault.name.as_str(),
                    vault.note_count,
                    vault.note_size,
                    vault.folder_count,
                    i64::from(vault.is_deleted),
                    vault.created_at,
                    vault.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn update_stats(
        &self,
        id: &VaultId,
        note_count: i64,
        note_size: i64,
        folder_count: i64,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE vaults SET note_count = ?, note_size = ?, folder_count = ?, updated_at = ?
                 WHERE id = ?",
                params![
                    note_count,
                    note_size,
                    folder_count,
                    chrono::Utc::now().timestamp_millis(),
                    id.as_str()
                ],
            )
            .await?;
        Ok(())
    }
}
