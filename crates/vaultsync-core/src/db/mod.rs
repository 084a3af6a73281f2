//! Database layer for vaultsync

mod connection;
mod folder_repository;
mod history_repository;
mod migrations;
mod note_repository;
mod vault_repository;

use std::str::FromStr;

pub use connection::Database;
pub use folder_repository::{FolderRepository, LibSqlFolderRepository};
pub use history_repository::{HistoryRepository, LibSqlHistoryRepository};
pub use note_repository::{LibSqlNoteRepository, NoteRepository};
pub use vault_repository::{LibSqlVaultRepository, VaultRepository};

use crate::error::{Error, Result};

/// Parse a stored identifier or action column.
fn parse_column<T>(value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| Error::Database(format!("corrupt column value {value:?}: {e}")))
}
