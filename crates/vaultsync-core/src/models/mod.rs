//! Data models for vaultsync

mod action;
mod folder;
mod history;
mod id;
mod note;
mod vault;

pub use action::EntityAction;
pub use folder::Folder;
pub use history::NoteHistory;
pub use id::{FolderId, HistoryId, NoteId, VaultId};
pub use note::{Note, NoteWrite};
pub use vault::Vault;
