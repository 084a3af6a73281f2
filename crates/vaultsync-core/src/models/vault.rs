//! Vault model

use serde::{Deserialize, Serialize};

use super::VaultId;

/// A user's top-level synchronized collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vault {
    pub id: VaultId,
    /// Owning user
    pub owner: String,
    pub name: String,
    /// Live note count (display only, not authoritative)
    pub note_count: i64,
    /// Total bytes of live notes (display only, not authoritative)
    pub note_size: i64,
    /// Live folder count (display only, not authoritative)
    pub folder_count: i64,
    pub is_deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
}
