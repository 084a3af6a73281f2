//! vaultsync-core - synchronization engine for multi-device note vaults
//!
//! This crate provides:
//! - Path and content fingerprints shared with clients
//! - A line-based three-way merge for concurrent note edits
//! - The libSQL-backed store with monotonic update cursors
//! - Folder and note reconciliation with fan-out to connected sessions
//! - Debounced, crash-recoverable history snapshots

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod fingerprint;
pub mod history;
pub mod merge;
pub mod models;
pub mod services;
pub mod sync;

pub use clock::CursorClock;
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use fingerprint::{fingerprint, EntityFingerprint};
pub use history::{HistoryHandle, HistoryWorker};
pub use merge::{merge, MergeOutcome, TieBreak};
pub use models::{Folder, Note, NoteHistory, Vault};
pub use services::Store;
pub use sync::{ClientMessage, ServerMessage, Session, SessionHub, SyncEngine};
