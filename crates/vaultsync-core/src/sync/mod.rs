//! Reconciliation protocol: per-session handling of folder and note messages.
//!
//! A sync round compares what a client reports against the store, applies the
//! client's deletions and novelties, and streams back exactly what the client
//! is missing, bounded above by the cursor observed when the round started.
//! Every accepted change is also broadcast to the other sessions on the vault.

pub mod conflict;
mod folder;
pub mod hub;
mod note;
pub mod protocol;

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use hub::{Outbox, SessionHub, SessionId, SessionLink};
pub use note::WriteOutcome;
pub use protocol::{ClientMessage, ServerMessage, SyncEnd};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::history::HistoryHandle;
use crate::models::{NoteId, Vault};
use crate::services::Store;

/// One connected client attached to a vault.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub owner: String,
    pub vault: Vault,
    pub client_name: String,
    outbox: Outbox,
}

impl Session {
    /// Queue a message for this session only.
    pub async fn send(&self, message: ServerMessage) -> Result<()> {
        self.outbox.send(message).await
    }

    /// Reject requests addressed to a vault other than the one this session joined.
    fn check_vault(&self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() || name == self.vault.name {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "session is attached to vault {}, not {name}",
                self.vault.name
            )))
        }
    }
}

/// Shared entry point for every session.
#[derive(Clone)]
pub struct SyncEngine {
    store: Store,
    hub: Arc<SessionHub>,
    history: HistoryHandle,
    config: Arc<EngineConfig>,
}

impl SyncEngine {
    pub const fn new(
        store: Store,
        hub: Arc<SessionHub>,
        history: HistoryHandle,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            hub,
            history,
            config,
        }
    }

    pub const fn store(&self) -> &Store {
        &self.store
    }

    pub fn hub(&self) -> &SessionHub {
        &self.hub
    }

    /// Attach a client to `owner`'s vault, creating the vault on first use.
    ///
    /// Returns the session, its outbound queue and a token cancelled if the hub evicts it.
    pub async fn connect(
        &self,
        owner: &str,
        vault_name: &str,
        client_name: &str,
    ) -> Result<(Session, mpsc::Receiver<ServerMessage>, CancellationToken)> {
        let vault = self.store.vault(owner, vault_name).await?;
        let link = self.hub.join(vault.id).await;
        tracing::info!(
            vault = %vault.id,
            session = link.id,
            owner,
            client = client_name,
            "Session connected"
        );
        let session = Session {
            id: link.id,
            owner: owner.to_string(),
            vault,
            client_name: client_name.to_string(),
            outbox: link.outbox,
        };
        Ok((session, link.inbox, link.evicted))
    }

    pub async fn disconnect(&self, session: &Session) {
        self.hub.leave(&session.vault.id, session.id).await;
        tracing::info!(vault = %session.vault.id, session = session.id, "Session disconnected");
    }

    /// Process one client message.
    ///
    /// Errors that only affect one entity are reported to the client and the
    /// session continues. Session-fatal and store-fatal errors are returned.
    pub async fn handle(&self, session: &Session, message: ClientMessage) -> Result<()> {
        let result = match message {
            ClientMessage::FolderSync(request) => self.folder_sync(session, request).await,
            ClientMessage::FolderModify(request) => self.folder_modify(session, request).await,
            ClientMessage::FolderDelete(entry) => self.folder_delete(session, entry).await,
            ClientMessage::FolderRename(request) => self.folder_rename(session, request).await,
            ClientMessage::NoteSync(request) => self.note_sync(session, request).await,
            ClientMessage::NoteModify(request) => self.note_modify(session, request).await,
            ClientMessage::NoteDelete(entry) => self.note_delete(session, entry).await,
            ClientMessage::NoteRename(request) => self.note_rename(session, request).await,
            ClientMessage::HistoryList(request) => self.history_list(session, request).await,
            ClientMessage::HistoryRestore(request) => self.history_restore(session, request).await,
        };

        match result {
            Err(e) if !e.is_session_fatal() && !e.is_store_fatal() => {
                tracing::warn!(
                    vault = %session.vault.id,
                    session = session.id,
                    error = %e,
                    "Request rejected"
                );
                session.send(ServerMessage::error(e.to_string(), None)).await
            }
            other => other,
        }
    }

    async fn broadcast(&self, session: &Session, message: &ServerMessage) {
        let reached = self
            .hub
            .broadcast(&session.vault.id, session.id, message)
            .await;
        tracing::debug!(vault = %session.vault.id, session = session.id, reached, "Broadcast");
    }

    /// Ask the history subsystem for a snapshot; a stopped worker only costs a log line.
    async fn notify_history(&self, session: &Session, note_id: NoteId) {
        if let Err(e) = self.history.note_changed(&session.owner, note_id).await {
            tracing::warn!(note_id = %note_id, error = %e, "History notification dropped");
        }
    }

    async fn refresh_stats(&self, session: &Session) {
        if let Err(e) = self.store.refresh_vault_stats(&session.vault.id).await {
            tracing::warn!(vault = %session.vault.id, error = %e, "Vault stats refresh failed");
        }
    }
}

/// Items queued during one sync round, streamed after the end marker.
#[derive(Debug, Default)]
struct SyncRound {
    /// Path fingerprints already settled by deletions or missing-entity lookups
    handled: HashSet<String>,
    modifies: Vec<ServerMessage>,
    mtimes: Vec<ServerMessage>,
    need_push: Vec<ServerMessage>,
    deletes: Vec<ServerMessage>,
}

impl SyncRound {
    fn end(&self, new_cursor: i64) -> SyncEnd {
        SyncEnd {
            new_cursor,
            pending_modify_count: self.modifies.len(),
            pending_delete_count: self.deletes.len(),
            pending_upload_count: self.need_push.len(),
            pending_mtime_count: self.mtimes.len(),
        }
    }

    /// Send `end` and then every queued item, modifies first and deletes last.
    async fn stream(self, session: &Session, end: ServerMessage) -> Result<()> {
        session.send(end).await?;
        for message in self
            .modifies
            .into_iter()
            .chain(self.mtimes)
            .chain(self.need_push)
            .chain(self.deletes)
        {
            session.send(message).await?;
        }
        Ok(())
    }
}

fn skip_entity(session: &Session, kind: &str, path_hash: &str, error: &Error) {
    tracing::warn!(
        vault = %session.vault.id,
        session = session.id,
        path_hash,
        kind,
        error = %error,
        "Skipping entity"
    );
}
