//! Folder reconciliation and folder writes.

use std::collections::HashSet;

use super::protocol::{
    AckItem, DeleteItem, FolderItem, FolderModifyRequest, FolderRenameItem, FolderRenameRequest,
    FolderSyncRequest, PathRef, ServerMessage,
};
use super::{skip_entity, Session, SyncEngine, SyncRound};
use crate::error::Result;
use crate::fingerprint::{normalize_path, path_fingerprint};
use crate::models::Folder;
use crate::services::DeleteOutcome;

impl SyncEngine {
    /// Run one folder reconciliation round.
    pub(super) async fn folder_sync(
        &self,
        session: &Session,
        request: FolderSyncRequest,
    ) -> Result<()> {
        session.check_vault(&request.vault)?;
        let vault = session.vault.id;
        let last_cursor = request.last_cursor;
        let new_cursor = self.store.current_cursor().await;
        let mut round = SyncRound::default();

        for entry in &request.deleted_folders {
            let path_hash = entry.resolved_hash();
            round.handled.insert(path_hash.clone());
            let item = match self.store.delete_folder(&vault, &path_hash, false).await {
                Ok(DeleteOutcome::Deleted(folder)) => {
                    tracing::debug!(vault = %vault, path_hash = %path_hash, cursor = folder.updated_timestamp, "Folder deleted");
                    DeleteItem::from(&folder)
                }
                Ok(DeleteOutcome::AlreadyDeleted(folder)) => DeleteItem::from(&folder),
                Ok(DeleteOutcome::Missing) => DeleteItem::from_ref(entry),
                Err(e) => {
                    skip_entity(session, "folder", &path_hash, &e);
                    continue;
                }
            };
            self.broadcast(session, &ServerMessage::FolderSyncDelete(item))
                .await;
        }

        for entry in &request.missing_folders {
            let path_hash = entry.resolved_hash();
            if round.handled.contains(&path_hash) {
                continue;
            }
            match self.store.find_folder(&vault, &path_hash).await {
                Ok(Some(folder)) if !folder.is_deleted() => {
                    round.handled.insert(path_hash);
                    round
                        .modifies
                        .push(ServerMessage::FolderSyncModify(FolderItem::from(&folder)));
                }
                Ok(_) => {}
                Err(e) => skip_entity(session, "folder", &path_hash, &e),
            }
        }

        let reported: HashSet<String> = request.folders.iter().map(PathRef::resolved_hash).collect();
        let mut in_delta = HashSet::new();
        for folder in self
            .store
            .changed_folders(&vault, last_cursor, new_cursor)
            .await?
        {
            in_delta.insert(folder.path_hash.clone());
            if round.handled.contains(&folder.path_hash) {
                continue;
            }
            if folder.is_deleted() {
                round
                    .deletes
                    .push(ServerMessage::FolderSyncDelete(DeleteItem::from(&folder)));
            } else if !reported.contains(&folder.path_hash) {
                round
                    .modifies
                    .push(ServerMessage::FolderSyncModify(FolderItem::from(&folder)));
            }
        }

        for entry in &request.folders {
            let path_hash = entry.resolved_hash();
            if round.handled.contains(&path_hash) || in_delta.contains(&path_hash) {
                continue;
            }
            match self.adopt_folder(session, entry, &path_hash, last_cursor).await {
                Ok(Some(folder)) => {
                    round.handled.insert(path_hash);
                    self.broadcast(session, &ServerMessage::FolderSyncModify(FolderItem::from(&folder)))
                        .await;
                }
                Ok(None) => {}
                Err(e) => skip_entity(session, "folder", &path_hash, &e),
            }
        }

        if !request.deleted_folders.is_empty() {
            self.refresh_stats(session).await;
        }

        let end = round.end(new_cursor);
        tracing::debug!(
            vault = %vault,
            session = session.id,
            cursor = new_cursor,
            modify = end.pending_modify_count,
            delete = end.pending_delete_count,
            "Folder sync"
        );
        round.stream(session, ServerMessage::FolderSyncEnd(end)).await
    }

    /// Create a client-reported folder the server does not hold.
    ///
    /// A tombstone the client already observed (cursor at or below its
    /// watermark) means the client recreated the folder afterwards.
    async fn adopt_folder(
        &self,
        session: &Session,
        entry: &PathRef,
        path_hash: &str,
        last_cursor: i64,
    ) -> Result<Option<Folder>> {
        let vault = session.vault.id;
        match self.store.find_folder(&vault, path_hash).await? {
            Some(folder) if !folder.is_deleted() => Ok(None),
            Some(folder) if folder.updated_timestamp > last_cursor => Ok(None),
            _ => {
                let (folder, created) = self.store.upsert_folder(&vault, &entry.path, 0, 0).await?;
                Ok(created.then_some(folder))
            }
        }
    }

    pub(super) async fn folder_modify(
        &self,
        session: &Session,
        request: FolderModifyRequest,
    ) -> Result<()> {
        let (folder, created) = self
            .store
            .upsert_folder(&session.vault.id, &request.path, request.ctime, request.mtime)
            .await?;
        if created {
            self.broadcast(session, &ServerMessage::FolderSyncModify(FolderItem::from(&folder)))
                .await;
            self.refresh_stats(session).await;
        }
        session.send(ServerMessage::Ack(AckItem::from(&folder))).await
    }

    pub(super) async fn folder_delete(&self, session: &Session, entry: PathRef) -> Result<()> {
        let path_hash = entry.resolved_hash();
        let item = match self
            .store
            .delete_folder(&session.vault.id, &path_hash, false)
            .await?
        {
            DeleteOutcome::Deleted(folder) => {
                self.refresh_stats(session).await;
                session.send(ServerMessage::Ack(AckItem::from(&folder))).await?;
                DeleteItem::from(&folder)
            }
            DeleteOutcome::AlreadyDeleted(folder) => DeleteItem::from(&folder),
            DeleteOutcome::Missing => DeleteItem::from_ref(&entry),
        };
        self.broadcast(session, &ServerMessage::FolderSyncDelete(item))
            .await;
        Ok(())
    }

    /// Tombstone the old path as a rename and create the new one.
    pub(super) async fn folder_rename(
        &self,
        session: &Session,
        request: FolderRenameRequest,
    ) -> Result<()> {
        let vault = session.vault.id;
        let old_path = normalize_path(&request.old_path);
        let old_path_hash = if request.old_path_hash.is_empty() {
            path_fingerprint(&old_path)
        } else {
            request.old_path_hash.clone()
        };

        let (folder, _) = self
            .store
            .upsert_folder(&vault, &request.path, request.ctime, request.mtime)
            .await?;
        if folder.path_hash != old_path_hash {
            self.store.delete_folder(&vault, &old_path_hash, true).await?;
        }

        let item = FolderRenameItem {
            folder: FolderItem::from(&folder),
            old_path,
            old_path_hash,
        };
        self.broadcast(session, &ServerMessage::FolderSyncRename(item))
            .await;
        self.refresh_stats(session).await;
        session.send(ServerMessage::Ack(AckItem::from(&folder))).await
    }
}
