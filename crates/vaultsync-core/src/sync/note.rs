//! Note reconciliation, the note write path and history requests.

use std::collections::{HashMap, HashSet};

use super::conflict::conflict_path;
use super::protocol::{
    AckItem, ConflictNotice, DeleteItem, HistoryListRequest, HistoryPage, HistoryRestoreRequest,
    HistorySummary, MtimeItem, NoteFingerprint, NoteItem, NoteModifyRequest, NoteRenameItem,
    NoteRenameRequest, NoteSyncRequest, PathRef, ServerMessage,
};
use super::{skip_entity, Session, SyncEngine, SyncRound};
use crate::error::{Error, Result};
use crate::fingerprint::{content_fingerprint, normalize_path, path_fingerprint};
use crate::merge::{merge, ConflictRegion, MergeOutcome, TieBreak};
use crate::models::{EntityAction, Note, NoteWrite, VaultId};
use crate::services::DeleteOutcome;

const CONFLICT_COPY_ATTEMPTS: usize = 16;
const MAX_HISTORY_PAGE: usize = 100;

/// How a client note write was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// No note existed at the path
    Created(Note),
    /// A tombstone at the path was brought back
    Revived(Note),
    /// The client's base was current; its content replaced the server's
    Updated(Note),
    /// The client's base was stale; both edits were merged
    Merged(Note),
    /// Content matched; only the modification time moved
    Touched(Note),
    /// Content and modification time already matched
    Unchanged(Note),
    /// The edits overlap; the server note is untouched
    Conflict {
        server: Note,
        regions: Vec<ConflictRegion>,
    },
}

impl SyncEngine {
    /// Run one note reconciliation round.
    pub(super) async fn note_sync(&self, session: &Session, request: NoteSyncRequest) -> Result<()> {
        session.check_vault(&request.vault)?;
        let vault = session.vault.id;
        let last_cursor = request.last_cursor;
        let new_cursor = self.store.current_cursor().await;
        let mut round = SyncRound::default();
        let mut deleted_any = false;

        for entry in &request.deleted_notes {
            let path_hash = entry.resolved_hash();
            round.handled.insert(path_hash.clone());
            let item = match self.store.delete_note(&vault, &path_hash, false).await {
                Ok(DeleteOutcome::Deleted(note)) => {
                    tracing::debug!(vault = %vault, path_hash = %path_hash, cursor = note.updated_timestamp, "Note deleted");
                    deleted_any = true;
                    self.notify_history(session, note.id).await;
                    DeleteItem::from(&note)
                }
                Ok(DeleteOutcome::AlreadyDeleted(note)) => DeleteItem::from(&note),
                Ok(DeleteOutcome::Missing) => DeleteItem::from_ref(entry),
                Err(e) => {
                    skip_entity(session, "note", &path_hash, &e);
                    continue;
                }
            };
            self.broadcast(session, &ServerMessage::NoteSyncDelete(item))
                .await;
        }

        for entry in &request.missing_notes {
            let path_hash = entry.resolved_hash();
            if round.handled.contains(&path_hash) {
                continue;
            }
            match self.store.find_note(&vault, &path_hash).await {
                Ok(Some(note)) if !note.is_deleted() => {
                    round.handled.insert(path_hash);
                    round
                        .modifies
                        .push(ServerMessage::NoteSyncModify(NoteItem::from(&note)));
                }
                Ok(_) => {}
                Err(e) => skip_entity(session, "note", &path_hash, &e),
            }
        }

        let mut reported: HashMap<String, &NoteFingerprint> = HashMap::new();
        for entry in &request.notes {
            reported.entry(entry.resolved_hash()).or_insert(entry);
        }
        let mut in_delta = HashSet::new();
        for note in self
            .store
            .changed_notes(&vault, last_cursor, new_cursor)
            .await?
        {
            in_delta.insert(note.path_hash.clone());
            if round.handled.contains(&note.path_hash) {
                continue;
            }
            if note.is_deleted() {
                round
                    .deletes
                    .push(ServerMessage::NoteSyncDelete(DeleteItem::from(&note)));
                continue;
            }
            match reported.get(&note.path_hash) {
                Some(client) if client.content_hash == note.content_hash => {
                    if client.mtime != note.mtime {
                        round
                            .mtimes
                            .push(ServerMessage::NoteSyncMtime(MtimeItem::from(&note)));
                    }
                }
                _ => round
                    .modifies
                    .push(ServerMessage::NoteSyncModify(NoteItem::from(&note))),
            }
        }

        let mut seen = HashSet::new();
        for client in &request.notes {
            let path_hash = client.resolved_hash();
            if round.handled.contains(&path_hash)
                || in_delta.contains(&path_hash)
                || !seen.insert(path_hash.clone())
            {
                continue;
            }
            match self.store.find_note(&vault, &path_hash).await {
                Ok(Some(note)) if !note.is_deleted() && note.content_hash == client.content_hash => {}
                Ok(Some(note)) if note.is_deleted() && note.updated_timestamp > last_cursor => {}
                Ok(_) => round.need_push.push(ServerMessage::NoteSyncNeedPush(PathRef {
                    path: client.path.clone(),
                    path_hash,
                })),
                Err(e) => skip_entity(session, "note", &path_hash, &e),
            }
        }

        if deleted_any {
            self.refresh_stats(session).await;
        }

        let end = round.end(new_cursor);
        tracing::debug!(
            vault = %vault,
            session = session.id,
            cursor = new_cursor,
            modify = end.pending_modify_count,
            delete = end.pending_delete_count,
            upload = end.pending_upload_count,
            mtime = end.pending_mtime_count,
            "Note sync"
        );
        round.stream(session, ServerMessage::NoteSyncEnd(end)).await
    }

    pub(super) async fn note_modify(
        &self,
        session: &Session,
        request: NoteModifyRequest,
    ) -> Result<()> {
        let write = NoteWrite::new(
            &request.path,
            request.content,
            session.client_name.as_str(),
            request.ctime,
            request.mtime,
        )?;
        if !request.content_hash.is_empty() && request.content_hash != write.content_hash {
            return Err(Error::InvalidInput(format!(
                "content fingerprint mismatch for {}",
                write.path
            )));
        }
        let outcome = self
            .write_note(
                &session.vault.id,
                &write,
                request.base_version,
                request.base_content_hash.as_deref(),
            )
            .await?;
        self.publish_write(session, &write, outcome).await
    }

    /// Apply a client write with compare-and-set on the note version.
    ///
    /// A write based on a stale version is three-way merged with the server
    /// copy, server edits first. Lost races re-read the note and try again.
    pub async fn write_note(
        &self,
        vault: &VaultId,
        write: &NoteWrite,
        base_version: Option<i64>,
        base_content_hash: Option<&str>,
    ) -> Result<WriteOutcome> {
        for attempt in 1..=self.config.write_retries.max(1) {
            let Some(note) = self.store.find_note(vault, &write.path_hash).await? else {
                return Ok(WriteOutcome::Created(
                    self.store.create_note(vault, write).await?,
                ));
            };

            let applied = if note.is_deleted() {
                self.store
                    .update_note_content(&note.id, note.version, write, EntityAction::Create)
                    .await?
                    .map(WriteOutcome::Revived)
            } else if note.content_hash == write.content_hash && note.content == write.content {
                if note.mtime == write.mtime {
                    return Ok(WriteOutcome::Unchanged(note));
                }
                let touched = self
                    .store
                    .touch_note(&note.id, write.mtime, &write.client_name)
                    .await?;
                return Ok(WriteOutcome::Touched(touched));
            } else if base_version.is_none() || base_version == Some(note.version) {
                self.store
                    .update_note_content(&note.id, note.version, write, EntityAction::Modify)
                    .await?
                    .map(WriteOutcome::Updated)
            } else {
                let ancestor = self.merge_ancestor(&note, base_content_hash).await?;
                match merge(&ancestor, &note.content, &write.content, TieBreak::AFirst) {
                    MergeOutcome::Conflict(regions) => {
                        return Ok(WriteOutcome::Conflict {
                            server: note,
                            regions,
                        });
                    }
                    MergeOutcome::Clean(merged) if merged == note.content => {
                        return Ok(WriteOutcome::Merged(note));
                    }
                    MergeOutcome::Clean(merged) => {
                        let merged = NoteWrite {
                            content_hash: content_fingerprint(&merged),
                            content: merged,
                            ..write.clone()
                        };
                        self.store
                            .update_note_content(&note.id, note.version, &merged, EntityAction::Modify)
                            .await?
                            .map(WriteOutcome::Merged)
                    }
                }
            };

            if let Some(outcome) = applied {
                return Ok(outcome);
            }
            tracing::debug!(vault = %vault, path_hash = %write.path_hash, attempt, "Note write lost a race");
        }
        Err(Error::Busy(format!("note {}", write.path)))
    }

    /// The common ancestor for merging a stale client edit into `note`.
    async fn merge_ancestor(&self, note: &Note, base_content_hash: Option<&str>) -> Result<String> {
        match base_content_hash {
            Some(hash) if hash == note.content_hash => Ok(note.content.clone()),
            Some(hash) if hash == note.snapshot_hash => Ok(note.snapshot_content.clone()),
            Some(hash) => Ok(self
                .store
                .history_by_content_hash(&note.id, hash)
                .await?
                .map_or_else(|| note.snapshot_content.clone(), |history| history.content)),
            None => Ok(note.snapshot_content.clone()),
        }
    }

    /// Tell the origin how its write landed and fan the change out to peers.
    async fn publish_write(
        &self,
        session: &Session,
        write: &NoteWrite,
        outcome: WriteOutcome,
    ) -> Result<()> {
        match outcome {
            WriteOutcome::Created(note) | WriteOutcome::Revived(note) | WriteOutcome::Updated(note) => {
                self.broadcast(session, &ServerMessage::NoteSyncModify(NoteItem::from(&note)))
                    .await;
                self.notify_history(session, note.id).await;
                self.refresh_stats(session).await;
                session.send(ServerMessage::Ack(AckItem::from(&note))).await
            }
            WriteOutcome::Merged(note) => {
                let item = NoteItem::from(&note);
                tracing::debug!(vault = %session.vault.id, path_hash = %note.path_hash, version = note.version, "Merged concurrent edit");
                self.broadcast(session, &ServerMessage::NoteSyncModify(item.clone()))
                    .await;
                self.notify_history(session, note.id).await;
                self.refresh_stats(session).await;
                session.send(ServerMessage::NoteSyncModify(item)).await?;
                session.send(ServerMessage::Ack(AckItem::from(&note))).await
            }
            WriteOutcome::Touched(note) => {
                self.broadcast(session, &ServerMessage::NoteSyncMtime(MtimeItem::from(&note)))
                    .await;
                session.send(ServerMessage::Ack(AckItem::from(&note))).await
            }
            WriteOutcome::Unchanged(note) => {
                session.send(ServerMessage::Ack(AckItem::from(&note))).await
            }
            WriteOutcome::Conflict { server, regions } => {
                self.publish_conflict(session, write, server, regions).await
            }
        }
    }

    /// Keep the client's text as a conflict copy and report the overlap.
    async fn publish_conflict(
        &self,
        session: &Session,
        write: &NoteWrite,
        server: Note,
        regions: Vec<ConflictRegion>,
    ) -> Result<()> {
        tracing::info!(
            vault = %session.vault.id,
            path_hash = %server.path_hash,
            regions = regions.len(),
            "Note edit conflicts with server copy"
        );
        let conflict_path = match self.store_conflict_copy(&session.vault.id, write).await {
            Ok(copy) => {
                let item = NoteItem::from(&copy);
                self.broadcast(session, &ServerMessage::NoteSyncModify(item.clone()))
                    .await;
                self.notify_history(session, copy.id).await;
                self.refresh_stats(session).await;
                session.send(ServerMessage::NoteSyncModify(item)).await?;
                Some(copy.path)
            }
            Err(e) if e.is_store_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(path_hash = %server.path_hash, error = %e, "Conflict copy not stored");
                None
            }
        };
        session
            .send(ServerMessage::NoteConflict(ConflictNotice {
                path: server.path.clone(),
                path_hash: server.path_hash.clone(),
                server: NoteItem::from(&server),
                conflict_path,
                regions,
            }))
            .await
    }

    async fn store_conflict_copy(&self, vault: &VaultId, write: &NoteWrite) -> Result<Note> {
        let now = chrono::Utc::now();
        for attempt in 0..CONFLICT_COPY_ATTEMPTS {
            let copy = NoteWrite::new(
                &conflict_path(&write.path, now, attempt),
                write.content.clone(),
                write.client_name.clone(),
                write.ctime,
                write.mtime,
            )?;
            match self.store.find_note(vault, &copy.path_hash).await? {
                Some(existing) if !existing.is_deleted() => {}
                _ => return self.store.place_note(vault, &copy, 1).await,
            }
        }
        Err(Error::Busy(format!("conflict copy of {}", write.path)))
    }

    pub(super) async fn note_delete(&self, session: &Session, entry: PathRef) -> Result<()> {
        let path_hash = entry.resolved_hash();
        let item = match self
            .store
            .delete_note(&session.vault.id, &path_hash, false)
            .await?
        {
            DeleteOutcome::Deleted(note) => {
                self.notify_history(session, note.id).await;
                self.refresh_stats(session).await;
                session.send(ServerMessage::Ack(AckItem::from(&note))).await?;
                DeleteItem::from(&note)
            }
            DeleteOutcome::AlreadyDeleted(note) => DeleteItem::from(&note),
            DeleteOutcome::Missing => DeleteItem::from_ref(&entry),
        };
        self.broadcast(session, &ServerMessage::NoteSyncDelete(item))
            .await;
        Ok(())
    }

    /// Move a note to a new path, carrying its version and history along.
    pub(super) async fn note_rename(
        &self,
        session: &Session,
        request: NoteRenameRequest,
    ) -> Result<()> {
        let vault = session.vault.id;
        let old_path = normalize_path(&request.old_path);
        let old_path_hash = if request.old_path_hash.is_empty() {
            path_fingerprint(&old_path)
        } else {
            request.old_path_hash.clone()
        };
        let old = self
            .store
            .find_note(&vault, &old_path_hash)
            .await?
            .filter(|note| !note.is_deleted());

        let content = match (request.content, &old) {
            (Some(content), _) => content,
            (None, Some(old)) => old.content.clone(),
            (None, None) => return Err(Error::NotFound(format!("note {old_path}"))),
        };
        let write = NoteWrite::new(
            &request.path,
            content,
            session.client_name.as_str(),
            request.ctime,
            request.mtime,
        )?;

        if write.path_hash == old_path_hash {
            let outcome = self.write_note(&vault, &write, None, None).await?;
            return self.publish_write(session, &write, outcome).await;
        }

        let min_version = old.as_ref().map_or(1, |note| note.version + 1);
        let note = self.store.place_note(&vault, &write, min_version).await?;
        match &old {
            Some(old) => {
                self.store.delete_note(&vault, &old.path_hash, true).await?;
                if let Err(e) = self
                    .history
                    .note_migrated(&session.owner, old.id, note.id)
                    .await
                {
                    tracing::warn!(from = %old.id, to = %note.id, error = %e, "History migration dropped");
                }
            }
            None => self.notify_history(session, note.id).await,
        }
        tracing::debug!(vault = %vault, from = %old_path_hash, to = %note.path_hash, "Note renamed");

        let item = NoteRenameItem {
            note: NoteItem::from(&note),
            old_path,
            old_path_hash,
        };
        self.broadcast(session, &ServerMessage::NoteSyncRename(item))
            .await;
        self.refresh_stats(session).await;
        session.send(ServerMessage::Ack(AckItem::from(&note))).await
    }

    pub(super) async fn history_list(
        &self,
        session: &Session,
        request: HistoryListRequest,
    ) -> Result<()> {
        let path_hash = if request.path_hash.is_empty() {
            path_fingerprint(&request.path)
        } else {
            request.path_hash.clone()
        };
        let note = self
            .store
            .find_note(&session.vault.id, &path_hash)
            .await?
            .ok_or_else(|| Error::NotFound(format!("note {}", request.path)))?;
        let limit = request.limit.clamp(1, MAX_HISTORY_PAGE);
        let items = self
            .store
            .list_history(&note.id, limit, request.offset)
            .await?;
        session
            .send(ServerMessage::HistoryList(HistoryPage {
                path: note.path,
                path_hash: note.path_hash,
                items: items.iter().map(HistorySummary::from).collect(),
            }))
            .await
    }

    /// Write a historic version back as the note's newest content.
    pub(super) async fn history_restore(
        &self,
        session: &Session,
        request: HistoryRestoreRequest,
    ) -> Result<()> {
        let history = self
            .store
            .get_history(&request.history_id)
            .await?
            .filter(|history| history.vault_id == session.vault.id)
            .ok_or_else(|| Error::NotFound(format!("history {}", request.history_id)))?;
        let note = self
            .store
            .get_note(&history.note_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("note {}", history.note_id)))?;

        let write = NoteWrite::new(
            &note.path,
            history.content,
            session.client_name.as_str(),
            note.ctime,
            chrono::Utc::now().timestamp_millis(),
        )?;
        let outcome = self.write_note(&session.vault.id, &write, None, None).await?;
        if let WriteOutcome::Updated(restored) | WriteOutcome::Revived(restored) = &outcome {
            tracing::info!(note_id = %restored.id, from_version = history.version, version = restored.version, "Restored history version");
            session
                .send(ServerMessage::NoteSyncModify(NoteItem::from(restored)))
                .await?;
        }
        self.publish_write(session, &write, outcome).await
    }
}
