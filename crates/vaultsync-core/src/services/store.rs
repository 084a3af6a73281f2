//! Entity-scoped store operations shared by sessions and background tasks.
//!
//! Every method holds the database lock for exactly one entity update, and
//! cursors are allocated inside that lock so a cursor never becomes visible
//! before its row is committed.

use std::path::PathBuf;
use std::sync::Arc;

use libsql::Connection;
use tokio::sync::Mutex;

use crate::clock::CursorClock;
use crate::db::{
    Database, FolderRepository, HistoryRepository, LibSqlFolderRepository, LibSqlHistoryRepository,
    LibSqlNoteRepository, LibSqlVaultRepository, NoteRepository, VaultRepository,
};
use crate::error::{Error, Result};
use crate::fingerprint::{normalize_path, path_fingerprint};
use crate::models::{
    EntityAction, Folder, FolderId, HistoryId, Note, NoteHistory, NoteId, NoteWrite, Vault,
    VaultId,
};

/// Result of tombstoning an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome<T> {
    /// The entity was live and is now a tombstone
    Deleted(T),
    /// The entity was already a tombstone; nothing changed
    AlreadyDeleted(T),
    /// No entity exists at that path
    Missing,
}

/// Thread-safe handle to the sync database.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Database>>,
    clock: Arc<CursorClock>,
}

impl Store {
    /// Open a store at the given filesystem path with a wall-clock cursor.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::open(&db_path).await?;
        tracing::info!(path = %db_path.display(), "Opened sync database");
        Self::with_clock(db, CursorClock::wall()).await
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        Self::with_clock(Database::open_in_memory().await?, CursorClock::wall()).await
    }

    /// Wrap an open database, seeding `clock` past every persisted cursor.
    pub async fn with_clock(db: Database, clock: CursorClock) -> Result<Self> {
        let conn = db.connection();
        let highest = LibSqlNoteRepository::new(conn)
            .max_cursor()
            .await?
            .max(LibSqlFolderRepository::new(conn).max_cursor().await?);
        clock.observe(highest);
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            clock: Arc::new(clock),
        })
    }

    /// The most recently issued cursor; every change at or below it is committed.
    pub async fn current_cursor(&self) -> i64 {
        let _db = self.db.lock().await;
        self.clock.current()
    }

    /// Look up a vault by owner and name, creating it on first reference.
    pub async fn vault(&self, owner: &str, name: &str) -> Result<Vault> {
        let name = name.trim();
        if owner.trim().is_empty() || name.is_empty() {
            return Err(Error::InvalidInput(
                "vault owner and name are required".to_string(),
            ));
        }
        let db = self.db.lock().await;
        let repo = LibSqlVaultRepository::new(db.connection());
        if let Some(vault) = repo.find(owner, name).await? {
            return Ok(vault);
        }
        let now = chrono::Utc::now().timestamp_millis();
        let vault = Vault {
            id: VaultId::new(),
            owner: owner.to_string(),
            name: name.to_string(),
            note_count: 0,
            note_size: 0,
            folder_count: 0,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        repo.insert(&vault).await?;
        tracing::info!(owner, vault = name, "Created vault");
        Ok(vault)
    }

    pub async fn get_vault(&self, id: &VaultId) -> Result<Option<Vault>> {
        let db = self.db.lock().await;
        LibSqlVaultRepository::new(db.connection()).get(id).await
    }

    /// Recompute the display counters of a vault.
    pub async fn refresh_vault_stats(&self, vault: &VaultId) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let (note_count, note_size) = LibSqlNoteRepository::new(conn).live_stats(vault).await?;
        let folder_count = LibSqlFolderRepository::new(conn).live_count(vault).await?;
        LibSqlVaultRepository::new(conn)
            .update_stats(vault, note_count, note_size, folder_count)
            .await
    }

    // ---- notes ----

    pub async fn get_note(&self, id: &NoteId) -> Result<Option<Note>> {
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection()).get(id).await
    }

    /// Note at a path fingerprint, tombstones included
    pub async fn find_note(&self, vault: &VaultId, path_hash: &str) -> Result<Option<Note>> {
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection())
            .find_by_path_hash(vault, path_hash)
            .await
    }

    /// Insert a brand-new note at version 1.
    pub async fn create_note(&self, vault: &VaultId, write: &NoteWrite) -> Result<Note> {
        let db = self.db.lock().await;
        let repo = LibSqlNoteRepository::new(db.connection());
        let now = chrono::Utc::now().timestamp_millis();
        let note = Note {
            id: NoteId::new(),
            vault_id: *vault,
            action: EntityAction::Create,
            rename: false,
            path: write.path.clone(),
            path_hash: write.path_hash.clone(),
            content: write.content.clone(),
            content_hash: write.content_hash.clone(),
            snapshot_content: String::new(),
            snapshot_hash: String::new(),
            snapshot_version: 0,
            version: 1,
            client_name: write.client_name.clone(),
            size: write.size(),
            ctime: write.ctime,
            mtime: write.mtime,
            updated_timestamp: self.clock.next(),
            created_at: now,
            updated_at: now,
        };
        repo.insert(&note).await?;
        Ok(note)
    }

    /// Replace a note's content if its version is still `expected_version`.
    ///
    /// Returns `None` when another writer got there first.
    pub async fn update_note_content(
        &self,
        id: &NoteId,
        expected_version: i64,
        write: &NoteWrite,
        action: EntityAction,
    ) -> Result<Option<Note>> {
        let db = self.db.lock().await;
        let repo = LibSqlNoteRepository::new(db.connection());
        let cursor = self.clock.next();
        if !repo
            .update_content(id, expected_version, write, action, cursor)
            .await?
        {
            return Ok(None);
        }
        repo.get(id).await
    }

    /// Put content at a path that holds no live note, reusing a tombstone when one exists.
    ///
    /// The resulting version is at least `min_version`, so a renamed note keeps counting
    /// from where its previous identity left off.
    pub async fn place_note(
        &self,
        vault: &VaultId,
        write: &NoteWrite,
        min_version: i64,
    ) -> Result<Note> {
        let db = self.db.lock().await;
        let repo = LibSqlNoteRepository::new(db.connection());
        match repo.find_by_path_hash(vault, &write.path_hash).await? {
            Some(existing) if !existing.is_deleted() => Err(Error::InvalidInput(format!(
                "a note already exists at {}",
                write.path
            ))),
            Some(existing) => {
                let version = (existing.version + 1).max(min_version);
                if !repo
                    .revive(&existing.id, write, version, self.clock.next())
                    .await?
                {
                    return Err(Error::Busy(format!("note {}", existing.id)));
                }
                repo.get(&existing.id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("note {}", existing.id)))
            }
            None => {
                let now = chrono::Utc::now().timestamp_millis();
                let note = Note {
                    id: NoteId::new(),
                    vault_id: *vault,
                    action: EntityAction::Create,
                    rename: false,
                    path: write.path.clone(),
                    path_hash: write.path_hash.clone(),
                    content: write.content.clone(),
                    content_hash: write.content_hash.clone(),
                    snapshot_content: String::new(),
                    snapshot_hash: String::new(),
                    snapshot_version: 0,
                    version: min_version.max(1),
                    client_name: write.client_name.clone(),
                    size: write.size(),
                    ctime: write.ctime,
                    mtime: write.mtime,
                    updated_timestamp: self.clock.next(),
                    created_at: now,
                    updated_at: now,
                };
                repo.insert(&note).await?;
                Ok(note)
            }
        }
    }

    /// Record a newer modification time for unchanged content.
    pub async fn touch_note(&self, id: &NoteId, mtime: i64, client_name: &str) -> Result<Note> {
        let db = self.db.lock().await;
        let repo = LibSqlNoteRepository::new(db.connection());
        repo.update_mtime(id, mtime, client_name, self.clock.next())
            .await?;
        repo.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("note {id}")))
    }

    /// Tombstone the note at a path fingerprint.
    pub async fn delete_note(
        &self,
        vault: &VaultId,
        path_hash: &str,
        rename: bool,
    ) -> Result<DeleteOutcome<Note>> {
        let db = self.db.lock().await;
        let repo = LibSqlNoteRepository::new(db.connection());
        let Some(note) = repo.find_by_path_hash(vault, path_hash).await? else {
            return Ok(DeleteOutcome::Missing);
        };
        if !repo.mark_deleted(&note.id, rename, self.clock.next()).await? {
            return Ok(DeleteOutcome::AlreadyDeleted(note));
        }
        let note = repo
            .get(&note.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("note {}", note.id)))?;
        Ok(DeleteOutcome::Deleted(note))
    }

    /// Notes changed in `(after, upto]`
    pub async fn changed_notes(&self, vault: &VaultId, after: i64, upto: i64) -> Result<Vec<Note>> {
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection())
            .list_changed(vault, after, upto)
            .await
    }

    /// `(owner, note)` pairs with content newer than their last snapshot
    pub async fn notes_needing_snapshot(&self) -> Result<Vec<(String, NoteId)>> {
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection())
            .list_needing_snapshot()
            .await
    }

    // ---- history ----

    /// Store a captured version and advance the note's snapshot in one transaction.
    pub async fn record_snapshot(
        &self,
        note: &Note,
        history: Option<&NoteHistory>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result: Result<()> = async {
            if let Some(history) = history {
                LibSqlHistoryRepository::new(conn).insert(history).await?;
            }
            LibSqlNoteRepository::new(conn)
                .update_snapshot(&note.id, &note.content, &note.content_hash, note.version)
                .await
        }
        .await;
        finish(conn, result).await
    }

    /// Move history and the snapshot from a renamed note to its new identity.
    pub async fn migrate_history(&self, from: &NoteId, to: &NoteId) -> Result<u64> {
        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result: Result<u64> = async {
            let notes = LibSqlNoteRepository::new(conn);
            let moved = LibSqlHistoryRepository::new(conn).migrate(from, to).await?;
            if let Some(old) = notes.get(from).await? {
                notes
                    .update_snapshot(to, &old.snapshot_content, &old.snapshot_hash, old.snapshot_version)
                    .await?;
            }
            Ok(moved)
        }
        .await;
        finish(conn, result).await
    }

    pub async fn latest_history(&self, note_id: &NoteId) -> Result<Option<NoteHistory>> {
        let db = self.db.lock().await;
        LibSqlHistoryRepository::new(db.connection())
            .latest(note_id)
            .await
    }

    pub async fn history_by_content_hash(
        &self,
        note_id: &NoteId,
        content_hash: &str,
    ) -> Result<Option<NoteHistory>> {
        let db = self.db.lock().await;
        LibSqlHistoryRepository::new(db.connection())
            .find_by_content_hash(note_id, content_hash)
            .await
    }

    pub async fn get_history(&self, id: &HistoryId) -> Result<Option<NoteHistory>> {
        let db = self.db.lock().await;
        LibSqlHistoryRepository::new(db.connection()).get(id).await
    }

    pub async fn list_history(
        &self,
        note_id: &NoteId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<NoteHistory>> {
        let db = self.db.lock().await;
        LibSqlHistoryRepository::new(db.connection())
            .list(note_id, limit, offset)
            .await
    }

    // ---- folders ----

    pub async fn find_folder(&self, vault: &VaultId, path_hash: &str) -> Result<Option<Folder>> {
        let db = self.db.lock().await;
        LibSqlFolderRepository::new(db.connection())
            .find_by_path_hash(vault, path_hash)
            .await
    }

    /// Create a folder, or revive its tombstone. Live folders are returned unchanged.
    pub async fn upsert_folder(
        &self,
        vault: &VaultId,
        path: &str,
        ctime: i64,
        mtime: i64,
    ) -> Result<(Folder, bool)> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Err(Error::InvalidInput("folder path is empty".to_string()));
        }
        let path_hash = path_fingerprint(&path);

        let db = self.db.lock().await;
        let repo = LibSqlFolderRepository::new(db.connection());
        match repo.find_by_path_hash(vault, &path_hash).await? {
            Some(folder) if !folder.is_deleted() => Ok((folder, false)),
            Some(folder) => {
                repo.revive(&folder.id, EntityAction::Create, &path, mtime, self.clock.next())
                    .await?;
                let folder = repo
                    .find_by_path_hash(vault, &path_hash)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("folder {path}")))?;
                Ok((folder, true))
            }
            None => {
                let now = chrono::Utc::now().timestamp_millis();
                let folder = Folder {
                    id: FolderId::new(),
                    vault_id: *vault,
                    action: EntityAction::Create,
                    rename: false,
                    level: Folder::level_of(&path),
                    path,
                    path_hash,
                    ctime,
                    mtime,
                    updated_timestamp: self.clock.next(),
                    created_at: now,
                    updated_at: now,
                };
                repo.insert(&folder).await?;
                Ok((folder, true))
            }
        }
    }

    /// Tombstone the folder at a path fingerprint.
    pub async fn delete_folder(
        &self,
        vault: &VaultId,
        path_hash: &str,
        rename: bool,
    ) -> Result<DeleteOutcome<Folder>> {
        let db = self.db.lock().await;
        let repo = LibSqlFolderRepository::new(db.connection());
        let Some(folder) = repo.find_by_path_hash(vault, path_hash).await? else {
            return Ok(DeleteOutcome::Missing);
        };
        if !repo.mark_deleted(&folder.id, rename, self.clock.next()).await? {
            return Ok(DeleteOutcome::AlreadyDeleted(folder));
        }
        let folder = repo
            .find_by_path_hash(vault, path_hash)
            .await?
            .ok_or_else(|| Error::NotFound(format!("folder {path_hash}")))?;
        Ok(DeleteOutcome::Deleted(folder))
    }

    /// Folders changed in `(after, upto]`
    pub async fn changed_folders(
        &self,
        vault: &VaultId,
        after: i64,
        upto: i64,
    ) -> Result<Vec<Folder>> {
        let db = self.db.lock().await;
        LibSqlFolderRepository::new(db.connection())
            .list_changed(vault, after, upto)
            .await
    }

    // ---- retention ----

    /// Physically remove tombstones (and their history) older than `before` (Unix ms).
    pub async fn purge_tombstones(&self, before: i64) -> Result<(usize, u64)> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let notes = LibSqlNoteRepository::new(conn).purge_deleted(before).await?;
        let history = LibSqlHistoryRepository::new(conn);
        for id in &notes {
            history.delete_for_note(id).await?;
        }
        let folders = LibSqlFolderRepository::new(conn).purge_deleted(before).await?;
        Ok((notes.len(), folders))
    }

    /// Keep the newest `keep` history versions of every note.
    pub async fn prune_history(&self, keep: usize) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlHistoryRepository::new(db.connection())
            .prune(keep)
            .await
    }
}

async fn finish<T>(conn: &Connection, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            if let Err(e) = conn.execute("COMMIT", ()).await {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }
            Ok(value)
        }
        Err(e) => {
            conn.execute("ROLLBACK", ()).await.ok();
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn store() -> Store {
        let db = Database::open_in_memory().await.unwrap();
        Store::with_clock(db, CursorClock::logical(0)).await.unwrap()
    }

    fn write(path: &str, content: &str) -> NoteWrite {
        NoteWrite::new(path, content, "laptop", 1, 1).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_vault_created_once() {
        let store = store().await;
        let first = store.vault("alice", "notes").await.unwrap();
        let second = store.vault("alice", "notes").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_ne!(store.vault("bob", "notes").await.unwrap().id, first.id);
        assert!(store.vault("alice", " ").await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_version_increases_on_each_content_change() {
        let store = store().await;
        let vault = store.vault("alice", "notes").await.unwrap();
        let mut note = store.create_note(&vault.id, &write("a.md", "v1")).await.unwrap();
        let mut versions = vec![note.version];
        for body in ["v2", "v3", "v4"] {
            note = store
                .update_note_content(&note.id, note.version, &write("a.md", body), EntityAction::Modify)
                .await
                .unwrap()
                .unwrap();
            versions.push(note.version);
        }
        assert_eq!(versions, vec![1, 2, 3, 4]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stale_version_update_is_rejected() {
        let store = store().await;
        let vault = store.vault("alice", "notes").await.unwrap();
        let note = store.create_note(&vault.id, &write("a.md", "v1")).await.unwrap();
        store
            .update_note_content(&note.id, 1, &write("a.md", "v2"), EntityAction::Modify)
            .await
            .unwrap()
            .unwrap();
        let stale = store
            .update_note_content(&note.id, 1, &write("a.md", "other"), EntityAction::Modify)
            .await
            .unwrap();
        assert!(stale.is_none());
        assert_eq!(store.get_note(&note.id).await.unwrap().unwrap().content, "v2");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_versions_continue_after_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sync.db");
        let (id, cursor) = {
            let store = Store::open_path(&path).await.unwrap();
            let vault = store.vault("alice", "notes").await.unwrap();
            let note = store.create_note(&vault.id, &write("a.md", "v1")).await.unwrap();
            let note = store
                .update_note_content(&note.id, 1, &write("a.md", "v2"), EntityAction::Modify)
                .await
                .unwrap()
                .unwrap();
            (note.id, note.updated_timestamp)
        };

        let db = Database::open(&path).await.unwrap();
        let store = Store::with_clock(db, CursorClock::logical(0)).await.unwrap();
        let note = store
            .update_note_content(&id, 2, &write("a.md", "v3"), EntityAction::Modify)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(note.version, 3);
        assert!(note.updated_timestamp > cursor);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_is_idempotent() {
        let store = store().await;
        let vault = store.vault("alice", "notes").await.unwrap();
        let note = store.create_note(&vault.id, &write("a.md", "x")).await.unwrap();

        let DeleteOutcome::Deleted(deleted) =
            store.delete_note(&vault.id, &note.path_hash, false).await.unwrap()
        else {
            panic!("expected delete");
        };
        assert!(deleted.is_deleted());
        assert!(deleted.updated_timestamp > note.updated_timestamp);

        let again = store.delete_note(&vault.id, &note.path_hash, false).await.unwrap();
        assert_eq!(again, DeleteOutcome::AlreadyDeleted(deleted.clone()));
        assert_eq!(
            store.delete_note(&vault.id, "missing", false).await.unwrap(),
            DeleteOutcome::Missing
        );
        // the tombstone is untouched and still blocks the path
        let found = store.find_note(&vault.id, &note.path_hash).await.unwrap().unwrap();
        assert_eq!(found.updated_timestamp, deleted.updated_timestamp);
        assert!(found.is_deleted());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_changed_notes_respects_bounds() {
        let store = store().await;
        let vault = store.vault("alice", "notes").await.unwrap();
        let a = store.create_note(&vault.id, &write("a.md", "a")).await.unwrap();
        let b = store.create_note(&vault.id, &write("b.md", "b")).await.unwrap();
        let c = store.create_note(&vault.id, &write("c.md", "c")).await.unwrap();

        let changed = store
            .changed_notes(&vault.id, a.updated_timestamp, b.updated_timestamp)
            .await
            .unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].id, b.id);
        assert_eq!(store.current_cursor().await, c.updated_timestamp);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_folder_upsert_and_revive() {
        let store = store().await;
        let vault = store.vault("alice", "notes").await.unwrap();
        let (folder, created) = store.upsert_folder(&vault.id, "/projects/", 1, 1).await.unwrap();
        assert!(created);
        assert_eq!(folder.path, "projects");
        assert_eq!(folder.level, 1);

        let (_, created) = store.upsert_folder(&vault.id, "projects", 1, 1).await.unwrap();
        assert!(!created);

        store.delete_folder(&vault.id, &folder.path_hash, false).await.unwrap();
        let (revived, created) = store.upsert_folder(&vault.id, "projects", 1, 2).await.unwrap();
        assert!(created);
        assert_eq!(revived.id, folder.id);
        assert!(!revived.is_deleted());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_vault_stats() {
        let store = store().await;
        let vault = store.vault("alice", "notes").await.unwrap();
        store.create_note(&vault.id, &write("a.md", "abc")).await.unwrap();
        store.create_note(&vault.id, &write("b.md", "de")).await.unwrap();
        store.upsert_folder(&vault.id, "dir", 0, 0).await.unwrap();
        store.refresh_vault_stats(&vault.id).await.unwrap();

        let vault = store.get_vault(&vault.id).await.unwrap().unwrap();
        assert_eq!((vault.note_count, vault.note_size, vault.folder_count), (2, 5, 1));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_purge_tombstones() {
        let store = store().await;
        let vault = store.vault("alice", "notes").await.unwrap();
        let note = store.create_note(&vault.id, &write("a.md", "x")).await.unwrap();
        store.create_note(&vault.id, &write("b.md", "y")).await.unwrap();
        store.delete_note(&vault.id, &note.path_hash, false).await.unwrap();

        let future = chrono::Utc::now().timestamp_millis() + 1_000;
        let (notes, folders) = store.purge_tombstones(future).await.unwrap();
        assert_eq!((notes, folders), (1, 0));
        assert!(store.get_note(&note.id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_place_note_reuses_tombstone_and_keeps_counting() {
        let store = store().await;
        let vault = store.vault("alice", "notes").await.unwrap();
        let old = store.create_note(&vault.id, &write("b.md", "x")).await.unwrap();
        store.delete_note(&vault.id, &old.path_hash, false).await.unwrap();

        let placed = store.place_note(&vault.id, &write("b.md", "y"), 7).await.unwrap();
        assert_eq!(placed.id, old.id);
        assert_eq!(placed.version, 7);
        assert!(!placed.is_deleted());

        let fresh = store.place_note(&vault.id, &write("c.md", "z"), 4).await.unwrap();
        assert_eq!(fresh.version, 4);

        let err = store.place_note(&vault.id, &write("c.md", "again"), 1).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
