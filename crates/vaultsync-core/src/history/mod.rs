//! Debounced, crash-recoverable history snapshots.
//!
//! Writers send change and rename events through a bounded queue. The worker
//! owns a per-(owner, note) debounce timer; when a timer fires the note's
//! content is captured as a history version. Pending work is derived from the
//! store (notes whose version is ahead of their snapshot), so a restart simply
//! re-arms timers for those notes.

mod debounce;
mod snapshot;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use debounce::Debouncer;
pub use snapshot::{unified_patch, Snapshotter};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::models::NoteId;
use crate::services::Store;

/// Debounce key: note owner and note
pub type SnapshotKey = (String, NoteId);

/// Events consumed by the history worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEvent {
    /// A note's content changed
    Changed { owner: String, note_id: NoteId },
    /// A note was renamed; its history moves to the new identity
    Migrate {
        owner: String,
        from: NoteId,
        to: NoteId,
    },
    /// Re-arm timers for every note with an uncaptured version
    Rescan,
}

/// Cloneable sender for history events.
#[derive(Debug, Clone)]
pub struct HistoryHandle {
    tx: mpsc::Sender<HistoryEvent>,
}

impl HistoryHandle {
    pub async fn note_changed(&self, owner: &str, note_id: NoteId) -> Result<()> {
        self.send(HistoryEvent::Changed {
            owner: owner.to_string(),
            note_id,
        })
        .await
    }

    pub async fn note_migrated(&self, owner: &str, from: NoteId, to: NoteId) -> Result<()> {
        self.send(HistoryEvent::Migrate {
            owner: owner.to_string(),
            from,
            to,
        })
        .await
    }

    pub async fn rescan(&self) -> Result<()> {
        self.send(HistoryEvent::Rescan).await
    }

    async fn send(&self, event: HistoryEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| Error::Closed("history worker".to_string()))
    }
}

/// Owns the debounce timers and turns events into snapshots.
pub struct HistoryWorker {
    rx: mpsc::Receiver<HistoryEvent>,
    store: Store,
    config: Arc<EngineConfig>,
    timers: Arc<Debouncer<SnapshotKey>>,
    snapshotter: Snapshotter,
}

impl HistoryWorker {
    pub fn new(store: Store, config: Arc<EngineConfig>) -> (HistoryHandle, Self) {
        let (tx, rx) = mpsc::channel(config.history_queue_capacity.max(1));
        let worker = Self {
            rx,
            snapshotter: Snapshotter::new(store.clone()),
            store,
            config,
            timers: Debouncer::new(),
        };
        (HistoryHandle { tx }, worker)
    }

    /// Start the worker on the runtime.
    pub fn spawn(
        store: Store,
        config: Arc<EngineConfig>,
        shutdown: CancellationToken,
    ) -> (HistoryHandle, JoinHandle<()>) {
        let (handle, worker) = Self::new(store, config);
        (handle, tokio::spawn(worker.run(shutdown)))
    }

    /// Process events until `shutdown` fires, then flush pending snapshots.
    pub async fn run(mut self, shutdown: CancellationToken) {
        match self.recover().await {
            Ok(count) if count > 0 => tracing::info!(count, "Re-armed pending history snapshots"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "History recovery scan failed"),
        }

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                event = self.rx.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
        }

        self.flush().await;
    }

    /// Arm timers for notes changed since their last snapshot, staggered so a
    /// restart does not capture everything at once.
    pub async fn recover(&self) -> Result<usize> {
        let pending = self.store.notes_needing_snapshot().await?;
        let mut armed = 0;
        for (index, key) in pending.into_iter().enumerate() {
            let delay = self.config.recovery_delay(index);
            if self.schedule_if_idle(key, delay) {
                armed += 1;
            }
        }
        Ok(armed)
    }

    async fn handle(&self, event: HistoryEvent) {
        match event {
            HistoryEvent::Changed { owner, note_id } => {
                self.schedule((owner, note_id), self.config.history_debounce);
            }
            HistoryEvent::Migrate { owner, from, to } => {
                self.timers.cancel(&(owner.clone(), from));
                match self.store.migrate_history(&from, &to).await {
                    Ok(moved) => {
                        tracing::debug!(from = %from, to = %to, moved, "Migrated note history");
                    }
                    Err(e) => {
                        tracing::warn!(from = %from, to = %to, error = %e, "History migration failed");
                    }
                }
                self.schedule((owner, to), self.config.history_debounce);
            }
            HistoryEvent::Rescan => match self.recover().await {
                Ok(armed) => tracing::debug!(armed, "History rescan finished"),
                Err(e) => tracing::warn!(error = %e, "History rescan failed"),
            },
        }
    }

    fn schedule(&self, key: SnapshotKey, delay: std::time::Duration) {
        let snapshotter = self.snapshotter.clone();
        let note_id = key.1;
        self.timers.arm(key, delay, move || async move {
            capture_logged(&snapshotter, &note_id).await;
        });
    }

    fn schedule_if_idle(&self, key: SnapshotKey, delay: std::time::Duration) -> bool {
        let snapshotter = self.snapshotter.clone();
        let note_id = key.1;
        self.timers.arm_if_idle(key, delay, move || async move {
            capture_logged(&snapshotter, &note_id).await;
        })
    }

    /// Capture everything still waiting on a timer or in the queue.
    async fn flush(&mut self) {
        let mut notes: Vec<NoteId> = self.timers.drain().into_iter().map(|(_, id)| id).collect();
        while let Ok(event) = self.rx.try_recv() {
            match event {
                HistoryEvent::Changed { note_id, .. } => notes.push(note_id),
                HistoryEvent::Migrate { from, to, .. } => {
                    if let Err(e) = self.store.migrate_history(&from, &to).await {
                        tracing::warn!(from = %from, to = %to, error = %e, "History migration failed");
                    }
                    notes.push(to);
                }
                HistoryEvent::Rescan => {}
            }
        }
        notes.sort_unstable();
        notes.dedup();
        if notes.is_empty() {
            return;
        }

        let count = notes.len();
        let snapshotter = self.snapshotter.clone();
        let flushed = tokio::time::timeout(self.config.shutdown_flush_timeout, async move {
            for note_id in &notes {
                capture_logged(&snapshotter, note_id).await;
            }
        })
        .await;
        match flushed {
            Ok(()) => tracing::info!(count, "Flushed pending history snapshots"),
            Err(_) => tracing::warn!(count, "History flush timed out; recovery will resume it"),
        }
    }

    /// Number of armed timers
    pub fn pending(&self) -> usize {
        self.timers.pending()
    }
}

async fn capture_logged(snapshotter: &Snapshotter, note_id: &NoteId) {
    if let Err(e) = snapshotter.capture(note_id).await {
        tracing::warn!(note_id = %note_id, error = %e, "History snapshot failed");
    }
}
