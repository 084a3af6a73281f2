//! Retention cleanup for history versions and tombstones.

use std::time::Duration;

use vaultsync_core::{HistoryHandle, Store};

/// What the periodic cleanup keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Newest history versions kept per note
    pub keep_versions: usize,
    /// Age after which tombstones are physically removed; `None` keeps them
    pub tombstone_retention: Option<Duration>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub pruned_versions: u64,
    pub purged_notes: usize,
    pub purged_folders: u64,
}

/// One cleanup pass: re-arm pending snapshots, prune history and purge old tombstones.
pub async fn run(
    store: &Store,
    history: &HistoryHandle,
    policy: RetentionPolicy,
) -> vaultsync_core::Result<MaintenanceReport> {
    if let Err(e) = history.rescan().await {
        tracing::warn!(error = %e, "History rescan not scheduled");
    }

    let mut report = MaintenanceReport {
        pruned_versions: store.prune_history(policy.keep_versions).await?,
        ..MaintenanceReport::default()
    };

    if let Some(retention) = policy.tombstone_retention {
        let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
        let before = chrono::Utc::now()
            .timestamp_millis()
            .saturating_sub(retention_ms);
        let (notes, folders) = store.purge_tombstones(before).await?;
        report.purged_notes = notes;
        report.purged_folders = folders;
    }
    Ok(report)
}
