//! Engine configuration, built once and shared by reference.

use std::time::Duration;

/// Tunables for the sync engine and the history subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Quiet period after the last edit before a history snapshot is taken
    pub history_debounce: Duration,
    /// Spacing between re-armed timers during crash recovery
    pub recovery_stagger: Duration,
    /// Number of distinct stagger slots before the spacing wraps around
    pub recovery_stagger_slots: u32,
    /// History versions kept per note by retention
    pub history_keep_versions: usize,
    /// Capacity of the history subsystem's inbound queue
    pub history_queue_capacity: usize,
    /// Upper bound on flushing pending snapshots during shutdown
    pub shutdown_flush_timeout: Duration,
    /// Capacity of each session's outbound queue
    pub session_queue_capacity: usize,
    /// Non-blocking send attempts before a peer with a full queue is evicted
    pub broadcast_retries: usize,
    /// Attempts at a compare-and-set note write before giving up
    pub write_retries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_debounce: Duration::from_secs(20),
            recovery_stagger: Duration::from_millis(10),
            recovery_stagger_slots: 100,
            history_keep_versions: 100,
            history_queue_capacity: 1024,
            shutdown_flush_timeout: Duration::from_secs(10),
            session_queue_capacity: 256,
            broadcast_retries: 3,
            write_retries: 3,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub const fn with_history_debounce(mut self, debounce: Duration) -> Self {
        self.history_debounce = debounce;
        self
    }

    #[must_use]
    pub const fn with_history_keep_versions(mut self, keep: usize) -> Self {
        self.history_keep_versions = keep;
        self
    }

    #[must_use]
    pub const fn with_session_queue_capacity(mut self, capacity: usize) -> Self {
        self.session_queue_capacity = capacity;
        self
    }

    /// Delay before the `index`-th recovered note is snapshotted
    pub fn recovery_delay(&self, index: usize) -> Duration {
        let slots = self.recovery_stagger_slots.max(1) as usize;
        let slot = u32::try_from(index % slots).unwrap_or(0);
        self.history_debounce + self.recovery_stagger * slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_delay_staggers_and_wraps() {
        let config = EngineConfig::default().with_history_debounce(Duration::from_secs(1));
        assert_eq!(config.recovery_delay(0), Duration::from_secs(1));
        assert_eq!(config.recovery_delay(3), Duration::from_millis(1_030));
        assert_eq!(config.recovery_delay(100), Duration::from_secs(1));
    }
}
