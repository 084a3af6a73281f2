//! Per-key restartable delay timers.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::AbortHandle;

struct Pending {
    generation: u64,
    handle: AbortHandle,
}

/// Arms one timer per key; re-arming a key restarts its delay.
///
/// The map lock only covers inserts, replacements and removals. The fire
/// callback runs after the key has been removed, outside the lock.
pub struct Debouncer<K> {
    timers: Mutex<HashMap<K, Pending>>,
    generation: AtomicU64,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            timers: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        })
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<K, Pending>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `fire` once `delay` has passed without another `arm` for `key`.
    pub fn arm<F, Fut>(self: &Arc<Self>, key: K, delay: Duration, fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let this = Arc::clone(self);
        let timer_key = key.clone();

        // The lock is held across spawn so the timer cannot observe the map
        // before its own entry is in place.
        let mut timers = self.timers();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if this.take(&timer_key, generation) {
                fire().await;
            }
        })
        .abort_handle();
        if let Some(previous) = timers.insert(key, Pending { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Arm `key` only if no timer is pending for it. Returns whether it armed.
    pub fn arm_if_idle<F, Fut>(self: &Arc<Self>, key: K, delay: Duration, fire: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_pending(&key) {
            return false;
        }
        self.arm(key, delay, fire);
        true
    }

    fn take(&self, key: &K, generation: u64) -> bool {
        let mut timers = self.timers();
        match timers.get(key) {
            Some(pending) if pending.generation == generation => {
                timers.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Drop a pending timer without firing it.
    pub fn cancel(&self, key: &K) -> bool {
        self.timers()
            .remove(key)
            .map(|pending| pending.handle.abort())
            .is_some()
    }

    /// Cancel every pending timer and return their keys.
    pub fn drain(&self) -> Vec<K> {
        self.timers()
            .drain()
            .map(|(key, pending)| {
                pending.handle.abort();
                key
            })
            .collect()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.timers().contains_key(key)
    }

    pub fn pending(&self) -> usize {
        self.timers().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    type Fire = std::pin::Pin<Box<dyn Future<Output = ()> + Send>>;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Fire + Clone + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let fired = Arc::clone(&count);
        (count, move || {
            let fired = Arc::clone(&fired);
            Box::pin(async move {
                fired.fetch_add(1, Ordering::SeqCst);
            }) as Fire
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearming_coalesces() {
        let debouncer = Debouncer::new();
        let (count, fire) = counter();
        for _ in 0..5 {
            debouncer.arm("note", Duration::from_secs(10), fire.clone());
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(debouncer.is_pending(&"note"));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_fire_independently() {
        let debouncer = Debouncer::new();
        let (count, fire) = counter();
        debouncer.arm("a", Duration::from_secs(1), fire.clone());
        debouncer.arm("b", Duration::from_secs(1), fire.clone());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_drain() {
        let debouncer = Debouncer::new();
        let (count, fire) = counter();
        debouncer.arm("a", Duration::from_secs(1), fire.clone());
        debouncer.arm("b", Duration::from_secs(1), fire.clone());
        debouncer.arm("c", Duration::from_secs(1), fire.clone());
        assert!(debouncer.cancel(&"a"));
        assert!(!debouncer.cancel(&"a"));

        let mut drained = debouncer.drain();
        drained.sort_unstable();
        assert_eq!(drained, vec!["b", "c"]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_if_idle_keeps_existing_deadline() {
        let debouncer = Debouncer::new();
        let (count, fire) = counter();
        debouncer.arm("a", Duration::from_secs(5), fire.clone());
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!debouncer.arm_if_idle("a", Duration::from_secs(5), fire.clone()));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(debouncer.arm_if_idle("a", Duration::from_secs(5), fire));
    }
}
