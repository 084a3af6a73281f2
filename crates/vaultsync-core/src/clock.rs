//! Update-cursor allocation.

use std::sync::atomic::{AtomicI64, Ordering};

/// Hands out strictly increasing update cursors.
///
/// Cursors only order changes; they are never compared with client clocks.
#[derive(Debug)]
pub struct CursorClock {
    last: AtomicI64,
    wall: bool,
}

impl CursorClock {
    /// Cursors track wall-clock milliseconds but never repeat or go backward.
    pub const fn wall() -> Self {
        Self {
            last: AtomicI64::new(0),
            wall: true,
        }
    }

    /// Cursors count up from `start`, independent of time.
    pub const fn logical(start: i64) -> Self {
        Self {
            last: AtomicI64::new(start),
            wall: false,
        }
    }

    /// Allocate the next cursor.
    pub fn next(&self) -> i64 {
        let floor = if self.wall {
            chrono::Utc::now().timestamp_millis()
        } else {
            i64::MIN
        };
        let mut current = self.last.load(Ordering::Acquire);
        loop {
            let candidate = floor.max(current + 1);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }

    /// The most recently issued cursor.
    pub fn current(&self) -> i64 {
        self.last.load(Ordering::Acquire)
    }

    /// Make sure no future cursor is at or below `seen`.
    pub fn observe(&self, seen: i64) {
        self.last.fetch_max(seen, Ordering::AcqRel);
    }
}

impl Default for CursorClock {
    fn default() -> Self {
        Self::wall()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_logical_clock_counts_up() {
        let clock = CursorClock::logical(10);
        assert_eq!(clock.next(), 11);
        assert_eq!(clock.next(), 12);
        assert_eq!(clock.current(), 12);
    }

    #[test]
    fn test_observe_never_moves_backward() {
        let clock = CursorClock::logical(0);
        clock.observe(100);
        clock.observe(50);
        assert_eq!(clock.next(), 101);
    }

    #[test]
    fn test_wall_clock_is_strictly_increasing() {
        let clock = CursorClock::wall();
        let mut previous = clock.next();
        assert!(previous >= chrono::Utc::now().timestamp_millis() - 1_000);
        for _ in 0..1_000 {
            let next = clock.next();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn test_wall_clock_ahead_of_time_keeps_counting() {
        let clock = CursorClock::wall();
        let future = chrono::Utc::now().timestamp_millis() + 60_000;
        clock.observe(future);
        assert_eq!(clock.next(), future + 1);
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let clock = Arc::new(CursorClock::logical(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                std::thread::spawn(move || (0..250).map(|_| clock.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1_000);
    }
}
