//! Operation counters owned by an engine instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Completed-request counter and last-access clock.
///
/// Lock-free: recording never contends with the coordinator, and reading a
/// snapshot never blocks a mutation.
#[derive(Debug, Default)]
pub struct StatsTracker {
    total_operations: AtomicU64,
    /// Milliseconds since the Unix epoch; 0 until the first operation
    last_accessed_ms: AtomicU64,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one completed top-level request.
    pub fn record(&self) {
        self.total_operations.fetch_add(1, Ordering::Relaxed);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        // fetch_max keeps the clock from moving backwards under racing recorders
        self.last_accessed_ms.fetch_max(now, Ordering::Relaxed);
    }

    pub fn total_operations(&self) -> u64 {
        self.total_operations.load(Ordering::Relaxed)
    }

    pub fn last_accessed(&self) -> Option<SystemTime> {
        match self.last_accessed_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(UNIX_EPOCH + Duration::from_millis(ms)),
        }
    }
}

/// Point-in-time view returned by `Engine::stats`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_operations: u64,
    pub last_accessed: Option<SystemTime>,
    /// Live keys in the index
    pub total_keys: u64,
    /// Live key plus value bytes
    pub total_size_bytes: u64,
    /// Deleted keys not yet compacted away
    pub tombstones: u64,
    /// Backing store location
    pub location: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fresh_tracker_is_empty() {
        let stats = StatsTracker::new();
        assert_eq!(stats.total_operations(), 0);
        assert!(stats.last_accessed().is_none());
    }

    #[test]
    fn test_record_advances_counter_and_clock() {
        let stats = StatsTracker::new();
        let before = SystemTime::now() - Duration::from_millis(1);
        stats.record();
        stats.record();
        assert_eq!(stats.total_operations(), 2);
        assert!(stats.last_accessed().unwrap() >= before);
    }

    #[test]
    fn test_concurrent_records_are_all_counted() {
        let stats = Arc::new(StatsTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.total_operations(), 8000);
    }
}
