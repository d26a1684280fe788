//! Per-device counters of remaining tolerated failures.

use dashmap::DashMap;

/// Returned by [`FailureTracker::value`] and [`FailureTracker::decrease`]
/// for devices that are not tracked.
pub const UNTRACKED: i64 = -1;

/// Remaining allowed consecutive failures, per device.
///
/// A device reaching zero is the trigger for marking it DOWN.
#[derive(Default)]
pub struct FailureTracker {
    remaining: DashMap<String, i64>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, device: &str, allowed: i64) {
        self.remaining.insert(device.to_string(), allowed.max(0));
    }

    pub fn value(&self, device: &str) -> i64 {
        self.remaining.get(device).map(|v| *v).unwrap_or(UNTRACKED)
    }

    /// Decrements the counter, never below zero, and returns the new value.
    ///
    /// Returns [`UNTRACKED`] when the device was removed.
    pub fn decrease(&self, device: &str) -> i64 {
        match self.remaining.get_mut(device) {
            Some(mut remaining) => {
                if *remaining > 0 {
                    *remaining -= 1;
                }
                *remaining
            }
            None => UNTRACKED,
        }
    }

    pub fn remove(&self, device: &str) {
        self.remaining.remove(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_decrease_to_zero() {
        let tracker = FailureTracker::new();
        tracker.set("d1", 2);
        assert_eq!(tracker.decrease("d1"), 1);
        assert_eq!(tracker.decrease("d1"), 0);
        assert_eq!(tracker.decrease("d1"), 0);
        tracker.set("d1", 2);
        assert_eq!(tracker.value("d1"), 2);
    }

    #[test]
    fn test_removed_device() {
        let tracker = FailureTracker::new();
        tracker.set("d1", 1);
        tracker.remove("d1");
        assert_eq!(tracker.value("d1"), UNTRACKED);
        assert_eq!(tracker.decrease("d1"), UNTRACKED);
    }

    #[test]
    fn test_concurrent_decrements_hit_zero_once() {
        let tracker = Arc::new(FailureTracker::new());
        tracker.set("d1", 50);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    (0..10).filter(|_| tracker.decrease("d1") == 0).count()
                })
            })
            .collect();
        let zeros: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // 80 decrements against 50: the first zero plus 30 saturated calls.
        assert_eq!(zeros, 31);
        assert_eq!(tracker.value("d1"), 0);
    }
}
