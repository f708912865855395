//! Bounded per-device snapshot queue with an explicit drop policy.
//!
//! The executor runs on a multi-threaded scheduler and push callbacks
//! arrive on transport-owned threads, so the queue is a mutex-guarded
//! deque with `try_push` + evict-head semantics rather than an
//! event-loop-confined structure. A shared notifier wakes the sink worker
//! on every successful push.

use std::collections::VecDeque;
use std::sync::Mutex;

use voltkit_core::snapshot::DeviceSnapshot;

/// Behavior when a device queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropPolicy {
    /// Evict the oldest queued snapshot; the newest always lands.
    #[default]
    DropOldest,
    /// Discard the incoming snapshot; the earliest are preserved.
    DropNew,
}

#[derive(Debug)]
pub struct SnapshotQueue {
    items: Mutex<VecDeque<DeviceSnapshot>>,
    maxsize: usize,
}

impl SnapshotQueue {
    pub fn new(maxsize: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            maxsize: maxsize.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<DeviceSnapshot>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue under the drop policy. Returns `true` when a snapshot was
    /// dropped (either the evicted head or the incoming one).
    pub fn push(&self, snapshot: DeviceSnapshot, policy: DropPolicy) -> bool {
        let mut items = self.lock();
        if items.len() < self.maxsize {
            items.push_back(snapshot);
            return false;
        }
        match policy {
            DropPolicy::DropOldest => {
                items.pop_front();
                items.push_back(snapshot);
                true
            }
            DropPolicy::DropNew => true,
        }
    }

    pub fn try_pop(&self) -> Option<DeviceSnapshot> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    use voltkit_core::Value;

    fn snapshot(n: u64) -> DeviceSnapshot {
        DeviceSnapshot::success(
            "d1",
            "ES1100",
            Utc::now(),
            BTreeMap::from([("n".to_string(), Value::UInt(n))]),
            1,
            0.1,
        )
    }

    fn n_of(s: &DeviceSnapshot) -> u64 {
        match s.state["n"] {
            Value::UInt(n) => n,
            _ => panic!("bad snapshot"),
        }
    }

    #[test]
    fn fifo_within_capacity() {
        let queue = SnapshotQueue::new(4);
        for n in 0..3 {
            assert!(!queue.push(snapshot(n), DropPolicy::DropOldest));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(n_of(&queue.try_pop().expect("pop")), 0);
        assert_eq!(n_of(&queue.try_pop().expect("pop")), 1);
    }

    #[test]
    fn drop_oldest_keeps_most_recent() {
        let queue = SnapshotQueue::new(2);
        assert!(!queue.push(snapshot(0), DropPolicy::DropOldest));
        assert!(!queue.push(snapshot(1), DropPolicy::DropOldest));
        assert!(queue.push(snapshot(2), DropPolicy::DropOldest));
        let kept: Vec<u64> = std::iter::from_fn(|| queue.try_pop()).map(|s| n_of(&s)).collect();
        assert_eq!(kept, vec![1, 2]);
    }

    #[test]
    fn drop_new_keeps_earliest() {
        let queue = SnapshotQueue::new(2);
        queue.push(snapshot(0), DropPolicy::DropNew);
        queue.push(snapshot(1), DropPolicy::DropNew);
        assert!(queue.push(snapshot(2), DropPolicy::DropNew));
        let kept: Vec<u64> = std::iter::from_fn(|| queue.try_pop()).map(|s| n_of(&s)).collect();
        assert_eq!(kept, vec![0, 1]);
    }
}
