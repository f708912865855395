use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use voltkit_core::error::Error;
use voltkit_core::snapshot::DeviceSnapshot;
use voltkit_core::transport::Sink;

/// In-memory sink: a bounded ring buffer of snapshots per device id, with
/// read-side queries for tests and state persistence.
pub struct MemorySink {
    store: Mutex<BTreeMap<String, VecDeque<DeviceSnapshot>>>,
    maxlen: usize,
}

impl MemorySink {
    pub fn new(maxlen: usize) -> Self {
        Self {
            store: Mutex::new(BTreeMap::new()),
            maxlen: maxlen.max(1),
        }
    }

    fn with_store<T>(&self, f: impl FnOnce(&mut BTreeMap<String, VecDeque<DeviceSnapshot>>) -> T) -> T {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut store)
    }

    /// Last snapshot for a device, or `None` before the first poll.
    pub fn last(&self, device_id: &str) -> Option<DeviceSnapshot> {
        self.with_store(|store| store.get(device_id).and_then(|q| q.back().cloned()))
    }

    /// All retained snapshots for a device, oldest first.
    pub fn history(&self, device_id: &str) -> Vec<DeviceSnapshot> {
        self.with_store(|store| {
            store
                .get(device_id)
                .map(|q| q.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Last snapshot per device across all devices.
    pub fn all_last(&self) -> BTreeMap<String, DeviceSnapshot> {
        self.with_store(|store| {
            store
                .iter()
                .filter_map(|(id, q)| q.back().map(|s| (id.clone(), s.clone())))
                .collect()
        })
    }

    pub fn ok_count(&self, device_id: &str) -> usize {
        self.history(device_id).iter().filter(|s| s.ok()).count()
    }

    pub fn error_count(&self, device_id: &str) -> usize {
        self.history(device_id).iter().filter(|s| !s.ok()).count()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn write(&self, snapshot: &DeviceSnapshot) -> Result<(), Error> {
        self.with_store(|store| {
            let queue = store.entry(snapshot.device_id.clone()).or_default();
            if queue.len() == self.maxlen {
                queue.pop_front();
            }
            queue.push_back(snapshot.clone());
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}
