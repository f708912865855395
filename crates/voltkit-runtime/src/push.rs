//! Push-mode adapter: transport callback → snapshot → device queue.
//!
//! Push transports invoke `on_data` from a thread they own. The adapter
//! decodes the payload, wraps it in a snapshot (ok or error, never a
//! panic), then records metrics and enqueues under the drop policy. Queue
//! and metrics are internally synchronized, so the whole path is safe
//! from any thread.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::warn;

use voltkit_core::error::{DeviceError, Error};
use voltkit_core::snapshot::DeviceSnapshot;
use voltkit_core::transport::PushCallback;
use voltkit_core::value::Value;

use crate::metrics::DeviceMetrics;
use crate::queue::{DropPolicy, SnapshotQueue};

/// Decoder from raw push payloads to a flat state mapping.
pub type DecodeFn =
    Arc<dyn Fn(&[u8]) -> Result<BTreeMap<String, Value>, Error> + Send + Sync>;

/// Default decoder: JSON objects pass through as state; any other payload
/// is wrapped under a `data` key (hex for non-JSON bytes).
pub fn default_decode(raw: &[u8]) -> Result<BTreeMap<String, Value>, Error> {
    match serde_json::from_slice::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect()),
        Ok(other) => Ok(BTreeMap::from([("data".to_string(), Value::from(other))])),
        Err(_) => {
            let hex: String = raw.iter().map(|b| format!("{b:02x}")).collect();
            Ok(BTreeMap::from([("data".to_string(), Value::Str(hex))]))
        }
    }
}

pub struct PushAdapter {
    device_id: String,
    model: String,
    queue: Arc<SnapshotQueue>,
    metrics: Arc<Mutex<DeviceMetrics>>,
    drop_policy: DropPolicy,
    decode: DecodeFn,
    data_ready: Arc<tokio::sync::Notify>,
}

impl PushAdapter {
    pub fn new(
        device_id: &str,
        model: &str,
        queue: Arc<SnapshotQueue>,
        metrics: Arc<Mutex<DeviceMetrics>>,
        drop_policy: DropPolicy,
        decode: Option<DecodeFn>,
        data_ready: Arc<tokio::sync::Notify>,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            model: model.to_string(),
            queue,
            metrics,
            drop_policy,
            decode: decode.unwrap_or_else(|| Arc::new(default_decode)),
            data_ready,
        }
    }

    /// Feed raw push data. Thread-safe; decode failures become error
    /// snapshots, they are never raised back into the transport.
    pub fn on_data(&self, raw: &[u8]) {
        let timestamp = Utc::now();
        let started = std::time::Instant::now();

        let snapshot = match (self.decode)(raw) {
            Ok(state) => DeviceSnapshot::success(
                &self.device_id,
                &self.model,
                timestamp,
                state,
                1,
                started.elapsed().as_secs_f64() * 1000.0,
            ),
            Err(error) => {
                warn!(
                    device = %self.device_id,
                    error = %error,
                    "push decode failed"
                );
                DeviceSnapshot::failure(
                    &self.device_id,
                    &self.model,
                    timestamp,
                    started.elapsed().as_secs_f64() * 1000.0,
                    error,
                )
            }
        };

        self.enqueue(snapshot);
    }

    fn enqueue(&self, snapshot: DeviceSnapshot) {
        {
            let mut metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
            metrics.record(&snapshot);
            if self.queue.push(snapshot, self.drop_policy) {
                metrics.dropped_snapshots += 1;
            }
        }
        self.data_ready.notify_one();
    }

    /// The transport-facing callback handle.
    pub fn callback(self: &Arc<Self>) -> PushCallback {
        let adapter = Arc::clone(self);
        Arc::new(move |raw: &[u8]| adapter.on_data(raw))
    }
}

/// Decoder that always fails; used to model unparsable feeds in tests.
pub fn rejecting_decode(reason: &'static str) -> DecodeFn {
    Arc::new(move |_raw| {
        Err(Error::Device(DeviceError::Internal(reason.to_string())))
    })
}
