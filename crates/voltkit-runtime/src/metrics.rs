//! Per-device runtime counters.

use chrono::{DateTime, Utc};

use voltkit_core::snapshot::DeviceSnapshot;

/// Accumulated counters for one device's poll history.
#[derive(Debug, Clone, Default)]
pub struct DeviceMetrics {
    pub device_id: String,
    pub poll_ok: u64,
    pub poll_error: u64,
    /// Errors since the last successful poll; reset on success.
    pub consecutive_errors: u32,
    pub last_duration_ms: f64,
    pub last_ok_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_snapshot_at: Option<DateTime<Utc>>,
    pub reconnect_attempts: u64,
    pub dropped_snapshots: u64,
}

impl DeviceMetrics {
    pub fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            ..Self::default()
        }
    }

    /// Update counters from one snapshot.
    pub fn record(&mut self, snapshot: &DeviceSnapshot) {
        self.last_duration_ms = snapshot.duration_ms;
        self.last_snapshot_at = Some(snapshot.timestamp);
        if snapshot.ok() {
            self.poll_ok += 1;
            self.consecutive_errors = 0;
            self.last_ok_at = Some(snapshot.timestamp);
        } else {
            self.poll_error += 1;
            self.consecutive_errors += 1;
            self.last_error_at = Some(snapshot.timestamp);
        }
    }
}
