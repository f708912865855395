//! Device snapshots: the unit of delivery from runtime to sinks.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::value::Value;

/// Immutable result of one poll cycle or one push event.
///
/// Failed polls still produce a snapshot: `state` is empty, `blocks_read`
/// is zero and `error` carries the cause.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub device_id: String,
    pub model: String,
    /// Wall-clock time the cycle started.
    pub timestamp: DateTime<Utc>,
    pub state: BTreeMap<String, Value>,
    pub blocks_read: usize,
    /// Monotonic cycle duration in milliseconds.
    pub duration_ms: f64,
    pub error: Option<Arc<Error>>,
}

impl DeviceSnapshot {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }

    /// Successful snapshot.
    pub fn success(
        device_id: &str,
        model: &str,
        timestamp: DateTime<Utc>,
        state: BTreeMap<String, Value>,
        blocks_read: usize,
        duration_ms: f64,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            model: model.to_string(),
            timestamp,
            state,
            blocks_read,
            duration_ms,
            error: None,
        }
    }

    /// Error snapshot: empty state, zero blocks read.
    pub fn failure(
        device_id: &str,
        model: &str,
        timestamp: DateTime<Utc>,
        duration_ms: f64,
        error: Error,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            model: model.to_string(),
            timestamp,
            state: BTreeMap::new(),
            blocks_read: 0,
            duration_ms,
            error: Some(Arc::new(error)),
        }
    }
}
