use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::json;

use voltkit_core::error::{DeviceError, Error};
use voltkit_core::snapshot::DeviceSnapshot;
use voltkit_core::transport::Sink;

/// Appends one JSON object per snapshot per line.
///
/// A mutex serializes appends so concurrent device loops never interleave
/// partial lines.
pub struct JsonlSink {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn render(snapshot: &DeviceSnapshot) -> String {
        let record = json!({
            "device_id": snapshot.device_id,
            "model": snapshot.model,
            "timestamp": snapshot.timestamp.timestamp_millis() as f64 / 1000.0,
            "ok": snapshot.ok(),
            "blocks_read": snapshot.blocks_read,
            "duration_ms": snapshot.duration_ms,
            "state": snapshot.state,
            "error": snapshot.error.as_ref().map(|e| e.to_string()),
        });
        record.to_string()
    }
}

#[async_trait]
impl Sink for JsonlSink {
    async fn write(&self, snapshot: &DeviceSnapshot) -> Result<(), Error> {
        let line = Self::render(snapshot);
        let _guard = self.lock.lock().await;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                Error::Device(DeviceError::Internal(format!(
                    "jsonl sink open {}: {e}",
                    self.path.display()
                )))
            })?;
        writeln!(file, "{line}").map_err(|e| {
            Error::Device(DeviceError::Internal(format!(
                "jsonl sink write {}: {e}",
                self.path.display()
            )))
        })
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}
