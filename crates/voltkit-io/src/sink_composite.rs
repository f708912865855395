use std::sync::Arc;

use async_trait::async_trait;

use voltkit_core::error::{DeviceError, Error};
use voltkit_core::snapshot::DeviceSnapshot;
use voltkit_core::transport::Sink;

/// Fans out to an ordered list of sinks.
///
/// Every sink receives the snapshot even when an earlier one fails;
/// failures are aggregated into one error raised after the fan-out.
pub struct CompositeSink {
    sinks: Vec<Arc<dyn Sink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    fn aggregate(operation: &str, errors: Vec<Error>) -> Result<(), Error> {
        if errors.is_empty() {
            return Ok(());
        }
        let details: Vec<String> = errors.iter().map(|e| format!("{}: {e}", e.class())).collect();
        Err(Error::Device(DeviceError::Internal(format!(
            "composite sink {operation} failed in {} sink(s): {}",
            errors.len(),
            details.join("; ")
        ))))
    }
}

#[async_trait]
impl Sink for CompositeSink {
    async fn write(&self, snapshot: &DeviceSnapshot) -> Result<(), Error> {
        let mut errors = Vec::new();
        for sink in &self.sinks {
            if let Err(err) = sink.write(snapshot).await {
                errors.push(err);
            }
        }
        Self::aggregate("write", errors)
    }

    async fn close(&self) -> Result<(), Error> {
        let mut errors = Vec::new();
        for sink in &self.sinks {
            if let Err(err) = sink.close().await {
                errors.push(err);
            }
        }
        Self::aggregate("close", errors)
    }
}
