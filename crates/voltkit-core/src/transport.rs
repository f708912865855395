//! Transport and sink contracts.
//!
//! The SDK core never talks to a network itself: everything below Modbus
//! framing lives behind [`Transport`]. Implementations (MQTT in
//! production, in-memory for tests) are provided by the io crate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, TransportError};
use crate::snapshot::DeviceSnapshot;

/// Thread-safe callback for push-capable transports. May be invoked from a
/// transport-owned thread.
pub type PushCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Synchronous request/response transport.
///
/// `send_frame` blocks until a response arrives or the timeout elapses;
/// only one in-flight request per transport exists. `disconnect` is
/// idempotent.
pub trait Transport: Send {
    fn connect(&mut self) -> Result<(), TransportError>;

    fn disconnect(&mut self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    fn send_frame(&mut self, request: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Whether this transport can deliver unsolicited device data.
    fn supports_push(&self) -> bool {
        false
    }

    /// Register the push callback. No-op on pull-only transports.
    fn set_on_data(&mut self, _callback: PushCallback) {}
}

/// Post-poll snapshot sink.
///
/// `write` receives one snapshot per poll cycle; `close` flushes and
/// releases resources. The runtime calls `close` exactly once, after the
/// sink worker has drained.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn write(&self, snapshot: &DeviceSnapshot) -> Result<(), Error>;

    async fn close(&self) -> Result<(), Error>;
}

/// Sink that discards everything. Used when no sink is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpSink;

#[async_trait]
impl Sink for NoOpSink {
    async fn write(&self, _snapshot: &DeviceSnapshot) -> Result<(), Error> {
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}
