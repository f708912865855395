//! In-memory transport: scripted responses or a handler closure, plus
//! push injection for push-mode tests. Works entirely without hardware,
//! the same way serial drivers are tested against a mock port.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use voltkit_core::error::TransportError;
use voltkit_core::transport::{PushCallback, Transport};

/// Handler that computes a response frame for each request frame.
pub type FrameHandler =
    Arc<dyn Fn(&[u8]) -> Result<Vec<u8>, TransportError> + Send + Sync>;

#[derive(Default)]
struct Inner {
    connected: bool,
    scripted: VecDeque<Result<Vec<u8>, TransportError>>,
    sent: Vec<Vec<u8>>,
    on_data: Option<PushCallback>,
}

/// The transport half. The paired [`MemoryHandle`] stays with the test /
/// host side to script responses and inject push data.
pub struct MemoryTransport {
    inner: Arc<Mutex<Inner>>,
    handler: Option<FrameHandler>,
    push_capable: bool,
}

/// Host-side handle onto a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryHandle {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryHandle) {
        let inner = Arc::new(Mutex::new(Inner::default()));
        (
            Self {
                inner: Arc::clone(&inner),
                handler: None,
                push_capable: false,
            },
            MemoryHandle { inner },
        )
    }

    /// Compute responses with `handler` instead of a scripted queue.
    pub fn with_handler(handler: FrameHandler) -> (Self, MemoryHandle) {
        let (mut transport, handle) = Self::new();
        transport.handler = Some(handler);
        (transport, handle)
    }

    /// Mark the transport push-capable; `set_on_data` becomes effective.
    pub fn push_capable(mut self) -> Self {
        self.push_capable = true;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MemoryHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue the response for the next request.
    pub fn enqueue_response(&self, response: Result<Vec<u8>, TransportError>) {
        self.lock().scripted.push_back(response);
    }

    /// Every request frame sent so far.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Deliver unsolicited data through the registered push callback.
    /// Callable from any thread.
    pub fn push(&self, data: &[u8]) {
        let callback = self.lock().on_data.clone();
        match callback {
            Some(callback) => callback(data),
            None => debug!(len = data.len(), "push with no callback registered, dropped"),
        }
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.lock().connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.lock().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn send_frame(&mut self, request: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if let Some(handler) = &self.handler {
            self.lock().sent.push(request.to_vec());
            return handler(request);
        }
        let mut inner = self.lock();
        inner.sent.push(request.to_vec());
        inner
            .scripted
            .pop_front()
            .unwrap_or(Err(TransportError::Timeout(timeout)))
    }

    fn supports_push(&self) -> bool {
        self.push_capable
    }

    fn set_on_data(&mut self, callback: PushCallback) {
        if self.push_capable {
            self.lock().on_data = Some(callback);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn scripted_responses_in_order() {
        let (mut transport, handle) = MemoryTransport::new();
        handle.enqueue_response(Ok(vec![0x01]));
        handle.enqueue_response(Err(TransportError::NotConnected));

        transport.connect().expect("connect");
        assert_eq!(
            transport
                .send_frame(&[0xAA], Duration::from_secs(1))
                .expect("send"),
            vec![0x01]
        );
        assert!(transport.send_frame(&[0xBB], Duration::from_secs(1)).is_err());
        // Exhausted script times out.
        assert!(matches!(
            transport.send_frame(&[0xCC], Duration::from_secs(1)),
            Err(TransportError::Timeout(_))
        ));
        assert_eq!(handle.sent_frames().len(), 3);
    }

    #[test]
    fn handler_computes_responses() {
        let (mut transport, _handle) = MemoryTransport::with_handler(Arc::new(|request| {
            Ok(vec![request[0], 0xFF])
        }));
        assert_eq!(
            transport
                .send_frame(&[0x42], Duration::from_secs(1))
                .expect("send"),
            vec![0x42, 0xFF]
        );
    }

    #[test]
    fn push_requires_capability() {
        let count = Arc::new(AtomicUsize::new(0));

        // Pull-only transport ignores callbacks.
        let (mut plain, plain_handle) = MemoryTransport::new();
        let counter = Arc::clone(&count);
        plain.set_on_data(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        plain_handle.push(&[0x00]);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let (transport, handle) = MemoryTransport::new();
        let mut transport = transport.push_capable();
        assert!(transport.supports_push());
        let counter = Arc::clone(&count);
        transport.set_on_data(Arc::new(move |data| {
            assert_eq!(data, [0x10, 0x20]);
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        handle.push(&[0x10, 0x20]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
