//! Executor behavior: backpressure, push mode, shutdown ordering and poll
//! cadence, driven end-to-end through real clients over the in-memory
//! transport.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use voltkit_core::client::Client;
use voltkit_core::datatypes::DataType;
use voltkit_core::error::{Error, TransportError};
use voltkit_core::modbus;
use voltkit_core::profile::{BlockGroupDef, DeviceProfile};
use voltkit_core::registry::SchemaRegistry;
use voltkit_core::retry::RetryPolicy;
use voltkit_core::schema::{BlockSchema, Field};
use voltkit_core::snapshot::DeviceSnapshot;
use voltkit_core::transport::{Sink, Transport};
use voltkit_io::transport_memory::{MemoryHandle, MemoryTransport};
use voltkit_io::MemorySink;
use voltkit_runtime::config::Mode;
use voltkit_runtime::push::rejecting_decode;
use voltkit_runtime::{
    DeviceRuntime, DropPolicy, Executor, ExecutorConfig, RuntimeRegistry,
};

fn core_profile() -> DeviceProfile {
    DeviceProfile {
        model: "ES1100".into(),
        type_id: "31".into(),
        protocol: "v2".into(),
        description: String::new(),
        groups: BTreeMap::from([(
            "core".to_string(),
            BlockGroupDef::new(vec![100], "dashboard", 5),
        )]),
    }
}

fn core_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry
        .register(Arc::new(
            BlockSchema::builder(100, "APP_HOME_DATA")
                .min_length(2)
                .strict(false)
                .field(Field::new("soc", 0, DataType::UInt16))
                .build()
                .expect("schema"),
        ))
        .expect("register");
    registry
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(1, Duration::from_millis(1), 1.0, Duration::from_millis(1))
        .expect("policy")
}

/// Responds to any read request with a well-formed all-zero payload.
fn echo_handler(request: &[u8]) -> Result<Vec<u8>, TransportError> {
    let count = usize::from(u16::from_be_bytes([request[4], request[5]]));
    let mut frame = vec![request[0], 0x03, (count * 2) as u8];
    frame.extend(std::iter::repeat(0u8).take(count * 2));
    modbus::append_crc(&mut frame);
    Ok(frame)
}

fn pull_runtime(device_id: &str, poll_interval: f64) -> DeviceRuntime {
    let (transport, _handle) = MemoryTransport::with_handler(Arc::new(echo_handler));
    let client = Client::builder(Box::new(transport), core_profile())
        .registry(core_registry())
        .retry_policy(fast_policy())
        .build();
    DeviceRuntime::new(
        device_id, client, "volta", "v2", "ES1100", "memory", poll_interval, "memory",
        "direct", Mode::Pull,
    )
}

fn push_runtime(device_id: &str) -> (DeviceRuntime, MemoryHandle) {
    let (transport, handle) = MemoryTransport::new();
    let transport = transport.push_capable();
    let client = Client::builder(Box::new(transport), core_profile())
        .registry(core_registry())
        .retry_policy(fast_policy())
        .build();
    let runtime = DeviceRuntime::new(
        device_id, client, "volta", "v2", "ES1100", "memory", 30.0, "memory", "direct",
        Mode::Push,
    );
    (runtime, handle)
}

/// Sink that blocks for a long time on every write.
struct SlowSink {
    writes: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl Sink for SlowSink {
    async fn write(&self, _snapshot: &DeviceSnapshot) -> Result<(), Error> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Sink that records the order of write and close events.
#[derive(Default)]
struct OrderTrackingSink {
    events: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl Sink for OrderTrackingSink {
    async fn write(&self, _snapshot: &DeviceSnapshot) -> Result<(), Error> {
        self.events.lock().expect("events").push("write");
        Ok(())
    }
    async fn close(&self) -> Result<(), Error> {
        self.events.lock().expect("events").push("close");
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn drop_oldest_under_slow_sink_keeps_polling() {
    let registry = RuntimeRegistry::new(vec![pull_runtime("d1", 0.005)]);
    let sink = Arc::new(SlowSink {
        writes: AtomicUsize::new(0),
        delay: Duration::from_secs(2),
    });
    let executor = Arc::new(Executor::new(
        registry,
        Some(Arc::clone(&sink) as Arc<dyn Sink>),
        ExecutorConfig {
            connect: false,
            jitter_max: 0.0,
            queue_maxsize: 2,
            drop_policy: DropPolicy::DropOldest,
            ..ExecutorConfig::default()
        },
    ));

    let runner = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move { executor.run().await })
    };
    tokio::time::sleep(Duration::from_millis(80)).await;
    executor
        .stop(Duration::from_millis(200))
        .await
        .expect("stop");
    let _ = runner.await;

    let metrics = executor.metrics("d1").expect("metrics");
    assert!(metrics.poll_ok >= 4, "poll_ok = {}", metrics.poll_ok);
    assert!(
        metrics.dropped_snapshots >= 1,
        "dropped = {}",
        metrics.dropped_snapshots
    );
    // The slow sink received at least the first snapshot, and the queue
    // never grew past its bound.
    assert!(sink.writes.load(Ordering::SeqCst) >= 1);
    assert!(executor.queue_len("d1").expect("queue") <= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn push_decode_error_produces_error_snapshot() {
    let (runtime, handle) = push_runtime("p1");
    let registry = RuntimeRegistry::new(vec![runtime]);
    let sink = Arc::new(MemorySink::default());
    let mut executor = Executor::new(
        registry,
        Some(Arc::clone(&sink) as Arc<dyn Sink>),
        ExecutorConfig {
            connect: false,
            jitter_max: 0.0,
            ..ExecutorConfig::default()
        },
    );
    executor.set_push_decoder("p1", rejecting_decode("bad payload"));
    let executor = Arc::new(executor);

    let runner = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move { executor.run().await })
    };
    // Let the adapter register, then feed garbage from a foreign thread.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let pusher = std::thread::spawn(move || handle.push(b"garbage"));
    pusher.join().expect("push thread");
    tokio::time::sleep(Duration::from_millis(100)).await;

    executor.stop(Duration::from_secs(1)).await.expect("stop");
    let _ = runner.await;

    let metrics = executor.metrics("p1").expect("metrics");
    assert_eq!(metrics.poll_error, 1);
    assert_eq!(metrics.poll_ok, 0);

    let snapshot = sink.last("p1").expect("snapshot");
    assert!(!snapshot.ok());
    assert!(snapshot.state.is_empty());
    assert!(snapshot
        .error
        .as_ref()
        .expect("error")
        .to_string()
        .contains("bad payload"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn push_events_flow_to_sink_in_order() {
    let (runtime, handle) = push_runtime("p1");
    let registry = RuntimeRegistry::new(vec![runtime]);
    let sink = Arc::new(MemorySink::default());
    let executor = Arc::new(Executor::new(
        registry,
        Some(Arc::clone(&sink) as Arc<dyn Sink>),
        ExecutorConfig {
            connect: false,
            jitter_max: 0.0,
            ..ExecutorConfig::default()
        },
    ));

    let runner = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move { executor.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    for n in 0..3 {
        handle.push(format!(r#"{{"n": {n}}}"#).as_bytes());
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    executor.stop(Duration::from_secs(1)).await.expect("stop");
    let _ = runner.await;

    let history = sink.history("p1");
    assert_eq!(history.len(), 3);
    let ns: Vec<i64> = history
        .iter()
        .map(|s| match &s.state["n"] {
            voltkit_core::Value::Int(n) => *n,
            other => panic!("bad value {other:?}"),
        })
        .collect();
    assert_eq!(ns, vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_closes_sink_exactly_once_after_writes() {
    let registry = RuntimeRegistry::new(vec![pull_runtime("d1", 0.01)]);
    let sink = Arc::new(OrderTrackingSink::default());
    let executor = Arc::new(Executor::new(
        registry,
        Some(Arc::clone(&sink) as Arc<dyn Sink>),
        ExecutorConfig {
            connect: false,
            jitter_max: 0.0,
            ..ExecutorConfig::default()
        },
    ));

    let runner = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move { executor.run().await })
    };
    tokio::time::sleep(Duration::from_millis(60)).await;
    executor.stop(Duration::from_secs(2)).await.expect("stop");
    let _ = runner.await;

    // A second stop must not close again.
    executor.stop(Duration::from_secs(1)).await.expect("stop");

    let events = sink.events.lock().expect("events").clone();
    let closes = events.iter().filter(|e| **e == "close").count();
    assert_eq!(closes, 1, "events: {events:?}");
    assert_eq!(events.last(), Some(&"close"));
    assert!(events.iter().take(events.len() - 1).all(|e| *e == "write"));
    assert!(events.len() >= 2, "expected at least one write: {events:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pull_cadence_matches_interval() {
    let registry = RuntimeRegistry::new(vec![pull_runtime("d1", 0.04)]);
    let sink = Arc::new(MemorySink::new(1000));
    let executor = Arc::new(Executor::new(
        registry,
        Some(Arc::clone(&sink) as Arc<dyn Sink>),
        ExecutorConfig {
            connect: false,
            jitter_max: 0.0,
            ..ExecutorConfig::default()
        },
    ));

    let runner = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move { executor.run().await })
    };
    tokio::time::sleep(Duration::from_millis(400)).await;
    executor.stop(Duration::from_secs(2)).await.expect("stop");
    let _ = runner.await;

    // At least floor(400ms / 40ms) - 1 snapshots under a fast sink.
    let metrics = executor.metrics("d1").expect("metrics");
    assert!(metrics.poll_ok >= 9, "poll_ok = {}", metrics.poll_ok);
    assert!(sink.ok_count("d1") >= 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reconnect_policy_fires_after_consecutive_errors() {
    /// Transport whose connect always fails.
    struct DeadTransport;
    impl Transport for DeadTransport {
        fn connect(&mut self) -> Result<(), TransportError> {
            Err(TransportError::Connect("broker down".into()))
        }
        fn disconnect(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            false
        }
        fn send_frame(
            &mut self,
            _request: &[u8],
            _timeout: Duration,
        ) -> Result<Vec<u8>, TransportError> {
            Err(TransportError::NotConnected)
        }
    }

    let client = Client::builder(Box::new(DeadTransport), core_profile())
        .registry(core_registry())
        .retry_policy(fast_policy())
        .build();
    let runtime = DeviceRuntime::new(
        "d1", client, "volta", "v2", "ES1100", "memory", 0.01, "memory", "direct",
        Mode::Pull,
    );

    let executor = Arc::new(Executor::new(
        RuntimeRegistry::new(vec![runtime]),
        None,
        ExecutorConfig {
            connect: true,
            jitter_max: 0.0,
            reconnect_after_errors: 2,
            reconnect_cooldown: Duration::from_millis(0),
            ..ExecutorConfig::default()
        },
    ));

    let runner = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move { executor.run().await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    executor.stop(Duration::from_secs(2)).await.expect("stop");
    let _ = runner.await;

    let metrics = executor.metrics("d1").expect("metrics");
    assert!(metrics.poll_error >= 2, "poll_error = {}", metrics.poll_error);
    assert!(
        metrics.reconnect_attempts >= 1,
        "reconnect_attempts = {}",
        metrics.reconnect_attempts
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_before_run_is_a_no_op_and_double_run_fails() {
    let executor = Arc::new(Executor::new(
        RuntimeRegistry::new(vec![pull_runtime("d1", 0.05)]),
        None,
        ExecutorConfig {
            connect: false,
            jitter_max: 0.0,
            ..ExecutorConfig::default()
        },
    ));

    // stop() before run() is safe.
    executor.stop(Duration::from_millis(50)).await.expect("stop");

    let runner = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move { executor.run().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    // Overlapping run() fails while the first is live.
    assert!(executor.run().await.is_err());

    executor.stop(Duration::from_secs(1)).await.expect("stop");
    runner.await.expect("join").expect("run");
}
