//! Executor: drives N device runtimes concurrently.
//!
//! One loop task per pull device, one push registration per push device,
//! one sink worker fanning in from all per-device queues. Blocking device
//! I/O runs on worker threads; every awaiting point observes the stop
//! signal. A poll that exceeds its wall-clock budget produces a timeout
//! snapshot while the worker finishes in the background (it is never
//! cancelled mid-call).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{watch, Notify};
use tokio::task::{AbortHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use voltkit_core::error::{DeviceError, Error, TransportError};
use voltkit_core::snapshot::DeviceSnapshot;
use voltkit_core::transport::{NoOpSink, Sink};

use crate::config::Mode;
use crate::device::DeviceRuntime;
use crate::metrics::DeviceMetrics;
use crate::push::{DecodeFn, PushAdapter};
use crate::queue::{DropPolicy, SnapshotQueue};
use crate::registry::RuntimeRegistry;

/// Executor tunables.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Open transports (connect on first poll, disconnect on loop exit).
    pub connect: bool,
    /// Upper bound on the random start-up stagger, seconds.
    pub jitter_max: f64,
    /// Per-device queue capacity.
    pub queue_maxsize: usize,
    pub drop_policy: DropPolicy,
    /// Reconnect after this many consecutive errors; 0 disables.
    pub reconnect_after_errors: u32,
    /// Minimum spacing between reconnect attempts.
    pub reconnect_cooldown: Duration,
    /// Wall-clock budget for one poll.
    pub poll_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            connect: true,
            jitter_max: 5.0,
            queue_maxsize: 16,
            drop_policy: DropPolicy::DropOldest,
            reconnect_after_errors: 0,
            reconnect_cooldown: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(30),
        }
    }
}

struct DeviceSlot {
    device_id: String,
    model: String,
    mode: Mode,
    poll_interval: f64,
    runtime: Arc<Mutex<DeviceRuntime>>,
    queue: Arc<SnapshotQueue>,
    metrics: Arc<Mutex<DeviceMetrics>>,
}

struct RunState {
    running: bool,
    cancel: Option<CancellationToken>,
    aborts: Vec<AbortHandle>,
}

pub struct Executor {
    slots: Vec<Arc<DeviceSlot>>,
    sink: Arc<dyn Sink>,
    config: ExecutorConfig,
    push_decoders: BTreeMap<String, DecodeFn>,
    data_ready: Arc<Notify>,
    state: Mutex<RunState>,
    sink_closed: AtomicBool,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl Executor {
    /// Consume a registry into an executor. `sink` defaults to a no-op.
    pub fn new(
        registry: RuntimeRegistry,
        sink: Option<Arc<dyn Sink>>,
        config: ExecutorConfig,
    ) -> Self {
        let (runtimes, _named_sinks) = registry.into_parts();
        let slots = runtimes
            .into_iter()
            .map(|runtime| {
                Arc::new(DeviceSlot {
                    device_id: runtime.device_id.clone(),
                    model: runtime.model(),
                    mode: runtime.mode,
                    poll_interval: runtime.poll_interval,
                    queue: Arc::new(SnapshotQueue::new(config.queue_maxsize)),
                    metrics: Arc::new(Mutex::new(DeviceMetrics::new(&runtime.device_id))),
                    runtime: Arc::new(Mutex::new(runtime)),
                })
            })
            .collect();

        let (done_tx, done_rx) = watch::channel(true);
        Self {
            slots,
            sink: sink.unwrap_or_else(|| Arc::new(NoOpSink)),
            config,
            push_decoders: BTreeMap::new(),
            data_ready: Arc::new(Notify::new()),
            state: Mutex::new(RunState {
                running: false,
                cancel: None,
                aborts: Vec::new(),
            }),
            sink_closed: AtomicBool::new(false),
            done_tx,
            done_rx,
        }
    }

    /// Install a custom push decoder for one device. Must be called
    /// before `run`.
    pub fn set_push_decoder(&mut self, device_id: &str, decode: DecodeFn) {
        self.push_decoders.insert(device_id.to_string(), decode);
    }

    pub fn metrics(&self, device_id: &str) -> Option<DeviceMetrics> {
        self.slots
            .iter()
            .find(|slot| slot.device_id == device_id)
            .map(|slot| slot.metrics.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    pub fn all_metrics(&self) -> Vec<DeviceMetrics> {
        self.slots
            .iter()
            .map(|slot| slot.metrics.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .collect()
    }

    /// Queue depth, for observability and tests.
    pub fn queue_len(&self, device_id: &str) -> Option<usize> {
        self.slots
            .iter()
            .find(|slot| slot.device_id == device_id)
            .map(|slot| slot.queue.len())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start every device task and the sink worker, then wait for all of
    /// them to finish (which happens after [`Executor::stop`]).
    ///
    /// Overlapping `run` calls fail; a completed run may be followed by
    /// another `run`.
    pub async fn run(&self) -> Result<(), Error> {
        let cancel = {
            let mut state = self.lock_state();
            if state.running {
                return Err(Error::Device(DeviceError::Internal(
                    "executor already running".to_string(),
                )));
            }
            let cancel = CancellationToken::new();
            state.running = true;
            state.cancel = Some(cancel.clone());
            state.aborts.clear();
            // Each run→stop cycle closes the sink exactly once.
            self.sink_closed.store(false, Ordering::SeqCst);
            let _ = self.done_tx.send(false);
            cancel
        };
        info!(devices = self.slots.len(), "executor starting");

        let mut tasks: JoinSet<()> = JoinSet::new();
        {
            let mut state = self.lock_state();
            for slot in &self.slots {
                let handle = match slot.mode {
                    Mode::Pull => tasks.spawn(pull_loop(
                        Arc::clone(slot),
                        self.config.clone(),
                        cancel.clone(),
                        Arc::clone(&self.data_ready),
                    )),
                    Mode::Push => {
                        let decode = self.push_decoders.get(&slot.device_id).cloned();
                        tasks.spawn(push_task(
                            Arc::clone(slot),
                            self.config.clone(),
                            cancel.clone(),
                            Arc::clone(&self.data_ready),
                            decode,
                        ))
                    }
                };
                state.aborts.push(handle);
            }
            let handle = tasks.spawn(sink_worker(
                self.slots.clone(),
                Arc::clone(&self.sink),
                cancel.clone(),
                Arc::clone(&self.data_ready),
            ));
            state.aborts.push(handle);
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                if !err.is_cancelled() {
                    error!(error = %err, "executor task failed");
                }
            }
        }

        self.close_sink_once().await;
        {
            let mut state = self.lock_state();
            state.running = false;
            state.aborts.clear();
        }
        let _ = self.done_tx.send(true);
        info!("executor stopped");
        Ok(())
    }

    /// Signal shutdown, give tasks a cooperative deadline, then cancel
    /// stragglers. Safe to call before `run` or after it completed.
    pub async fn stop(&self, timeout: Duration) -> Result<(), Error> {
        let cancel = {
            let state = self.lock_state();
            if !state.running {
                return Ok(());
            }
            state.cancel.clone()
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }

        let mut done = self.done_rx.clone();
        let finished = tokio::time::timeout(timeout, async {
            while !*done.borrow_and_update() {
                if done.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;

        if finished.is_err() {
            warn!("executor tasks did not stop in time; cancelling stragglers");
            let aborts: Vec<AbortHandle> = {
                let state = self.lock_state();
                state.aborts.iter().cloned().collect()
            };
            for handle in aborts {
                handle.abort();
            }
            // Give run() a moment to observe the aborts and finish.
            let mut done = self.done_rx.clone();
            let _ = tokio::time::timeout(Duration::from_secs(1), async {
                while !*done.borrow_and_update() {
                    if done.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await;
        }

        self.close_sink_once().await;
        Ok(())
    }

    async fn close_sink_once(&self) {
        if !self.sink_closed.swap(true, Ordering::SeqCst) {
            if let Err(err) = self.sink.close().await {
                warn!(error = %err, "sink close failed");
            }
        }
    }
}

/// Per-device pull loop: jitter, poll off-thread under a wall-clock
/// budget, metrics, enqueue, optional reconnect, interval wait. Exits at
/// the next awaiting point once the stop signal fires.
async fn pull_loop(
    slot: Arc<DeviceSlot>,
    config: ExecutorConfig,
    cancel: CancellationToken,
    data_ready: Arc<Notify>,
) {
    info!(
        device = %slot.device_id,
        interval_s = slot.poll_interval,
        "device loop started"
    );

    let jitter_cap = config.jitter_max.min(slot.poll_interval * 0.1).max(0.0);
    if jitter_cap > 0.0 {
        let jitter = rand::thread_rng().gen_range(0.0..jitter_cap);
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(device = %slot.device_id, "device loop cancelled during jitter");
                return;
            }
            _ = tokio::time::sleep(Duration::from_secs_f64(jitter)) => {}
        }
    }

    let mut first = true;
    let mut last_reconnect: Option<Instant> = None;

    while !cancel.is_cancelled() {
        let snapshot = poll_with_budget(&slot, config.connect && first, config.poll_timeout).await;
        first = false;

        {
            let mut metrics = slot.metrics.lock().unwrap_or_else(|e| e.into_inner());
            metrics.record(&snapshot);
            if slot.queue.push(snapshot, config.drop_policy) {
                metrics.dropped_snapshots += 1;
                debug!(device = %slot.device_id, "queue full, snapshot dropped");
            }
        }
        data_ready.notify_one();

        maybe_reconnect(&slot, &config, &mut last_reconnect).await;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs_f64(slot.poll_interval)) => {}
        }
    }

    if config.connect {
        let runtime = Arc::clone(&slot.runtime);
        let device_id = slot.device_id.clone();
        let _ = tokio::task::spawn_blocking(move || {
            let mut runtime = runtime.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(err) = runtime.client_mut().disconnect() {
                warn!(device = %device_id, error = %err, "disconnect on loop exit failed");
            }
        })
        .await;
    }
    info!(device = %slot.device_id, "device loop stopped");
}

/// Run one poll on a worker thread, bounded by `poll_timeout`. On budget
/// overrun the worker is left to finish in the background and a timeout
/// snapshot is synthesized.
async fn poll_with_budget(
    slot: &Arc<DeviceSlot>,
    connect: bool,
    poll_timeout: Duration,
) -> DeviceSnapshot {
    let runtime = Arc::clone(&slot.runtime);
    let handle = tokio::task::spawn_blocking(move || {
        let mut runtime = runtime.lock().unwrap_or_else(|e| e.into_inner());
        runtime.poll_once(connect, false)
    });

    match tokio::time::timeout(poll_timeout, handle).await {
        Ok(Ok(snapshot)) => snapshot,
        Ok(Err(join_err)) => DeviceSnapshot::failure(
            &slot.device_id,
            &slot.model,
            chrono::Utc::now(),
            0.0,
            Error::Device(DeviceError::Internal(format!(
                "poll task failed: {join_err}"
            ))),
        ),
        Err(_) => {
            warn!(
                device = %slot.device_id,
                timeout_s = poll_timeout.as_secs_f64(),
                "poll exceeded budget; synthesizing timeout snapshot"
            );
            DeviceSnapshot::failure(
                &slot.device_id,
                &slot.model,
                chrono::Utc::now(),
                poll_timeout.as_secs_f64() * 1000.0,
                Error::Transport(TransportError::Timeout(poll_timeout)),
            )
        }
    }
}

/// Disconnect-then-connect once the consecutive error threshold is hit,
/// rate-limited by the cooldown. Errors on both legs are swallowed; the
/// next poll reports the real outcome.
async fn maybe_reconnect(
    slot: &Arc<DeviceSlot>,
    config: &ExecutorConfig,
    last_reconnect: &mut Option<Instant>,
) {
    if !config.connect || config.reconnect_after_errors == 0 {
        return;
    }
    let consecutive = slot
        .metrics
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .consecutive_errors;
    if consecutive < config.reconnect_after_errors {
        return;
    }
    let now = Instant::now();
    if let Some(last) = *last_reconnect {
        if now.duration_since(last) < config.reconnect_cooldown {
            return;
        }
    }

    info!(device = %slot.device_id, consecutive, "reconnecting after repeated errors");
    let runtime = Arc::clone(&slot.runtime);
    let device_id = slot.device_id.clone();
    let _ = tokio::task::spawn_blocking(move || {
        let mut runtime = runtime.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(err) = runtime.client_mut().disconnect() {
            debug!(device = %device_id, error = %err, "reconnect: disconnect failed");
        }
        if let Err(err) = runtime.client_mut().connect() {
            warn!(device = %device_id, error = %err, "reconnect: connect failed");
        }
    })
    .await;

    slot.metrics
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .reconnect_attempts += 1;
    *last_reconnect = Some(now);
}

/// Push-mode device task: wire the adapter callback, optionally connect,
/// then hold until stop. All data flow happens in the adapter.
async fn push_task(
    slot: Arc<DeviceSlot>,
    config: ExecutorConfig,
    cancel: CancellationToken,
    data_ready: Arc<Notify>,
    decode: Option<DecodeFn>,
) {
    let adapter = Arc::new(PushAdapter::new(
        &slot.device_id,
        &slot.model,
        Arc::clone(&slot.queue),
        Arc::clone(&slot.metrics),
        config.drop_policy,
        decode,
        data_ready,
    ));

    {
        let runtime = Arc::clone(&slot.runtime);
        let callback = adapter.callback();
        let connect = config.connect;
        let device_id = slot.device_id.clone();
        let _ = tokio::task::spawn_blocking(move || {
            let mut runtime = runtime.lock().unwrap_or_else(|e| e.into_inner());
            runtime.client_mut().set_push_callback(callback);
            if connect {
                if let Err(err) = runtime.client_mut().connect() {
                    warn!(device = %device_id, error = %err, "push device connect failed");
                }
            }
        })
        .await;
    }
    info!(device = %slot.device_id, "push adapter registered");

    cancel.cancelled().await;

    if config.connect {
        let runtime = Arc::clone(&slot.runtime);
        let device_id = slot.device_id.clone();
        let _ = tokio::task::spawn_blocking(move || {
            let mut runtime = runtime.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(err) = runtime.client_mut().disconnect() {
                debug!(device = %device_id, error = %err, "push device disconnect failed");
            }
        })
        .await;
    }
    info!(device = %slot.device_id, "push adapter stopped");
}

/// Single sink worker: fans in FIFO from every device queue. Sink errors
/// are logged and swallowed; the loop only exits once stop is signalled
/// and every queue has drained.
async fn sink_worker(
    slots: Vec<Arc<DeviceSlot>>,
    sink: Arc<dyn Sink>,
    cancel: CancellationToken,
    data_ready: Arc<Notify>,
) {
    debug!("sink worker started");
    loop {
        let mut wrote_any = false;
        for slot in &slots {
            while let Some(snapshot) = slot.queue.try_pop() {
                wrote_any = true;
                if let Err(err) = sink.write(&snapshot).await {
                    warn!(
                        device = %snapshot.device_id,
                        error = %err,
                        "sink write failed"
                    );
                }
            }
        }

        if cancel.is_cancelled() {
            if slots.iter().all(|slot| slot.queue.is_empty()) {
                break;
            }
            continue;
        }

        if !wrote_any {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = data_ready.notified() => {}
                // Fallback wakeup so a missed notify can never wedge the
                // worker.
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
    }
    debug!("sink worker drained and stopped");
}
