//! DeviceRuntime: a client plus its YAML runtime context.

use chrono::Utc;
use tracing::{debug, warn};

use voltkit_core::client::Client;
use voltkit_core::snapshot::DeviceSnapshot;
use voltkit_core::state::BlockGroup;

use crate::config::Mode;

/// Wraps a [`Client`] with poll-cycle lifecycle and the resolved config
/// context it was built from. The context mirrors the YAML; the device
/// profile itself is never modified.
pub struct DeviceRuntime {
    pub device_id: String,
    pub vendor: String,
    pub protocol: String,
    pub profile_id: String,
    pub transport_key: String,
    pub poll_interval: f64,
    pub sink_name: String,
    pub pipeline_name: String,
    pub mode: Mode,
    client: Client,
    last_snapshot: Option<DeviceSnapshot>,
}

impl DeviceRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device_id: &str,
        client: Client,
        vendor: &str,
        protocol: &str,
        profile_id: &str,
        transport_key: &str,
        poll_interval: f64,
        sink_name: &str,
        pipeline_name: &str,
        mode: Mode,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            vendor: vendor.to_string(),
            protocol: protocol.to_string(),
            profile_id: profile_id.to_string(),
            transport_key: transport_key.to_string(),
            poll_interval,
            sink_name: sink_name.to_string(),
            pipeline_name: pipeline_name.to_string(),
            mode,
            client,
            last_snapshot: None,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }

    pub fn model(&self) -> String {
        self.client.profile().model.clone()
    }

    pub fn last_snapshot(&self) -> Option<&DeviceSnapshot> {
        self.last_snapshot.as_ref()
    }

    /// Read the device once and capture the result as a snapshot.
    ///
    /// Reads the `core` group with partial tolerance, then takes the flat
    /// device state. Every failure is captured into an error snapshot;
    /// this method never returns an error. Disconnect failures are
    /// swallowed so they cannot mask the poll outcome.
    pub fn poll_once(&mut self, connect: bool, disconnect: bool) -> DeviceSnapshot {
        let timestamp = Utc::now();
        let started = std::time::Instant::now();
        let model = self.model();

        let result = (|| {
            if connect {
                self.client.connect()?;
            }
            let blocks = self.client.read_group(BlockGroup::Core, true)?;
            Ok::<_, voltkit_core::error::Error>((blocks.len(), self.client.get_state()))
        })();

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let snapshot = match result {
            Ok((blocks_read, state)) => {
                debug!(
                    device = %self.device_id,
                    blocks_read,
                    duration_ms,
                    "poll ok"
                );
                DeviceSnapshot::success(
                    &self.device_id,
                    &model,
                    timestamp,
                    state,
                    blocks_read,
                    duration_ms,
                )
            }
            Err(error) => {
                warn!(
                    device = %self.device_id,
                    error = %error,
                    duration_ms,
                    "poll error"
                );
                DeviceSnapshot::failure(&self.device_id, &model, timestamp, duration_ms, error)
            }
        };

        if disconnect {
            if let Err(err) = self.client.disconnect() {
                warn!(device = %self.device_id, error = %err, "disconnect after poll failed");
            }
        }

        self.last_snapshot = Some(snapshot.clone());
        snapshot
    }
}
