//! RuntimeRegistry: N device runtimes built from one YAML config.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use voltkit_core::client::Client;
use voltkit_core::error::{ConfigError, Error};
use voltkit_core::snapshot::DeviceSnapshot;
use voltkit_core::transport::Sink;
use voltkit_io::TransportFactory;

use crate::config::{self, Mode, ResolvedDevice, RuntimeConfig};
use crate::device::DeviceRuntime;
use crate::plugin::{load_plugins, PluginRegistry};
use crate::sink_factory::build_sinks;

/// Resolved pipeline info for one device, as shown by `--dry-run`. No I/O
/// is involved in producing these.
#[derive(Debug, Clone)]
pub struct DeviceSummary {
    pub device_id: String,
    pub vendor: String,
    pub protocol: String,
    pub profile_id: String,
    pub transport_key: String,
    pub poll_interval: f64,
    pub mode: Mode,
    pub sink_name: String,
    pub pipeline_name: String,
    pub can_write: bool,
    pub supports_streaming: bool,
}

/// Holds the device runtimes and the named sinks from one config file.
pub struct RuntimeRegistry {
    runtimes: Vec<DeviceRuntime>,
    sinks: BTreeMap<String, Arc<dyn Sink>>,
    capabilities: BTreeMap<String, (bool, bool)>,
}

impl std::fmt::Debug for RuntimeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeRegistry")
            .field("runtimes", &self.runtimes.len())
            .field("sinks", &self.sinks.keys().collect::<Vec<_>>())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl RuntimeRegistry {
    /// Registry over pre-built runtimes, with no named sinks. Mostly
    /// useful in tests and embedders that construct clients themselves.
    pub fn new(runtimes: Vec<DeviceRuntime>) -> Self {
        Self {
            runtimes,
            sinks: BTreeMap::new(),
            capabilities: BTreeMap::new(),
        }
    }

    /// Build every device runtime from a YAML config file.
    ///
    /// Uses the built-in plugin registry and transport factory when none
    /// are supplied. Any unresolved reference or client build failure is
    /// fatal.
    pub fn from_config(
        path: impl AsRef<Path>,
        plugin_registry: Option<&PluginRegistry>,
        transport_factory: Option<&TransportFactory>,
    ) -> Result<Self, Error> {
        let config = config::load_config(path)?;
        Self::from_parsed_config(&config, plugin_registry, transport_factory)
    }

    pub fn from_parsed_config(
        config: &RuntimeConfig,
        plugin_registry: Option<&PluginRegistry>,
        transport_factory: Option<&TransportFactory>,
    ) -> Result<Self, Error> {
        let default_plugins;
        let plugins = match plugin_registry {
            Some(registry) => registry,
            None => {
                default_plugins = load_plugins();
                &default_plugins
            }
        };
        let default_factory;
        let factory = match transport_factory {
            Some(factory) => factory,
            None => {
                default_factory = TransportFactory::new();
                &default_factory
            }
        };

        let sinks = build_sinks(&config.sinks)?;

        let mut runtimes = Vec::with_capacity(config.devices.len());
        let mut capabilities = BTreeMap::new();
        for (index, entry) in config.devices.iter().enumerate() {
            let resolved = config::resolve_device(config, entry, index)?;
            let (runtime, caps) = build_runtime(&resolved, plugins, factory)?;
            capabilities.insert(resolved.id.clone(), caps);
            runtimes.push(runtime);
        }

        info!(devices = runtimes.len(), sinks = sinks.len(), "runtime registry built");
        Ok(Self {
            runtimes,
            sinks,
            capabilities,
        })
    }

    pub fn len(&self) -> usize {
        self.runtimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceRuntime> {
        self.runtimes.iter().find(|r| r.device_id == device_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceRuntime> {
        self.runtimes.iter()
    }

    /// Named sink lookup.
    pub fn sink(&self, name: &str) -> Option<Arc<dyn Sink>> {
        self.sinks.get(name).cloned()
    }

    /// The sink configured for a device, if any.
    pub fn device_sink(&self, device_id: &str) -> Option<Arc<dyn Sink>> {
        let runtime = self.get(device_id)?;
        self.sinks.get(&runtime.sink_name).cloned()
    }

    /// Poll every device once, sequentially. Errors are captured
    /// per-device into snapshots, never raised.
    pub fn poll_all_once(&mut self, connect: bool, disconnect: bool) -> Vec<DeviceSnapshot> {
        self.runtimes
            .iter_mut()
            .map(|runtime| runtime.poll_once(connect, disconnect))
            .collect()
    }

    /// Resolved pipeline info per device; no I/O, no connections.
    pub fn dry_run(&self) -> Vec<DeviceSummary> {
        self.runtimes
            .iter()
            .map(|runtime| {
                let (can_write, supports_streaming) = self
                    .capabilities
                    .get(&runtime.device_id)
                    .copied()
                    .unwrap_or((false, false));
                DeviceSummary {
                    device_id: runtime.device_id.clone(),
                    vendor: runtime.vendor.clone(),
                    protocol: runtime.protocol.clone(),
                    profile_id: runtime.profile_id.clone(),
                    transport_key: runtime.transport_key.clone(),
                    poll_interval: runtime.poll_interval,
                    mode: runtime.mode,
                    sink_name: runtime.sink_name.clone(),
                    pipeline_name: runtime.pipeline_name.clone(),
                    can_write,
                    supports_streaming,
                }
            })
            .collect()
    }

    /// Tear the registry apart for the executor: runtimes plus sinks.
    pub fn into_parts(self) -> (Vec<DeviceRuntime>, BTreeMap<String, Arc<dyn Sink>>) {
        (self.runtimes, self.sinks)
    }
}

/// Build one client and wrap it into a runtime, following the plugin
/// manifest's factories.
fn build_runtime(
    resolved: &ResolvedDevice,
    plugins: &PluginRegistry,
    factory: &TransportFactory,
) -> Result<(DeviceRuntime, (bool, bool)), Error> {
    let manifest = plugins
        .get(&resolved.vendor, &resolved.protocol)
        .ok_or_else(|| {
            ConfigError::Invalid(format!(
                "no plugin registered for vendor='{}' protocol='{}'; available: {:?}",
                resolved.vendor,
                resolved.protocol,
                plugins.keys()
            ))
        })?;

    let profile = (manifest.profile_loader)(&resolved.profile_id).ok_or_else(|| {
        ConfigError::Invalid(format!(
            "device '{}': unknown profile '{}' (plugin {} supports {:?})",
            resolved.id,
            resolved.profile_id,
            manifest.key(),
            manifest.profile_ids
        ))
    })?;

    let transport = factory.create(&resolved.transport_key, &resolved.transport_opts)?;
    let protocol_layer = (manifest.protocol_layer_factory)();
    let mut parser = (manifest.parser_factory)();
    if let Some(schema_loader) = &manifest.schema_loader {
        schema_loader(&profile, &mut parser)?;
    }

    let mut client = Client::builder(transport, profile)
        .device_address(resolved.device_address)
        .protocol(protocol_layer)
        .parser(parser)
        .build();

    if let Some(handler_loader) = &manifest.handler_loader {
        let profile = client.profile().clone();
        handler_loader(client.state_mut(), &profile)?;
    }

    if resolved.mode == Mode::Push && !client.supports_push() {
        warn!(
            device = %resolved.id,
            transport = %resolved.transport_key,
            "push mode configured on a transport without push support"
        );
    }

    let runtime = DeviceRuntime::new(
        &resolved.id,
        client,
        &resolved.vendor,
        &resolved.protocol,
        &resolved.profile_id,
        &resolved.transport_key,
        resolved.poll_interval,
        resolved.sink.as_deref().unwrap_or("memory"),
        &resolved.pipeline,
        resolved.mode,
    );
    let caps = (
        manifest.capabilities.write,
        manifest.capabilities.stream,
    );
    Ok((runtime, caps))
}
