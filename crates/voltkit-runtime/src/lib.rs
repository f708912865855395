//! # voltkit-runtime - Multi-Device Runtime
//!
//! Config-driven runtime for running N power-station clients
//! concurrently:
//!
//! - **Config**: YAML with defaults, devices, pipeline templates and
//!   named sinks; `${VAR}` expansion; validation at load time
//! - **Plugins**: vendor+protocol manifests bundling profile lookup,
//!   protocol layer, parser and schema pack
//! - **RuntimeRegistry**: builds one [`device::DeviceRuntime`] per config
//!   entry; supports one-shot polling and dry-run reporting
//! - **Executor**: per-device poll loops or push adapters, bounded
//!   queues with drop policies, a sink worker, per-device metrics,
//!   reconnect policy and graceful shutdown

pub mod config;
pub mod device;
pub mod executor;
pub mod metrics;
pub mod plugin;
pub mod push;
pub mod queue;
pub mod registry;
pub mod sink_factory;

pub use config::{Mode, RuntimeConfig, SinkSpec};
pub use device::DeviceRuntime;
pub use executor::{Executor, ExecutorConfig};
pub use metrics::DeviceMetrics;
pub use plugin::{load_plugins, PluginManifest, PluginRegistry};
pub use push::{default_decode, DecodeFn, PushAdapter};
pub use queue::{DropPolicy, SnapshotQueue};
pub use registry::{DeviceSummary, RuntimeRegistry};
pub use sink_factory::build_sinks;
