//! Runtime YAML configuration: loading, environment expansion and
//! validation.
//!
//! ```yaml
//! version: 1
//! defaults:
//!   vendor: volta
//!   protocol: v2
//!   poll_interval: 30
//!   transport: { key: memory, opts: {} }
//! devices:
//!   - id: garage
//!     profile_id: ES1100
//!     options: { device_address: 1 }
//!     sink: disk
//! pipelines:
//!   lab: { vendor: volta, protocol: v2, transport: memory }
//! sinks:
//!   disk: { type: jsonl, path: /var/log/voltkit/garage.jsonl }
//! ```
//!
//! `${VAR}` references are expanded everywhere before validation.
//! Validation failures are [`ConfigError`]s and fatal at construction.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use voltkit_core::error::ConfigError;
use voltkit_io::TransportOpts;

pub const DEFAULT_POLL_INTERVAL: f64 = 30.0;

/// Top-level runtime config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    pub version: i64,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
    #[serde(default)]
    pub pipelines: BTreeMap<String, PipelineSpec>,
    #[serde(default)]
    pub sinks: BTreeMap<String, SinkSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    pub vendor: Option<String>,
    pub protocol: Option<String>,
    pub poll_interval: Option<f64>,
    pub transport: Option<TransportSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportSpec {
    pub key: Option<String>,
    #[serde(default)]
    pub opts: TransportOpts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Pull,
    Push,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Pull => "pull",
            Mode::Push => "push",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceEntry {
    pub id: String,
    pub profile_id: String,
    pub vendor: Option<String>,
    pub protocol: Option<String>,
    pub transport: Option<TransportSpec>,
    pub pipeline: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, serde_yaml::Value>,
    pub poll_interval: Option<f64>,
    #[serde(default)]
    pub mode: Mode,
    pub sink: Option<String>,
}

/// Pipeline template: fallback values for vendor/protocol/transport key.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSpec {
    pub vendor: Option<String>,
    pub protocol: Option<String>,
    pub transport: Option<String>,
}

/// Named sink declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkSpec {
    Memory {
        #[serde(default = "default_maxlen")]
        maxlen: usize,
    },
    Jsonl {
        path: String,
    },
    Composite {
        sinks: Vec<String>,
    },
}

fn default_maxlen() -> usize {
    100
}

/// One device entry after resolution against pipeline and defaults.
#[derive(Debug, Clone)]
pub struct ResolvedDevice {
    pub id: String,
    pub profile_id: String,
    pub vendor: String,
    pub protocol: String,
    pub transport_key: String,
    pub transport_opts: TransportOpts,
    pub device_address: u8,
    pub poll_interval: f64,
    pub mode: Mode,
    pub sink: Option<String>,
    pub pipeline: String,
}

/// Load, expand and validate a config file.
pub fn load_config(path: impl AsRef<Path>) -> Result<RuntimeConfig, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut raw: serde_yaml::Value =
        serde_yaml::from_str(&text).map_err(|e| ConfigError::Yaml {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    expand_env(&mut raw);

    let config: RuntimeConfig =
        serde_yaml::from_value(raw).map_err(|e| ConfigError::Yaml {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    validate(&config)?;
    Ok(config)
}

/// Recursively expand `${VAR}` in every string. Unset variables are left
/// verbatim so the validation error points at the reference.
fn expand_env(value: &mut serde_yaml::Value) {
    match value {
        serde_yaml::Value::String(s) => {
            if s.contains("${") {
                *s = expand_env_str(s);
            }
        }
        serde_yaml::Value::Sequence(items) => items.iter_mut().for_each(expand_env),
        serde_yaml::Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                expand_env(v);
            }
        }
        _ => {}
    }
}

fn expand_env_str(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        match tail.find('}') {
            Some(end) => {
                let name = &tail[..end];
                match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

fn validate(config: &RuntimeConfig) -> Result<(), ConfigError> {
    if config.version < 1 {
        return Err(ConfigError::Invalid(format!(
            "invalid config version: {}",
            config.version
        )));
    }
    if config.devices.is_empty() {
        return Err(ConfigError::Invalid(
            "'devices' must be a non-empty list".to_string(),
        ));
    }

    let mut seen = BTreeSet::new();
    for (index, entry) in config.devices.iter().enumerate() {
        if entry.id.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "devices[{index}].id is required"
            )));
        }
        if !seen.insert(entry.id.clone()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate device id: '{}'",
                entry.id
            )));
        }
        if entry.profile_id.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "devices[{index}]: 'profile_id' is required"
            )));
        }
        if let Some(pipeline) = &entry.pipeline {
            if !config.pipelines.contains_key(pipeline) {
                return Err(ConfigError::Invalid(format!(
                    "devices[{index}]: pipeline '{pipeline}' not found; available: {:?}",
                    config.pipelines.keys().collect::<Vec<_>>()
                )));
            }
        }
        if let Some(sink) = &entry.sink {
            if !config.sinks.contains_key(sink) {
                return Err(ConfigError::UnknownSink(sink.clone()));
            }
        }
        // Resolution itself reports unresolved vendor/protocol/transport.
        resolve_device(config, entry, index)?;
    }

    validate_sinks(&config.sinks)?;
    Ok(())
}

/// Check sink references and reject composite cycles.
fn validate_sinks(sinks: &BTreeMap<String, SinkSpec>) -> Result<(), ConfigError> {
    fn visit(
        name: &str,
        sinks: &BTreeMap<String, SinkSpec>,
        visiting: &mut BTreeSet<String>,
        done: &mut BTreeSet<String>,
    ) -> Result<(), ConfigError> {
        if done.contains(name) {
            return Ok(());
        }
        if !visiting.insert(name.to_string()) {
            return Err(ConfigError::Invalid(format!(
                "composite sink cycle involving '{name}'"
            )));
        }
        if let Some(SinkSpec::Composite { sinks: subs }) = sinks.get(name) {
            for sub in subs {
                if !sinks.contains_key(sub) {
                    return Err(ConfigError::UnknownSink(sub.clone()));
                }
                visit(sub, sinks, visiting, done)?;
            }
        }
        visiting.remove(name);
        done.insert(name.to_string());
        Ok(())
    }

    let mut done = BTreeSet::new();
    for name in sinks.keys() {
        visit(name, sinks, &mut BTreeSet::new(), &mut done)?;
    }
    Ok(())
}

/// Resolve one device entry: entry → pipeline template → defaults.
pub fn resolve_device(
    config: &RuntimeConfig,
    entry: &DeviceEntry,
    index: usize,
) -> Result<ResolvedDevice, ConfigError> {
    let pipeline_name = entry.pipeline.clone().unwrap_or_else(|| "direct".to_string());
    let pipeline = entry
        .pipeline
        .as_ref()
        .and_then(|name| config.pipelines.get(name))
        .cloned()
        .unwrap_or_default();

    let vendor = entry
        .vendor
        .clone()
        .or(pipeline.vendor)
        .or_else(|| config.defaults.vendor.clone())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            ConfigError::Invalid(format!(
                "devices[{index}]: 'vendor' is required (entry, pipeline or defaults)"
            ))
        })?;

    let protocol = entry
        .protocol
        .clone()
        .or(pipeline.protocol)
        .or_else(|| config.defaults.protocol.clone())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            ConfigError::Invalid(format!(
                "devices[{index}]: 'protocol' is required (entry, pipeline or defaults)"
            ))
        })?;

    let default_transport = config.defaults.transport.clone().unwrap_or_default();
    let entry_transport = entry.transport.clone().unwrap_or_default();
    let transport_key = entry_transport
        .key
        .or(pipeline.transport)
        .or(default_transport.key.clone())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            ConfigError::Invalid(format!(
                "devices[{index}]: 'transport.key' is required (entry, pipeline or defaults)"
            ))
        })?;

    // Entry opts overlay the defaults.
    let mut transport_opts = default_transport.opts;
    transport_opts.extend(entry_transport.opts);

    let device_address = match entry.options.get("device_address") {
        None => 1,
        Some(value) => {
            let address = value.as_u64().ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "devices[{index}]: options.device_address must be a positive integer"
                ))
            })?;
            u8::try_from(address).ok().filter(|a| *a > 0).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "devices[{index}]: options.device_address {address} out of range [1, 255]"
                ))
            })?
        }
    };

    let raw_interval = entry
        .poll_interval
        .or(config.defaults.poll_interval)
        .unwrap_or(DEFAULT_POLL_INTERVAL);
    let poll_interval = if raw_interval > 0.0 && raw_interval.is_finite() {
        raw_interval
    } else {
        warn!(
            device = %entry.id,
            raw_interval,
            "invalid poll_interval; using {DEFAULT_POLL_INTERVAL}s"
        );
        DEFAULT_POLL_INTERVAL
    };

    Ok(ResolvedDevice {
        id: entry.id.clone(),
        profile_id: entry.profile_id.clone(),
        vendor,
        protocol,
        transport_key,
        transport_opts,
        device_address,
        poll_interval,
        mode: entry.mode,
        sink: entry.sink.clone(),
        pipeline: pipeline_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(text.as_bytes()).expect("write");
        file
    }

    const BASIC: &str = r#"
version: 1
defaults:
  vendor: volta
  protocol: v2
  poll_interval: 10
  transport:
    key: memory
    opts:
      region: eu
devices:
  - id: garage
    profile_id: ES1100
    options:
      device_address: 2
    transport:
      opts:
        region: us
  - id: cabin
    profile_id: ES600
    mode: push
"#;

    #[test]
    fn basic_config_resolves() {
        let file = write_config(BASIC);
        let config = load_config(file.path()).expect("load");
        assert_eq!(config.version, 1);
        assert_eq!(config.devices.len(), 2);

        let garage = resolve_device(&config, &config.devices[0], 0).expect("resolve");
        assert_eq!(garage.vendor, "volta");
        assert_eq!(garage.transport_key, "memory");
        assert_eq!(garage.device_address, 2);
        assert_eq!(garage.poll_interval, 10.0);
        assert_eq!(garage.mode, Mode::Pull);
        // Entry opts overlay defaults.
        assert_eq!(
            garage.transport_opts.get("region").and_then(|v| v.as_str()),
            Some("us")
        );

        let cabin = resolve_device(&config, &config.devices[1], 1).expect("resolve");
        assert_eq!(cabin.mode, Mode::Push);
        assert_eq!(cabin.device_address, 1);
        assert_eq!(cabin.pipeline, "direct");
    }

    #[test]
    fn pipeline_template_fills_gaps() {
        let file = write_config(
            r#"
version: 1
devices:
  - id: d1
    profile_id: ES1100
    pipeline: lab
pipelines:
  lab:
    vendor: volta
    protocol: v2
    transport: memory
"#,
        );
        let config = load_config(file.path()).expect("load");
        let resolved = resolve_device(&config, &config.devices[0], 0).expect("resolve");
        assert_eq!(resolved.vendor, "volta");
        assert_eq!(resolved.transport_key, "memory");
        assert_eq!(resolved.pipeline, "lab");
    }

    #[test]
    fn pipeline_template_beats_defaults() {
        // Both the referenced pipeline and defaults set vendor/protocol/
        // transport; the pipeline wins for the device that names it, the
        // entry itself still wins over both.
        let file = write_config(
            r#"
version: 1
defaults:
  vendor: acme
  protocol: v9
  transport: { key: memory }
devices:
  - id: d1
    profile_id: ES1100
    pipeline: lab
  - id: d2
    profile_id: ES600
    pipeline: lab
    vendor: volta
    transport: { key: memory }
pipelines:
  lab:
    vendor: volta
    protocol: v2
    transport: mqtt
"#,
        );
        let config = load_config(file.path()).expect("load");

        let d1 = resolve_device(&config, &config.devices[0], 0).expect("resolve");
        assert_eq!(d1.vendor, "volta");
        assert_eq!(d1.protocol, "v2");
        assert_eq!(d1.transport_key, "mqtt");

        let d2 = resolve_device(&config, &config.devices[1], 1).expect("resolve");
        assert_eq!(d2.vendor, "volta");
        assert_eq!(d2.protocol, "v2");
        assert_eq!(d2.transport_key, "memory");
    }

    #[test]
    fn missing_pipeline_reference_fails() {
        let file = write_config(
            r#"
version: 1
devices:
  - id: d1
    profile_id: ES1100
    vendor: volta
    protocol: v2
    transport: { key: memory }
    pipeline: nope
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn duplicate_ids_and_empty_devices_fail() {
        let file = write_config(
            r#"
version: 1
defaults: { vendor: volta, protocol: v2, transport: { key: memory } }
devices:
  - { id: d1, profile_id: ES1100 }
  - { id: d1, profile_id: ES600 }
"#,
        );
        assert!(load_config(file.path())
            .unwrap_err()
            .to_string()
            .contains("duplicate device id"));

        let file = write_config("version: 1\ndevices: []\n");
        assert!(load_config(file.path())
            .unwrap_err()
            .to_string()
            .contains("non-empty"));
    }

    #[test]
    fn unresolved_vendor_fails() {
        let file = write_config(
            r#"
version: 1
devices:
  - id: d1
    profile_id: ES1100
    protocol: v2
    transport: { key: memory }
"#,
        );
        assert!(load_config(file.path())
            .unwrap_err()
            .to_string()
            .contains("vendor"));
    }

    #[test]
    fn env_vars_expand_everywhere() {
        std::env::set_var("VOLTKIT_TEST_REGION", "eu-north");
        let file = write_config(
            r#"
version: 1
defaults:
  vendor: volta
  protocol: v2
  transport:
    key: memory
    opts:
      region: ${VOLTKIT_TEST_REGION}
devices:
  - id: d1
    profile_id: ES1100
"#,
        );
        let config = load_config(file.path()).expect("load");
        let resolved = resolve_device(&config, &config.devices[0], 0).expect("resolve");
        assert_eq!(
            resolved.transport_opts.get("region").and_then(|v| v.as_str()),
            Some("eu-north")
        );
        // Unset vars stay verbatim.
        assert_eq!(expand_env_str("${VOLTKIT_TEST_UNSET}/x"), "${VOLTKIT_TEST_UNSET}/x");
    }

    #[test]
    fn sink_validation_catches_cycles_and_unknowns() {
        let file = write_config(
            r#"
version: 1
defaults: { vendor: volta, protocol: v2, transport: { key: memory } }
devices:
  - { id: d1, profile_id: ES1100, sink: both }
sinks:
  both: { type: composite, sinks: [both] }
"#,
        );
        assert!(load_config(file.path())
            .unwrap_err()
            .to_string()
            .contains("cycle"));

        let file = write_config(
            r#"
version: 1
defaults: { vendor: volta, protocol: v2, transport: { key: memory } }
devices:
  - { id: d1, profile_id: ES1100, sink: nope }
"#,
        );
        assert!(matches!(
            load_config(file.path()).unwrap_err(),
            ConfigError::UnknownSink(_)
        ));
    }

    #[test]
    fn bad_poll_interval_falls_back() {
        let file = write_config(
            r#"
version: 1
defaults: { vendor: volta, protocol: v2, transport: { key: memory } }
devices:
  - { id: d1, profile_id: ES1100, poll_interval: -4 }
"#,
        );
        let config = load_config(file.path()).expect("load");
        let resolved = resolve_device(&config, &config.devices[0], 0).expect("resolve");
        assert_eq!(resolved.poll_interval, DEFAULT_POLL_INTERVAL);
    }
}
