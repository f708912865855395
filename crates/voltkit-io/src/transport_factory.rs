//! Transport factory: maps config transport keys to constructors.
//!
//! The runtime resolves `transport.key` from YAML and asks the factory
//! for an instance, passing the merged `opts` mapping through. Plugins
//! register additional keys (an MQTT transport registers `mqtt` and so
//! on); the built-in `memory` key backs tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use voltkit_core::error::ConfigError;
use voltkit_core::transport::Transport;

use crate::transport_memory::MemoryTransport;

/// Merged transport options from config (`defaults.transport.opts`
/// overlaid with the device entry's opts).
pub type TransportOpts = BTreeMap<String, serde_yaml::Value>;

/// Constructor registered for one transport key.
pub type TransportCtor =
    Arc<dyn Fn(&TransportOpts) -> Result<Box<dyn Transport>, ConfigError> + Send + Sync>;

pub struct TransportFactory {
    ctors: BTreeMap<String, TransportCtor>,
}

impl TransportFactory {
    /// Empty factory with no keys registered.
    pub fn empty() -> Self {
        Self {
            ctors: BTreeMap::new(),
        }
    }

    /// Factory with the built-in `memory` transport registered.
    pub fn new() -> Self {
        let mut factory = Self::empty();
        factory
            .ctors
            .insert("memory".to_string(), Arc::new(memory_ctor));
        factory
    }

    pub fn register(&mut self, key: &str, ctor: TransportCtor) -> Result<(), ConfigError> {
        if self.ctors.contains_key(key) {
            return Err(ConfigError::Invalid(format!(
                "transport key '{key}' already registered"
            )));
        }
        self.ctors.insert(key.to_string(), ctor);
        Ok(())
    }

    pub fn create(
        &self,
        key: &str,
        opts: &TransportOpts,
    ) -> Result<Box<dyn Transport>, ConfigError> {
        let ctor = self
            .ctors
            .get(key)
            .ok_or_else(|| ConfigError::UnknownTransport(key.to_string()))?;
        ctor(opts)
    }

    pub fn keys(&self) -> Vec<String> {
        self.ctors.keys().cloned().collect()
    }
}

impl Default for TransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn memory_ctor(opts: &TransportOpts) -> Result<Box<dyn Transport>, ConfigError> {
    let push = opts
        .get("push")
        .and_then(serde_yaml::Value::as_bool)
        .unwrap_or(false);
    let (transport, _handle) = MemoryTransport::new();
    let transport = if push {
        transport.push_capable()
    } else {
        transport
    };
    Ok(Box::new(transport))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_key_is_built_in() {
        let factory = TransportFactory::new();
        assert_eq!(factory.keys(), vec!["memory"]);

        let transport = factory.create("memory", &TransportOpts::new()).expect("create");
        assert!(!transport.supports_push());

        let opts = TransportOpts::from([("push".to_string(), serde_yaml::Value::Bool(true))]);
        let transport = factory.create("memory", &opts).expect("create");
        assert!(transport.supports_push());
    }

    #[test]
    fn unknown_key_is_a_config_error() {
        let factory = TransportFactory::new();
        assert!(matches!(
            factory.create("mqtt", &TransportOpts::new()),
            Err(ConfigError::UnknownTransport(_))
        ));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut factory = TransportFactory::new();
        let err = factory
            .register("memory", Arc::new(memory_ctor))
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }
}
