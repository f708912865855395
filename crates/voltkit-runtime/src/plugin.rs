//! Plugin manifests: declarative descriptors for a vendor+protocol stack.
//!
//! A plugin bundles everything needed to build a client for one device
//! family: profile lookup, protocol layer, parser, and the schema pack
//! loader that seeds the parser for a given profile. The registry is
//! keyed by `<vendor>/<protocol>`.

use std::sync::Arc;

use voltkit_core::error::Error;
use voltkit_core::modbus::{ModbusRtu, ProtocolLayer};
use voltkit_core::parser::BlockParser;
use voltkit_core::profile::DeviceProfile;
use voltkit_core::state::DeviceState;
use voltkit_core::{profiles, registry::SchemaRegistry};

pub type ProfileLoader = Arc<dyn Fn(&str) -> Option<DeviceProfile> + Send + Sync>;
pub type ProtocolLayerFactory = Arc<dyn Fn() -> Box<dyn ProtocolLayer> + Send + Sync>;
pub type ParserFactory = Arc<dyn Fn() -> BlockParser + Send + Sync>;
/// Registers the plugin's schema pack for `profile` into the parser.
pub type SchemaLoader =
    Arc<dyn Fn(&DeviceProfile, &mut BlockParser) -> Result<(), Error> + Send + Sync>;
/// Optional hook run after client construction, e.g. to seed state.
pub type HandlerLoader =
    Arc<dyn Fn(&mut DeviceState, &DeviceProfile) -> Result<(), Error> + Send + Sync>;

/// Feature flags advertised by a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginCapabilities {
    pub read: bool,
    pub write: bool,
    pub stream: bool,
}

impl Default for PluginCapabilities {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            stream: false,
        }
    }
}

/// Immutable descriptor for one vendor+protocol plugin.
#[derive(Clone)]
pub struct PluginManifest {
    pub vendor: String,
    pub protocol: String,
    pub version: String,
    pub description: String,
    pub profile_ids: Vec<String>,
    pub transport_keys: Vec<String>,
    pub schema_pack_version: String,
    pub capabilities: PluginCapabilities,
    pub profile_loader: ProfileLoader,
    pub protocol_layer_factory: ProtocolLayerFactory,
    pub parser_factory: ParserFactory,
    pub schema_loader: Option<SchemaLoader>,
    pub handler_loader: Option<HandlerLoader>,
}

impl PluginManifest {
    /// Canonical plugin key: `<vendor>/<protocol>`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.vendor, self.protocol)
    }

    pub fn can_write(&self) -> bool {
        self.capabilities.write
    }
}

impl std::fmt::Debug for PluginManifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManifest")
            .field("vendor", &self.vendor)
            .field("protocol", &self.protocol)
            .field("version", &self.version)
            .field("profile_ids", &self.profile_ids)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Registry of manifests keyed by `<vendor>/<protocol>`.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    manifests: std::collections::BTreeMap<String, Arc<PluginManifest>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, manifest: PluginManifest) -> Result<(), Error> {
        let key = manifest.key();
        if self.manifests.contains_key(&key) {
            return Err(Error::Config(voltkit_core::error::ConfigError::Invalid(
                format!("plugin already registered: '{key}'"),
            )));
        }
        self.manifests.insert(key, Arc::new(manifest));
        Ok(())
    }

    pub fn get(&self, vendor: &str, protocol: &str) -> Option<Arc<PluginManifest>> {
        self.manifests.get(&format!("{vendor}/{protocol}")).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.manifests.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }
}

/// The built-in `volta/v2` plugin: built-in profiles, Modbus RTU framing
/// and the built-in schema catalog.
pub fn volta_v2_manifest() -> PluginManifest {
    PluginManifest {
        vendor: "volta".to_string(),
        protocol: "v2".to_string(),
        version: "1.0.0".to_string(),
        description: "Volta power stations, block protocol v2".to_string(),
        profile_ids: profiles::profile_ids()
            .into_iter()
            .map(str::to_string)
            .collect(),
        transport_keys: vec!["mqtt".to_string(), "memory".to_string()],
        schema_pack_version: "1.0.0".to_string(),
        capabilities: PluginCapabilities {
            read: true,
            write: false,
            stream: true,
        },
        profile_loader: Arc::new(profiles::load_profile),
        protocol_layer_factory: Arc::new(|| Box::new(ModbusRtu)),
        parser_factory: Arc::new(BlockParser::new),
        schema_loader: Some(Arc::new(|profile, parser| {
            let catalog = SchemaRegistry::with_builtins();
            let resolved = catalog.resolve_blocks(&profile.all_blocks(), false)?;
            for (_, schema) in resolved {
                parser.register_schema(schema)?;
            }
            Ok(())
        })),
        handler_loader: None,
    }
}

/// Build the static plugin registry with all built-in plugins.
pub fn load_plugins() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry
        .register(volta_v2_manifest())
        .unwrap_or_else(|_| unreachable!("fresh registry accepts the built-in plugin"));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_plugin_is_registered() {
        let registry = load_plugins();
        assert_eq!(registry.keys(), vec!["volta/v2"]);

        let manifest = registry.get("volta", "v2").expect("manifest");
        assert!(manifest.capabilities.read);
        assert!(!manifest.can_write());
        assert!((manifest.profile_loader)("ES1100").is_some());
        assert!((manifest.profile_loader)("EB3A").is_none());
    }

    #[test]
    fn schema_loader_seeds_parser() {
        let manifest = volta_v2_manifest();
        let profile = (manifest.profile_loader)("ES1100").expect("profile");
        let mut parser = (manifest.parser_factory)();
        (manifest.schema_loader.as_ref().expect("loader"))(&profile, &mut parser)
            .expect("schema pack");
        assert!(parser.get_schema(100).is_some());
        assert!(parser.get_schema(1300).is_some());
    }

    #[test]
    fn duplicate_plugin_rejected() {
        let mut registry = load_plugins();
        assert!(registry.register(volta_v2_manifest()).is_err());
    }
}
