//! Build named sink instances from the parsed `sinks` config section.
//!
//! Composite sinks are built after their members via recursive
//! memoisation; cycle detection has already run during config validation.

use std::collections::BTreeMap;
use std::sync::Arc;

use voltkit_core::error::ConfigError;
use voltkit_core::transport::Sink;
use voltkit_io::{CompositeSink, JsonlSink, MemorySink};

use crate::config::SinkSpec;

pub fn build_sinks(
    specs: &BTreeMap<String, SinkSpec>,
) -> Result<BTreeMap<String, Arc<dyn Sink>>, ConfigError> {
    fn build(
        name: &str,
        specs: &BTreeMap<String, SinkSpec>,
        built: &mut BTreeMap<String, Arc<dyn Sink>>,
    ) -> Result<Arc<dyn Sink>, ConfigError> {
        if let Some(sink) = built.get(name) {
            return Ok(Arc::clone(sink));
        }
        let spec = specs
            .get(name)
            .ok_or_else(|| ConfigError::UnknownSink(name.to_string()))?;
        let sink: Arc<dyn Sink> = match spec {
            SinkSpec::Memory { maxlen } => Arc::new(MemorySink::new(*maxlen)),
            SinkSpec::Jsonl { path } => Arc::new(JsonlSink::new(path)),
            SinkSpec::Composite { sinks } => {
                let members = sinks
                    .iter()
                    .map(|sub| build(sub, specs, built))
                    .collect::<Result<Vec<_>, _>>()?;
                Arc::new(CompositeSink::new(members))
            }
        };
        built.insert(name.to_string(), Arc::clone(&sink));
        Ok(sink)
    }

    let mut built = BTreeMap::new();
    for name in specs.keys() {
        build(name, specs, &mut built)?;
    }
    Ok(built)
}
