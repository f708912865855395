//! Device profiles: pure configuration data.
//!
//! A profile maps block groups to the block ids a given device model
//! exposes, with a recommended poll interval per group. Profiles carry no
//! schemas; schemas are resolved from a registry at client construction.

use std::collections::BTreeMap;

/// Definition of one block group within a profile.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockGroupDef {
    pub blocks: Vec<u16>,
    pub description: String,
    /// Recommended poll interval in seconds.
    pub poll_interval: u32,
}

impl BlockGroupDef {
    pub fn new(blocks: Vec<u16>, description: &str, poll_interval: u32) -> Self {
        Self {
            blocks,
            description: description.to_string(),
            poll_interval,
        }
    }
}

/// Device-model configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProfile {
    /// Model identifier, e.g. `ES1100`.
    pub model: String,
    /// Numeric type id the cloud uses for this model.
    pub type_id: String,
    /// Protocol identifier, e.g. `v2`.
    pub protocol: String,
    pub description: String,
    /// Group name → group definition. Keys are the canonical names of
    /// [`crate::state::BlockGroup`].
    pub groups: BTreeMap<String, BlockGroupDef>,
}

impl DeviceProfile {
    /// All block ids across every group, deduplicated and sorted.
    pub fn all_blocks(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self
            .groups
            .values()
            .flat_map(|g| g.blocks.iter().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn group(&self, name: &str) -> Option<&BlockGroupDef> {
        self.groups.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_blocks_dedupes_across_groups() {
        let profile = DeviceProfile {
            model: "ES1100".into(),
            type_id: "31".into(),
            protocol: "v2".into(),
            description: String::new(),
            groups: BTreeMap::from([
                (
                    "core".to_string(),
                    BlockGroupDef::new(vec![100, 1300], "dashboard", 5),
                ),
                (
                    "grid".to_string(),
                    BlockGroupDef::new(vec![1300], "grid input", 5),
                ),
            ]),
        };
        assert_eq!(profile.all_blocks(), vec![100, 1300]);
    }
}
