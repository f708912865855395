//! Built-in device profiles.
//!
//! Profiles are pure data: which block groups a model supports and how
//! often each is worth polling. The runtime looks these up by profile id.

use std::collections::BTreeMap;

use crate::profile::{BlockGroupDef, DeviceProfile};

/// ES1100: 1.1 kWh, 51.2 V pack with a 1 kW inverter.
pub fn es1100() -> DeviceProfile {
    DeviceProfile {
        model: "ES1100".to_string(),
        type_id: "31".to_string(),
        protocol: "v2".to_string(),
        description: "ES1100 power station (1.1kWh, 1000W inverter)".to_string(),
        groups: BTreeMap::from([
            (
                "core".to_string(),
                BlockGroupDef::new(vec![100], "Dashboard data", 5),
            ),
            (
                "grid".to_string(),
                BlockGroupDef::new(vec![1300], "Grid input", 5),
            ),
            (
                "battery".to_string(),
                BlockGroupDef::new(vec![6000], "Battery pack summary", 10),
            ),
            (
                "cells".to_string(),
                BlockGroupDef::new(vec![6100], "Per-cell detail", 30),
            ),
            (
                "inverter".to_string(),
                BlockGroupDef::new(vec![1400], "Load output", 5),
            ),
            (
                "iot".to_string(),
                BlockGroupDef::new(vec![720, 12002], "Connectivity and firmware", 60),
            ),
        ]),
    }
}

/// ES600: compact 0.6 kWh unit without the cell-detail and inverter blocks.
pub fn es600() -> DeviceProfile {
    DeviceProfile {
        model: "ES600".to_string(),
        type_id: "27".to_string(),
        protocol: "v2".to_string(),
        description: "ES600 power station (0.6kWh, 600W inverter)".to_string(),
        groups: BTreeMap::from([
            (
                "core".to_string(),
                BlockGroupDef::new(vec![100], "Dashboard data", 5),
            ),
            (
                "grid".to_string(),
                BlockGroupDef::new(vec![1300], "Grid input", 10),
            ),
            (
                "battery".to_string(),
                BlockGroupDef::new(vec![6000], "Battery pack summary", 10),
            ),
            (
                "iot".to_string(),
                BlockGroupDef::new(vec![720], "Firmware status", 60),
            ),
        ]),
    }
}

/// Look up a built-in profile by id (case-insensitive model name).
pub fn load_profile(profile_id: &str) -> Option<DeviceProfile> {
    match profile_id.to_ascii_uppercase().as_str() {
        "ES1100" => Some(es1100()),
        "ES600" => Some(es600()),
        _ => None,
    }
}

/// Ids of all built-in profiles.
pub fn profile_ids() -> Vec<&'static str> {
    vec!["ES1100", "ES600"]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::builtin_catalog;

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(load_profile("es1100").is_some());
        assert!(load_profile("ES600").is_some());
        assert!(load_profile("EB3A").is_none());
    }

    #[test]
    fn every_profile_block_has_a_builtin_schema() {
        for id in profile_ids() {
            let profile = load_profile(id).expect("profile");
            for block_id in profile.all_blocks() {
                assert!(
                    builtin_catalog().get(block_id).is_some(),
                    "profile {id} references block {block_id} without a schema"
                );
            }
        }
    }

    #[test]
    fn every_profile_has_a_core_group() {
        for id in profile_ids() {
            let profile = load_profile(id).expect("profile");
            assert!(profile.group("core").is_some(), "profile {id} lacks core");
        }
    }
}
