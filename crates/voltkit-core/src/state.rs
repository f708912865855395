//! Device state model.
//!
//! Parsed records are folded into a flat per-device state by block-id
//! mappers. The state container knows nothing about bytes, offsets or
//! transforms; mappers copy named values out of [`ParsedRecord::values`]
//! into the group sub-container they belong to. Merging is last writer
//! wins per attribute.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::record::ParsedRecord;
use crate::value::Value;

/// Block groups a device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlockGroup {
    /// Dashboard data (block 100).
    Core,
    /// Grid input (block 1300).
    Grid,
    /// Battery pack summary (block 6000).
    Battery,
    /// Per-cell detail (block 6100).
    Cells,
    /// Inverter / load output (block 1400).
    Inverter,
    /// Connectivity and firmware (blocks 720, 12002).
    Iot,
}

impl BlockGroup {
    pub const ALL: [BlockGroup; 6] = [
        BlockGroup::Core,
        BlockGroup::Grid,
        BlockGroup::Battery,
        BlockGroup::Cells,
        BlockGroup::Inverter,
        BlockGroup::Iot,
    ];

    /// Canonical name used as profile group key.
    pub fn as_str(self) -> &'static str {
        match self {
            BlockGroup::Core => "core",
            BlockGroup::Grid => "grid",
            BlockGroup::Battery => "battery",
            BlockGroup::Cells => "cells",
            BlockGroup::Inverter => "inverter",
            BlockGroup::Iot => "iot",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.as_str() == name)
    }
}

impl std::fmt::Display for BlockGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
struct GroupState {
    values: BTreeMap<String, Value>,
    last_update: Option<DateTime<Utc>>,
}

/// Flat per-device state, rebuilt incrementally as records arrive.
#[derive(Debug, Clone)]
pub struct DeviceState {
    device_id: String,
    model: String,
    protocol_version: u32,
    groups: BTreeMap<BlockGroup, GroupState>,
    last_update: Option<DateTime<Utc>>,
}

impl DeviceState {
    pub fn new(device_id: &str, model: &str, protocol_version: u32) -> Self {
        Self {
            device_id: device_id.to_string(),
            model: model.to_string(),
            protocol_version,
            groups: BTreeMap::new(),
            last_update: None,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// Fold one parsed record into the state.
    ///
    /// Dispatches by block id to the matching mapper. Unknown block ids
    /// are logged and ignored; they never fail a read.
    pub fn update_from_block(&mut self, record: &ParsedRecord) {
        let mapped = match record.block_id {
            100 => Some((BlockGroup::Core, map_home_data(&record.values))),
            1300 => Some((BlockGroup::Grid, map_grid_info(&record.values))),
            1400 => Some((BlockGroup::Inverter, map_load_info(&record.values))),
            6000 => Some((BlockGroup::Battery, map_pack_info(&record.values))),
            6100 => Some((BlockGroup::Cells, map_cell_info(&record.values))),
            720 => Some((BlockGroup::Iot, map_ota_status(&record.values))),
            12002 => Some((BlockGroup::Iot, map_wifi_settings(&record.values))),
            other => {
                warn!(block_id = other, name = %record.name, "no state mapper for block");
                None
            }
        };

        if let Some((group, values)) = mapped {
            let now = Utc::now();
            let entry = self.groups.entry(group).or_default();
            entry.values.extend(values);
            entry.last_update = Some(now);
            self.last_update = Some(now);
        }
    }

    /// Merged flat view across all groups.
    pub fn get_state(&self) -> BTreeMap<String, Value> {
        let mut merged = BTreeMap::new();
        for group in self.groups.values() {
            merged.extend(group.values.clone());
        }
        merged
    }

    /// Group-scoped view.
    pub fn get_group_state(&self, group: BlockGroup) -> BTreeMap<String, Value> {
        self.groups
            .get(&group)
            .map(|g| g.values.clone())
            .unwrap_or_default()
    }

    pub fn group_last_update(&self, group: BlockGroup) -> Option<DateTime<Utc>> {
        self.groups.get(&group).and_then(|g| g.last_update)
    }
}

/// Copy `keys` verbatim from a record's values, skipping absent and null.
fn copy_keys(values: &BTreeMap<String, Value>, keys: &[&str]) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for &key in keys {
        if let Some(value) = values.get(key) {
            if !value.is_null() {
                out.insert(key.to_string(), value.clone());
            }
        }
    }
    out
}

/// Copy with renaming: `(source_key, state_key)` pairs.
fn copy_renamed(
    values: &BTreeMap<String, Value>,
    pairs: &[(&str, &str)],
) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for &(source, target) in pairs {
        if let Some(value) = values.get(source) {
            if !value.is_null() {
                out.insert(target.to_string(), value.clone());
            }
        }
    }
    out
}

fn map_home_data(values: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    copy_keys(
        values,
        &[
            "soc",
            "pack_voltage",
            "pack_current",
            "charging_status",
            "device_model",
            "device_sn",
            "grid_parallel_soc",
            "total_dc_power",
            "total_ac_power",
            "total_pv_power",
            "total_grid_power",
            "total_inv_power",
            "total_dc_energy",
            "total_ac_energy",
            "total_feedback_energy",
        ],
    )
}

fn map_grid_info(values: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    copy_renamed(
        values,
        &[
            ("frequency", "grid_frequency"),
            ("phase_0_voltage", "grid_voltage"),
            ("phase_0_current", "grid_current"),
            ("phase_0_power", "grid_power"),
            ("phase_1_voltage", "grid_phase_1_voltage"),
            ("phase_2_voltage", "grid_phase_2_voltage"),
            ("total_charge_energy", "grid_charge_energy"),
            ("total_feedback_energy", "grid_feedback_energy"),
        ],
    )
}

fn map_load_info(values: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    copy_renamed(
        values,
        &[
            ("dc_total_power", "dc_output_power"),
            ("dc_total_energy", "dc_output_energy"),
            ("ac_total_power", "ac_output_power"),
            ("ac_total_energy", "ac_output_energy"),
            ("phase_0_voltage", "ac_output_voltage"),
            ("phase_0_current", "ac_output_current"),
            ("phase_0_frequency", "ac_output_frequency"),
            ("load_5v_power", "load_5v_power"),
            ("load_12v_power", "load_12v_power"),
            ("load_24v_power", "load_24v_power"),
        ],
    )
}

fn map_pack_info(values: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    copy_renamed(
        values,
        &[
            ("soc", "battery_soc"),
            ("soh", "battery_soh"),
            ("voltage", "battery_voltage"),
            ("current", "battery_current"),
            ("power", "battery_power"),
            ("temp_max", "battery_temp_max"),
            ("temp_min", "battery_temp_min"),
            ("temp_avg", "battery_temp_avg"),
            ("cycles", "battery_cycles"),
            ("cell_count", "battery_cell_count"),
            ("charging_status", "battery_status"),
        ],
    )
}

fn map_cell_info(values: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    copy_renamed(
        values,
        &[
            ("cell_count", "cell_count"),
            ("cells", "cells"),
            ("cell_temps", "cell_temps"),
        ],
    )
}

fn map_ota_status(values: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    copy_renamed(
        values,
        &[
            ("ota_group", "ota_group"),
            ("file0_ota_status", "ota_status"),
            ("file0_progress", "ota_progress"),
            ("file0_error_code", "ota_error_code"),
        ],
    )
}

fn map_wifi_settings(values: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    copy_renamed(
        values,
        &[
            ("wifi_ssid", "wifi_ssid"),
            ("wifi_no_password_enable", "wifi_open_network"),
        ],
    )
}
