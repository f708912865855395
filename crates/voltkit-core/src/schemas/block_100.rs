//! Block 100 (`APP_HOME_DATA`) - main dashboard block.
//!
//! Primary data source for SOC, pack electricals, identity strings and,
//! from protocol 2001 on, system-wide power and energy totals.

use crate::datatypes::DataType;
use crate::error::SchemaError;
use crate::schema::{BlockSchema, EvidenceStatus, Field};
use crate::transform::Transform;

pub(super) fn schema() -> Result<BlockSchema, SchemaError> {
    BlockSchema::builder(100, "APP_HOME_DATA")
        .description("Main dashboard data: SOC, pack electricals, power and energy totals")
        .min_length(52)
        .strict(false)
        .evidence(EvidenceStatus::Reference)
        .field(
            Field::new("pack_voltage", 0, DataType::UInt16)
                .with_transform([Transform::Scale(0.1)])
                .with_unit("V"),
        )
        .field(
            Field::new("pack_current", 2, DataType::Int16)
                .with_transform([Transform::Scale(0.1)])
                .with_unit("A")
                .with_description("Signed; negative while discharging"),
        )
        .field(
            Field::new("soc", 4, DataType::UInt16)
                .with_unit("%")
                .with_transform([Transform::Clamp { lo: 0.0, hi: 100.0 }]),
        )
        .field(Field::new("charging_status", 6, DataType::UInt16))
        .field(
            Field::new("chg_full_time", 8, DataType::UInt16)
                .with_unit("min")
                .with_description("Minutes to full charge"),
        )
        .field(
            Field::new("dsg_empty_time", 10, DataType::UInt16)
                .with_unit("min")
                .with_description("Minutes to empty at current draw"),
        )
        .field(Field::new("pack_count", 15, DataType::UInt8))
        .field(Field::new("pack_online", 16, DataType::Bitmap { bits: 16 }))
        .field(Field::new("device_model", 20, DataType::String { length: 12 }))
        .field(Field::new("device_sn", 32, DataType::String { length: 8 }))
        .field(Field::new("inv_count", 41, DataType::UInt8))
        .field(Field::new("inv_online", 42, DataType::Bitmap { bits: 16 }))
        .field(Field::new("energy_lines", 46, DataType::Bitmap { bits: 16 }))
        .field(Field::new("ctrl_status", 48, DataType::Bitmap { bits: 16 }))
        .field(Field::new("grid_parallel_soc", 51, DataType::UInt8).with_unit("%"))
        // Extended telemetry, protocol 2001+
        .field(
            Field::new("alarm_info", 52, DataType::Bitmap { bits: 64 })
                .optional()
                .with_min_version(2001),
        )
        .field(
            Field::new("total_dc_power", 80, DataType::UInt32)
                .optional()
                .with_min_version(2001)
                .with_unit("W"),
        )
        .field(
            Field::new("total_ac_power", 84, DataType::UInt32)
                .optional()
                .with_min_version(2001)
                .with_unit("W"),
        )
        .field(
            Field::new("total_pv_power", 88, DataType::UInt32)
                .optional()
                .with_min_version(2001)
                .with_unit("W"),
        )
        .field(
            Field::new("total_grid_power", 92, DataType::Int32)
                .optional()
                .with_min_version(2001)
                .with_unit("W")
                .with_description("Signed; negative while exporting"),
        )
        .field(
            Field::new("total_inv_power", 96, DataType::UInt32)
                .optional()
                .with_min_version(2001)
                .with_unit("W"),
        )
        .field(
            Field::new("total_dc_energy", 100, DataType::UInt32)
                .optional()
                .with_min_version(2001)
                .with_transform([Transform::Scale(0.1)])
                .with_unit("kWh"),
        )
        .field(
            Field::new("total_ac_energy", 104, DataType::UInt32)
                .optional()
                .with_min_version(2001)
                .with_transform([Transform::Scale(0.1)])
                .with_unit("kWh"),
        )
        .field(
            Field::new("total_pv_charge_energy", 108, DataType::UInt32)
                .optional()
                .with_min_version(2001)
                .with_transform([Transform::Scale(0.1)])
                .with_unit("kWh"),
        )
        .field(
            Field::new("total_grid_charge_energy", 112, DataType::UInt32)
                .optional()
                .with_min_version(2001)
                .with_transform([Transform::Scale(0.1)])
                .with_unit("kWh"),
        )
        .field(
            Field::new("total_feedback_energy", 116, DataType::UInt32)
                .optional()
                .with_min_version(2001)
                .with_transform([Transform::Scale(0.1)])
                .with_unit("kWh"),
        )
        .build()
}
