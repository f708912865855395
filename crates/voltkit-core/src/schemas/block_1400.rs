//! Block 1400 (`INV_LOAD_INFO`) - load output information.
//!
//! DC load rails (5V/12V/24V) plus AC load per-phase data. The tail is
//! variable-length on multi-phase systems, so the schema is non-strict
//! with a single-phase baseline.

use crate::datatypes::DataType;
use crate::error::SchemaError;
use crate::schema::{BlockSchema, EvidenceStatus, Field};
use crate::transform::Transform;

pub(super) fn schema() -> Result<BlockSchema, SchemaError> {
    BlockSchema::builder(1400, "INV_LOAD_INFO")
        .description("Load output info (DC rails, AC load per-phase)")
        .min_length(72)
        .strict(false)
        .evidence(EvidenceStatus::Reference)
        .field(Field::new("dc_total_power", 0, DataType::UInt32).with_unit("W"))
        .field(
            Field::new("dc_total_energy", 4, DataType::UInt32)
                .with_transform([Transform::Scale(0.1)])
                .with_unit("kWh"),
        )
        .field(Field::new("load_5v_power", 14, DataType::UInt16).optional().with_unit("W"))
        .field(
            Field::new("load_5v_energy", 16, DataType::UInt32)
                .optional()
                .with_transform([Transform::Scale(0.1)])
                .with_unit("kWh"),
        )
        .field(Field::new("load_12v_power", 24, DataType::UInt16).optional().with_unit("W"))
        .field(
            Field::new("load_12v_energy", 26, DataType::UInt32)
                .optional()
                .with_transform([Transform::Scale(0.1)])
                .with_unit("kWh"),
        )
        .field(Field::new("load_24v_power", 34, DataType::UInt16).optional().with_unit("W"))
        .field(
            Field::new("load_24v_energy", 36, DataType::UInt32)
                .optional()
                .with_transform([Transform::Scale(0.1)])
                .with_unit("kWh"),
        )
        .field(Field::new("ac_total_power", 44, DataType::UInt32).with_unit("W"))
        .field(
            Field::new("ac_total_energy", 48, DataType::UInt32)
                .with_transform([Transform::Scale(0.1)])
                .with_unit("kWh"),
        )
        .field(
            Field::new("phase_0_voltage", 56, DataType::UInt16)
                .with_transform([Transform::Scale(0.1)])
                .with_unit("V"),
        )
        .field(
            Field::new("phase_0_current", 58, DataType::UInt16)
                .with_transform([Transform::Scale(0.1)])
                .with_unit("A"),
        )
        .field(
            Field::new("phase_0_power", 60, DataType::Int16)
                .with_transform([Transform::Abs])
                .with_unit("W"),
        )
        .field(
            Field::new("phase_0_frequency", 62, DataType::UInt16)
                .with_transform([Transform::Scale(0.1)])
                .with_unit("Hz"),
        )
        .field(
            Field::new("phase_1_power", 64, DataType::Int16)
                .optional()
                .with_transform([Transform::Abs])
                .with_unit("W"),
        )
        .field(
            Field::new("phase_2_power", 66, DataType::Int16)
                .optional()
                .with_transform([Transform::Abs])
                .with_unit("W"),
        )
        .build()
}
