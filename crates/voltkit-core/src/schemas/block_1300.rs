//! Block 1300 (`INV_GRID_INFO`) - grid input monitoring.

use crate::datatypes::DataType;
use crate::error::SchemaError;
use crate::schema::{BlockSchema, EvidenceStatus, Field};
use crate::transform::Transform;

pub(super) fn schema() -> Result<BlockSchema, SchemaError> {
    BlockSchema::builder(1300, "INV_GRID_INFO")
        .description("Grid input monitoring (voltage, frequency, power)")
        .min_length(32)
        .evidence(EvidenceStatus::Verified)
        .field(
            Field::new("frequency", 0, DataType::UInt16)
                .with_transform([Transform::Scale(0.1)])
                .with_unit("Hz"),
        )
        // Most residential units are single-phase; phase 1/2 read zero there.
        .field(
            Field::new("phase_1_voltage", 2, DataType::UInt16)
                .optional()
                .with_transform([Transform::Scale(0.1)])
                .with_unit("V"),
        )
        .field(
            Field::new("phase_2_voltage", 4, DataType::UInt16)
                .optional()
                .with_transform([Transform::Scale(0.1)])
                .with_unit("V"),
        )
        .field(
            Field::new("total_charge_energy", 6, DataType::UInt32)
                .optional()
                .with_transform([Transform::Scale(0.1)])
                .with_unit("kWh"),
        )
        .field(
            Field::new("total_feedback_energy", 10, DataType::UInt32)
                .optional()
                .with_transform([Transform::Scale(0.1)])
                .with_unit("kWh"),
        )
        .field(
            Field::new("phase_0_power", 26, DataType::Int16)
                .with_transform([Transform::Abs])
                .with_unit("W"),
        )
        .field(
            Field::new("phase_0_voltage", 28, DataType::UInt16)
                .with_transform([Transform::Scale(0.1)])
                .with_unit("V"),
        )
        .field(
            Field::new("phase_0_current", 30, DataType::Int16)
                .with_transform([Transform::Abs, Transform::Scale(0.1)])
                .with_unit("A"),
        )
        .build()
}
