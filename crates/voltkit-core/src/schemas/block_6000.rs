//! Block 6000 (`PACK_MAIN_INFO`) - battery pack summary.

use crate::datatypes::{DataType, IntCodec, EnumCodec};
use crate::error::SchemaError;
use crate::schema::{BlockSchema, EvidenceStatus, Field};
use crate::transform::Transform;

pub(super) fn schema() -> Result<BlockSchema, SchemaError> {
    let charging_status = DataType::Enum(EnumCodec::new(
        IntCodec::UInt8,
        [
            (0, "IDLE"),
            (1, "CHARGING"),
            (2, "DISCHARGING"),
            (3, "FAULT"),
        ],
    )?);

    BlockSchema::builder(6000, "PACK_MAIN_INFO")
        .description("Battery pack health, temperatures and protection status")
        .min_length(40)
        .strict(false)
        .evidence(EvidenceStatus::Reference)
        .field(
            Field::new("soc", 0, DataType::UInt16)
                .with_unit("%")
                .with_transform([Transform::Clamp { lo: 0.0, hi: 100.0 }]),
        )
        .field(Field::new("soh", 2, DataType::UInt16).with_unit("%"))
        .field(
            Field::new("voltage", 4, DataType::UInt16)
                .with_transform([Transform::Scale(0.1)])
                .with_unit("V"),
        )
        .field(
            Field::new("current", 6, DataType::Int16)
                .with_transform([Transform::Scale(0.1)])
                .with_unit("A"),
        )
        .field(Field::new("power", 8, DataType::Int32).with_unit("W"))
        // Temperatures are stored with a +40 offset on the wire.
        .field(
            Field::new("temp_max", 12, DataType::UInt8)
                .with_transform([Transform::Minus(40.0)])
                .with_unit("°C"),
        )
        .field(
            Field::new("temp_min", 13, DataType::UInt8)
                .with_transform([Transform::Minus(40.0)])
                .with_unit("°C"),
        )
        .field(
            Field::new("temp_avg", 14, DataType::UInt8)
                .with_transform([Transform::Minus(40.0)])
                .with_unit("°C"),
        )
        .field(Field::new("cycles", 16, DataType::UInt16))
        .field(Field::new("cell_count", 18, DataType::UInt8))
        .field(Field::new("charging_status", 19, charging_status))
        .field(Field::new("chg_full_time", 20, DataType::UInt16).optional().with_unit("min"))
        .field(Field::new("dsg_empty_time", 22, DataType::UInt16).optional().with_unit("min"))
        .field(Field::new("protect_status", 24, DataType::Bitmap { bits: 32 }).optional())
        .field(Field::new("fault_status", 28, DataType::Bitmap { bits: 32 }).optional())
        .field(
            Field::new("design_capacity", 32, DataType::UInt32)
                .optional()
                .with_transform([Transform::Scale(0.001)])
                .with_unit("Ah"),
        )
        .field(
            Field::new("remaining_capacity", 36, DataType::UInt32)
                .optional()
                .with_transform([Transform::Scale(0.001)])
                .with_unit("Ah"),
        )
        .build()
}
