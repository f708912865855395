//! Block 720 (`OTA_STATUS`) - firmware update progress.
//!
//! The device reports an array of up to 16 per-file statuses (6 bytes
//! each from offset 2); this schema covers the first entry, which is what
//! the dashboard surfaces.

use crate::datatypes::DataType;
use crate::error::SchemaError;
use crate::schema::{BlockSchema, EvidenceStatus, Field};

pub(super) fn schema() -> Result<BlockSchema, SchemaError> {
    BlockSchema::builder(720, "OTA_STATUS")
        .description("Firmware update status with file progress tracking")
        .min_length(8)
        .strict(false)
        .evidence(EvidenceStatus::Reference)
        .field(Field::new("ota_group", 0, DataType::UInt8))
        .field(Field::new("file0_ota_status", 2, DataType::UInt8))
        .field(Field::new("file0_ota_step", 3, DataType::UInt8))
        .field(Field::new("file0_mcu_type", 4, DataType::UInt8))
        .field(Field::new("file0_depth", 5, DataType::UInt8))
        .field(
            Field::new("file0_progress", 6, DataType::UInt8)
                .with_unit("%")
                .with_transform([crate::transform::Transform::Clamp { lo: 0.0, hi: 100.0 }]),
        )
        .field(Field::new("file0_error_code", 7, DataType::UInt8))
        .build()
}
