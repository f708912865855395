//! Block 12002 (`IOT_WIFI_SETTINGS`) - Wi-Fi station configuration.

use crate::datatypes::DataType;
use crate::error::SchemaError;
use crate::schema::{BlockSchema, EvidenceStatus, Field};

pub(super) fn schema() -> Result<BlockSchema, SchemaError> {
    BlockSchema::builder(12002, "IOT_WIFI_SETTINGS")
        .description("IOT module Wi-Fi settings")
        .min_length(98)
        .strict(false)
        .evidence(EvidenceStatus::Verified)
        .field(Field::new("wifi_ssid", 0, DataType::String { length: 64 }))
        // Offset assumes the 32-byte password encoding; the h32b flag below
        // switches the device to a different layout that is not mapped yet.
        .field(Field::new("wifi_password", 64, DataType::String { length: 32 }).optional())
        .field(Field::new("wifi_no_password_enable", 96, DataType::UInt8).optional())
        .field(Field::new("wifi_password_h32b_enable", 97, DataType::UInt8).optional())
        .build()
}
