//! Block 17400 (`ATS_EVENT_EXT`) - transfer-switch extended settings.
//!
//! Deeply nested structure: per-port config items plus bit-packed enable
//! registers decoded with `hex_enable_list`. Several offsets are mapped
//! from reference material but not yet confirmed against a live unit, so
//! the whole block is tagged provisional and everything is optional.
//! Controls automatic transfer switching; do not treat these offsets as a
//! write contract.

use crate::datatypes::DataType;
use crate::error::SchemaError;
use crate::schema::{BlockSchema, EvidenceStatus, Field, FieldGroup};
use crate::transform::Transform;

fn enable_bit(name: &str, offset: usize, index: u8) -> Field {
    Field::new(name, offset, DataType::UInt16)
        .optional()
        .with_transform([Transform::HexEnableList { mode: 0, index }])
}

pub(super) fn schema() -> Result<BlockSchema, SchemaError> {
    BlockSchema::builder(17400, "ATS_EVENT_EXT")
        .description("Transfer switch extended settings (nested config items)")
        .min_length(96)
        .strict(false)
        .evidence(EvidenceStatus::Provisional)
        .field(
            Field::new("volt_level_set", 176, DataType::UInt16)
                .optional()
                .with_transform([Transform::Bitmask(0x7)]),
        )
        .group(
            FieldGroup::new(
                "top_level_enables",
                vec![
                    enable_bit("chg_from_grid_enable", 0, 3),
                    enable_bit("feed_to_grid_enable", 2, 4),
                ],
            )
            .with_description("System-wide enable register")
            .with_evidence(EvidenceStatus::Reference),
        )
        .group(
            FieldGroup::new(
                "startup_flags",
                vec![
                    enable_bit("black_start_enable", 174, 2),
                    enable_bit("black_start_mode", 174, 3),
                    enable_bit("generator_auto_start_enable", 174, 4),
                    enable_bit("off_grid_power_priority", 174, 5),
                ],
            )
            .with_description("Black-start and generator flags (beyond min length)")
            .with_evidence(EvidenceStatus::Provisional),
        )
        .group(
            FieldGroup::new(
                "config_grid",
                vec![
                    enable_bit("port_type", 20, 0),
                    enable_bit("linkage_enable", 22, 0),
                    enable_bit("force_enable_0", 12, 0),
                    enable_bit("force_enable_1", 12, 1),
                    enable_bit("force_enable_2", 12, 2),
                    Field::new("max_current", 84, DataType::UInt16)
                        .optional()
                        .with_unit("A"),
                ],
            )
            .with_description("Grid port config item")
            .with_evidence(EvidenceStatus::Provisional),
        )
        .group(
            FieldGroup::new(
                "config_sl1",
                vec![
                    enable_bit("port_type", 20, 1),
                    enable_bit("linkage_enable", 22, 1),
                    enable_bit("force_enable_0", 2, 0),
                    enable_bit("force_enable_1", 2, 1),
                    enable_bit("force_enable_2", 2, 2),
                    Field::new("max_current", 86, DataType::UInt16)
                        .optional()
                        .with_unit("A"),
                ],
            )
            .with_description("Smart load 1 config item")
            .with_evidence(EvidenceStatus::Provisional),
        )
        .group(
            FieldGroup::new(
                "config_pcs1",
                vec![
                    enable_bit("port_type", 18, 0),
                    Field::new("max_current", 95, DataType::UInt8)
                        .optional()
                        .with_unit("A"),
                ],
            )
            .with_description("PCS port 1 config item")
            .with_evidence(EvidenceStatus::Provisional),
        )
        .group(
            FieldGroup::new(
                "config_pcs2",
                vec![
                    enable_bit("port_type", 18, 1),
                    Field::new("max_current", 94, DataType::UInt8)
                        .optional()
                        .with_unit("A"),
                ],
            )
            .with_description("PCS port 2 config item")
            .with_evidence(EvidenceStatus::Provisional),
        )
        .build()
}
