//! Block 6100 (`PACK_CELL_INFO`) - per-cell detail.
//!
//! Each cell register packs a 14-bit voltage with a 2-bit status code.

use crate::datatypes::{DataType, IntCodec};
use crate::error::SchemaError;
use crate::schema::{ArrayField, BlockSchema, EvidenceStatus, Field, PackedField, SubField};
use crate::transform::Transform;

pub(super) fn schema() -> Result<BlockSchema, SchemaError> {
    BlockSchema::builder(6100, "PACK_CELL_INFO")
        .description("Per-cell voltages, status bits and temperatures")
        .min_length(42)
        .strict(false)
        .evidence(EvidenceStatus::Reference)
        .field(Field::new("cell_count", 0, DataType::UInt8))
        .packed(PackedField::new(
            "cells",
            10,
            16,
            2,
            IntCodec::UInt16,
            vec![
                SubField::bits("voltage", 0, 14)
                    .with_transform([Transform::Scale(0.001)])
                    .with_unit("V"),
                SubField::bits("status", 14, 16).with_enum([
                    (0, "OK"),
                    (1, "LOW"),
                    (2, "HIGH"),
                    (3, "FAULT"),
                ]),
            ],
        ))
        .array(
            ArrayField::new("cell_temps", 42, 8, 1, DataType::UInt8)
                .optional()
                .with_transform([Transform::Minus(40.0)])
                .with_unit("°C"),
        )
        .build()
}
