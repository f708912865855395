//! Block parser: applies registered schemas to normalized payloads.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::error::ParserError;
use crate::record::ParsedRecord;
use crate::schema::BlockSchema;

/// Schema-driven parsing engine.
///
/// A parser holds the schemas it may be asked to apply, keyed by block id.
/// Registration is explicit; the client wires profile blocks in at
/// construction time.
#[derive(Debug, Default)]
pub struct BlockParser {
    schemas: HashMap<u16, Arc<BlockSchema>>,
}

impl BlockParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema. Fails if the block id is already registered.
    pub fn register_schema(&mut self, schema: Arc<BlockSchema>) -> Result<(), ParserError> {
        if let Some(existing) = self.schemas.get(&schema.block_id()) {
            return Err(ParserError::DuplicateBlock {
                block_id: schema.block_id(),
                name: existing.name().to_string(),
            });
        }
        debug!(
            block_id = schema.block_id(),
            name = schema.name(),
            "registered schema"
        );
        self.schemas.insert(schema.block_id(), schema);
        Ok(())
    }

    pub fn get_schema(&self, block_id: u16) -> Option<&Arc<BlockSchema>> {
        self.schemas.get(&block_id)
    }

    /// Parse one block payload.
    ///
    /// `data` must be normalized (big-endian, no Modbus framing, no CRC).
    pub fn parse_block(
        &self,
        block_id: u16,
        data: &[u8],
        validate: bool,
        protocol_version: u32,
    ) -> Result<ParsedRecord, ParserError> {
        let schema = self
            .schemas
            .get(&block_id)
            .ok_or(ParserError::UnknownBlock(block_id))?;
        let record = schema.parse(data, validate, protocol_version)?;
        for warning in &record.validation.warnings {
            debug!(block_id, name = schema.name(), %warning, "block diagnostic");
        }
        Ok(record)
    }

    /// Registered block id to schema name mapping, sorted by id.
    pub fn list_schemas(&self) -> BTreeMap<u16, String> {
        self.schemas
            .iter()
            .map(|(id, schema)| (*id, schema.name().to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::DataType;
    use crate::schema::Field;
    use crate::transform::Transform;
    use crate::value::Value;

    fn grid_schema() -> Arc<BlockSchema> {
        Arc::new(
            BlockSchema::builder(1300, "INV_GRID_INFO")
                .min_length(2)
                .field(
                    Field::new("freq", 0, DataType::UInt16)
                        .with_transform([Transform::Scale(0.1)])
                        .with_unit("Hz"),
                )
                .build()
                .expect("schema"),
        )
    }

    #[test]
    fn parse_known_block() {
        let mut parser = BlockParser::new();
        parser.register_schema(grid_schema()).expect("register");
        let record = parser
            .parse_block(1300, &[0x01, 0xF4], true, 2000)
            .expect("parse");
        assert_eq!(record.name, "INV_GRID_INFO");
        assert_eq!(record.values["freq"], Value::Float(50.0));
    }

    #[test]
    fn unknown_block_is_an_error() {
        let parser = BlockParser::new();
        assert!(matches!(
            parser.parse_block(9999, &[0x00], true, 2000),
            Err(ParserError::UnknownBlock(9999))
        ));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut parser = BlockParser::new();
        parser.register_schema(grid_schema()).expect("register");
        assert!(matches!(
            parser.register_schema(grid_schema()),
            Err(ParserError::DuplicateBlock { block_id: 1300, .. })
        ));
    }

    #[test]
    fn list_schemas_sorted() {
        let mut parser = BlockParser::new();
        parser.register_schema(grid_schema()).expect("register");
        let listing = parser.list_schemas();
        assert_eq!(listing.get(&1300).map(String::as_str), Some("INV_GRID_INFO"));
    }
}
