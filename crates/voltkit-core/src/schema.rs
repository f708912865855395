//! Block schema framework.
//!
//! A [`BlockSchema`] is a declarative, versioned description of one block's
//! wire layout: scalar fields, arrays, bit-packed fields and nested groups,
//! each with offsets, codecs and transform pipelines. Schemas are built
//! once through [`BlockSchema::builder`], validated at construction, and
//! immutable afterwards; they are shared as `Arc<BlockSchema>` for the
//! process lifetime.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::datatypes::{DataType, IntCodec};
use crate::error::{ParserError, SchemaError};
use crate::record::{ParsedRecord, ValidationResult};
use crate::transform::Pipeline;
use crate::value::Value;

/// Editorial tag describing the evidence quality behind a schema layout.
/// Never affects parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceStatus {
    /// Confirmed against a live device capture.
    Verified,
    /// Derived from reference parser sources.
    Reference,
    /// Layout inferred from payload observations.
    Inferred,
    /// Partially mapped; offsets may change once verified.
    Provisional,
}

/// A single value at a fixed byte offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub offset: usize,
    pub dtype: DataType,
    pub unit: Option<String>,
    pub required: bool,
    pub transform: Pipeline,
    pub min_protocol_version: Option<u32>,
    pub description: Option<String>,
}

impl Field {
    pub fn new(name: &str, offset: usize, dtype: DataType) -> Self {
        Self {
            name: name.to_string(),
            offset,
            dtype,
            unit: None,
            required: true,
            transform: Pipeline::default(),
            min_protocol_version: None,
            description: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_transform(mut self, pipeline: impl Into<Pipeline>) -> Self {
        self.transform = pipeline.into();
        self
    }

    pub fn with_min_version(mut self, version: u32) -> Self {
        self.min_protocol_version = Some(version);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn size(&self) -> usize {
        self.dtype.size()
    }

    pub fn end(&self) -> usize {
        self.offset + self.size()
    }

    /// Extract and transform this field's value from a normalized payload.
    pub fn parse(&self, data: &[u8]) -> Result<Value, ParserError> {
        let raw = self.dtype.parse(data, self.offset)?;
        Ok(self.transform.apply(raw)?)
    }
}

/// A homogeneous run of values at regular stride.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayField {
    pub name: String,
    pub offset: usize,
    pub count: usize,
    pub stride: usize,
    pub item_type: DataType,
    pub unit: Option<String>,
    pub required: bool,
    pub transform: Pipeline,
    pub min_protocol_version: Option<u32>,
    pub description: Option<String>,
}

impl ArrayField {
    pub fn new(name: &str, offset: usize, count: usize, stride: usize, item_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            offset,
            count,
            stride,
            item_type,
            unit: None,
            required: true,
            transform: Pipeline::default(),
            min_protocol_version: None,
            description: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_transform(mut self, pipeline: impl Into<Pipeline>) -> Self {
        self.transform = pipeline.into();
        self
    }

    pub fn with_min_version(mut self, version: u32) -> Self {
        self.min_protocol_version = Some(version);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn size(&self) -> usize {
        self.count * self.stride
    }

    pub fn end(&self) -> usize {
        self.offset + self.size()
    }

    /// Parse every item, pushing each through the shared pipeline.
    pub fn parse(&self, data: &[u8]) -> Result<Value, ParserError> {
        let mut values = Vec::with_capacity(self.count);
        for i in 0..self.count {
            let raw = self.item_type.parse(data, self.offset + i * self.stride)?;
            values.push(self.transform.apply(raw)?);
        }
        Ok(Value::List(values))
    }
}

/// A bit range within a packed backing integer.
///
/// Bit numbering is LSB-first relative to the backing value: bit 0 is the
/// least significant bit.
#[derive(Debug, Clone, PartialEq)]
pub struct SubField {
    pub name: String,
    pub bit_start: u8,
    pub bit_end: u8,
    pub unit: Option<String>,
    pub transform: Pipeline,
    pub enum_map: Option<Arc<BTreeMap<i64, String>>>,
}

impl SubField {
    /// Bit range `[start, end)`.
    pub fn bits(name: &str, start: u8, end: u8) -> Self {
        Self {
            name: name.to_string(),
            bit_start: start,
            bit_end: end,
            unit: None,
            transform: Pipeline::default(),
            enum_map: None,
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_transform(mut self, pipeline: impl Into<Pipeline>) -> Self {
        self.transform = pipeline.into();
        self
    }

    pub fn with_enum<S: Into<String>>(mut self, pairs: impl IntoIterator<Item = (i64, S)>) -> Self {
        self.enum_map = Some(Arc::new(
            pairs.into_iter().map(|(k, v)| (k, v.into())).collect(),
        ));
        self
    }

    /// Extract this sub-field from the backing value's bit pattern.
    pub fn extract(&self, bits: u64) -> Result<Value, ParserError> {
        let width = u32::from(self.bit_end - self.bit_start);
        let mask = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
        let chunk = bits.checked_shr(u32::from(self.bit_start)).unwrap_or(0) & mask;
        let value = match &self.enum_map {
            Some(map) => {
                let raw = chunk as i64;
                Value::Str(
                    map.get(&raw)
                        .cloned()
                        .unwrap_or_else(|| format!("UNKNOWN_{raw}")),
                )
            }
            None => Value::UInt(chunk),
        };
        Ok(self.transform.apply(value)?)
    }
}

/// An array of backing integers, each decomposed into bit-range sub-fields.
/// The common case is per-cell voltage/status registers.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedField {
    pub name: String,
    pub offset: usize,
    pub count: usize,
    pub stride: usize,
    pub base: IntCodec,
    pub fields: Vec<SubField>,
    pub required: bool,
    pub min_protocol_version: Option<u32>,
    pub description: Option<String>,
}

impl PackedField {
    pub fn new(
        name: &str,
        offset: usize,
        count: usize,
        stride: usize,
        base: IntCodec,
        fields: Vec<SubField>,
    ) -> Self {
        Self {
            name: name.to_string(),
            offset,
            count,
            stride,
            base,
            fields,
            required: true,
            min_protocol_version: None,
            description: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_min_version(mut self, version: u32) -> Self {
        self.min_protocol_version = Some(version);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn size(&self) -> usize {
        self.count * self.stride
    }

    pub fn end(&self) -> usize {
        self.offset + self.size()
    }

    /// Parse every packed item into a per-item sub-field mapping.
    pub fn parse(&self, data: &[u8]) -> Result<Value, ParserError> {
        let width_mask = match self.base.size() {
            1 => 0xFFu64,
            2 => 0xFFFF,
            4 => 0xFFFF_FFFF,
            _ => u64::MAX,
        };
        let mut items = Vec::with_capacity(self.count);
        for i in 0..self.count {
            let raw = self.base.parse_raw(data, self.offset + i * self.stride)?;
            let bits = (raw as u64) & width_mask;
            let mut item = BTreeMap::new();
            for sub in &self.fields {
                let value = sub.extract(bits).map_err(|e| e.in_field(&sub.name))?;
                item.insert(sub.name.clone(), value);
            }
            items.push(Value::Map(item));
        }
        Ok(Value::List(items))
    }
}

/// A named bundle of absolute-offset fields emitted as a nested mapping.
///
/// Groups exist to produce structured output; parsing does not assume the
/// sub-fields are contiguous.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldGroup {
    pub name: String,
    pub fields: Vec<Field>,
    pub required: bool,
    pub description: Option<String>,
    pub evidence: Option<EvidenceStatus>,
}

impl FieldGroup {
    pub fn new(name: &str, fields: Vec<Field>) -> Self {
        Self {
            name: name.to_string(),
            fields,
            required: false,
            description: None,
            evidence: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_evidence(mut self, evidence: EvidenceStatus) -> Self {
        self.evidence = Some(evidence);
        self
    }
}

/// One entry in a block schema's item list.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaItem {
    Scalar(Field),
    Array(ArrayField),
    Packed(PackedField),
    Group(FieldGroup),
}

impl SchemaItem {
    pub fn name(&self) -> &str {
        match self {
            SchemaItem::Scalar(f) => &f.name,
            SchemaItem::Array(f) => &f.name,
            SchemaItem::Packed(f) => &f.name,
            SchemaItem::Group(g) => &g.name,
        }
    }

    pub fn required(&self) -> bool {
        match self {
            SchemaItem::Scalar(f) => f.required,
            SchemaItem::Array(f) => f.required,
            SchemaItem::Packed(f) => f.required,
            SchemaItem::Group(g) => g.required,
        }
    }

    /// End of the last byte this item can touch; used for strict-mode
    /// trailing diagnostics and auto minimum length.
    pub fn max_end(&self) -> usize {
        match self {
            SchemaItem::Scalar(f) => f.end(),
            SchemaItem::Array(f) => f.end(),
            SchemaItem::Packed(f) => f.end(),
            SchemaItem::Group(g) => g.fields.iter().map(Field::end).max().unwrap_or(0),
        }
    }
}

/// Schema for one block: layout, validation rules, version metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSchema {
    block_id: u16,
    name: String,
    description: String,
    min_length: usize,
    items: Vec<SchemaItem>,
    protocol_version: u32,
    schema_version: String,
    strict: bool,
    evidence: Option<EvidenceStatus>,
}

impl BlockSchema {
    pub fn builder(block_id: u16, name: &str) -> BlockSchemaBuilder {
        BlockSchemaBuilder {
            block_id,
            name: name.to_string(),
            description: String::new(),
            min_length: None,
            items: Vec::new(),
            protocol_version: crate::PROTOCOL_VERSION,
            schema_version: "1.0.0".to_string(),
            strict: true,
            evidence: None,
        }
    }

    pub fn block_id(&self) -> u16 {
        self.block_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    pub fn items(&self) -> &[SchemaItem] {
        &self.items
    }

    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn strict(&self) -> bool {
        self.strict
    }

    pub fn evidence(&self) -> Option<EvidenceStatus> {
        self.evidence
    }

    /// Modbus register count needed to cover `min_length` payload bytes.
    pub fn register_count(&self) -> u16 {
        ((self.min_length + 1) / 2) as u16
    }

    pub fn item(&self, name: &str) -> Option<&SchemaItem> {
        self.items.iter().find(|item| item.name() == name)
    }

    fn max_field_end(&self) -> usize {
        self.items.iter().map(SchemaItem::max_end).max().unwrap_or(0)
    }

    /// Validate a payload against this schema without parsing it.
    pub fn validate(&self, data: &[u8]) -> ValidationResult {
        let mut result = ValidationResult::default();

        if data.len() < self.min_length {
            result.error(format!(
                "data length {} < minimum {}",
                data.len(),
                self.min_length
            ));
        }

        for item in &self.items {
            match item {
                SchemaItem::Group(group) => {
                    for field in &group.fields {
                        let qualified = format!("{}.{}", group.name, field.name);
                        check_span(
                            &qualified,
                            field.offset,
                            field.end(),
                            group.required && field.required,
                            data.len(),
                            &mut result,
                        );
                    }
                }
                other => check_span(
                    other.name(),
                    span_offset(other),
                    other.max_end(),
                    other.required(),
                    data.len(),
                    &mut result,
                ),
            }
        }

        if self.strict {
            let max_end = self.max_field_end();
            if data.len() > max_end {
                result.warning(format!(
                    "extra data beyond defined fields: {} bytes",
                    data.len() - max_end
                ));
            }
        }

        result
    }

    /// Parse a normalized payload into a [`ParsedRecord`].
    ///
    /// Fields gated behind a newer protocol version, and optional fields
    /// outside the payload, decode to [`Value::Null`]; their diagnostics
    /// accumulate into the record's validation result. A required field
    /// outside the payload, or a required field whose codec or transform
    /// fails, aborts the whole parse.
    pub fn parse(
        &self,
        data: &[u8],
        validate: bool,
        protocol_version: u32,
    ) -> Result<ParsedRecord, ParserError> {
        let mut diagnostics = if validate {
            let result = self.validate(data);
            if !result.valid() {
                if self.strict {
                    return Err(ParserError::ValidationFailed {
                        block_id: self.block_id,
                        name: self.name.clone(),
                        errors: result.errors.clone(),
                    });
                }
                warn!(
                    block_id = self.block_id,
                    name = %self.name,
                    errors = ?result.errors,
                    "schema validation failed; continuing in non-strict mode"
                );
            }
            result
        } else {
            ValidationResult::default()
        };

        let mut values = BTreeMap::new();
        for item in &self.items {
            let value = match item {
                SchemaItem::Group(group) => {
                    self.parse_group(group, data, protocol_version, &mut diagnostics)?
                }
                SchemaItem::Scalar(field) => parse_gated(
                    &field.name,
                    field.min_protocol_version,
                    field.offset,
                    field.end(),
                    field.required,
                    data,
                    protocol_version,
                    &mut diagnostics,
                    || field.parse(data),
                )?,
                SchemaItem::Array(field) => parse_gated(
                    &field.name,
                    field.min_protocol_version,
                    field.offset,
                    field.end(),
                    field.required,
                    data,
                    protocol_version,
                    &mut diagnostics,
                    || field.parse(data),
                )?,
                SchemaItem::Packed(field) => parse_gated(
                    &field.name,
                    field.min_protocol_version,
                    field.offset,
                    field.end(),
                    field.required,
                    data,
                    protocol_version,
                    &mut diagnostics,
                    || field.parse(data),
                )?,
            };
            values.insert(item.name().to_string(), value);
        }

        Ok(ParsedRecord {
            block_id: self.block_id,
            name: self.name.clone(),
            values,
            raw: data.to_vec(),
            length: data.len(),
            protocol_version,
            schema_version: self.schema_version.clone(),
            timestamp: Instant::now(),
            validation: diagnostics,
        })
    }

    fn parse_group(
        &self,
        group: &FieldGroup,
        data: &[u8],
        protocol_version: u32,
        diagnostics: &mut ValidationResult,
    ) -> Result<Value, ParserError> {
        let mut out = BTreeMap::new();
        for field in &group.fields {
            let qualified = format!("{}.{}", group.name, field.name);
            // An optional group shields its members: only a required field
            // inside a required group can abort the parse.
            let effective_required = group.required && field.required;
            let value = parse_gated(
                &qualified,
                field.min_protocol_version,
                field.offset,
                field.end(),
                effective_required,
                data,
                protocol_version,
                diagnostics,
                || field.parse(data),
            )?;
            out.insert(field.name.clone(), value);
        }
        Ok(Value::Map(out))
    }
}

fn span_offset(item: &SchemaItem) -> usize {
    match item {
        SchemaItem::Scalar(f) => f.offset,
        SchemaItem::Array(f) => f.offset,
        SchemaItem::Packed(f) => f.offset,
        SchemaItem::Group(g) => g.fields.iter().map(|f| f.offset).min().unwrap_or(0),
    }
}

fn check_span(
    name: &str,
    offset: usize,
    end: usize,
    required: bool,
    len: usize,
    result: &mut ValidationResult,
) {
    if end > len {
        if required {
            result.error(format!(
                "required field '{name}' at offset {offset} exceeds data length {len}"
            ));
        } else {
            result.missing(name);
        }
    }
}

/// Shared gate-check-parse path for the three positional item kinds and
/// group members.
#[allow(clippy::too_many_arguments)]
fn parse_gated(
    name: &str,
    min_version: Option<u32>,
    offset: usize,
    end: usize,
    required: bool,
    data: &[u8],
    protocol_version: u32,
    diagnostics: &mut ValidationResult,
    parse: impl FnOnce() -> Result<Value, ParserError>,
) -> Result<Value, ParserError> {
    if let Some(min) = min_version {
        if protocol_version < min {
            diagnostics.warning(format!(
                "field '{name}' skipped (requires protocol >= {min})"
            ));
            return Ok(Value::Null);
        }
    }

    if end > data.len() {
        if required {
            return Err(ParserError::OutOfBounds {
                kind: "field",
                offset,
                len: data.len(),
            }
            .in_field(name));
        }
        if !diagnostics.missing_fields.iter().any(|f| f == name) {
            diagnostics.missing(name);
        }
        return Ok(Value::Null);
    }

    match parse() {
        Ok(value) => Ok(value),
        Err(err) if required => Err(err.in_field(name)),
        Err(err) => {
            debug!(field = name, error = %err, "optional field parse error");
            diagnostics.warning(format!("optional field '{name}' parse error: {err}"));
            Ok(Value::Null)
        }
    }
}

/// Builder for [`BlockSchema`]. `build` runs all definition-time checks.
pub struct BlockSchemaBuilder {
    block_id: u16,
    name: String,
    description: String,
    min_length: Option<usize>,
    items: Vec<SchemaItem>,
    protocol_version: u32,
    schema_version: String,
    strict: bool,
    evidence: Option<EvidenceStatus>,
}

impl BlockSchemaBuilder {
    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Minimum payload length in bytes. Defaults to the maximum field end.
    pub fn min_length(mut self, min_length: usize) -> Self {
        self.min_length = Some(min_length);
        self
    }

    pub fn protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn schema_version(mut self, version: &str) -> Self {
        self.schema_version = version.to_string();
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn evidence(mut self, evidence: EvidenceStatus) -> Self {
        self.evidence = Some(evidence);
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.items.push(SchemaItem::Scalar(field));
        self
    }

    pub fn array(mut self, field: ArrayField) -> Self {
        self.items.push(SchemaItem::Array(field));
        self
    }

    pub fn packed(mut self, field: PackedField) -> Self {
        self.items.push(SchemaItem::Packed(field));
        self
    }

    pub fn group(mut self, group: FieldGroup) -> Self {
        self.items.push(SchemaItem::Group(group));
        self
    }

    pub fn build(self) -> Result<BlockSchema, SchemaError> {
        let mut seen = BTreeSet::new();
        for item in &self.items {
            if !seen.insert(item.name().to_string()) {
                return Err(SchemaError::DuplicateName {
                    block_id: self.block_id,
                    name: item.name().to_string(),
                });
            }
            match item {
                SchemaItem::Scalar(f) => f.dtype.check()?,
                SchemaItem::Array(f) => {
                    f.item_type.check()?;
                    if f.stride < f.item_type.size() {
                        return Err(SchemaError::BadStride {
                            name: f.name.clone(),
                            stride: f.stride,
                            item_size: f.item_type.size(),
                        });
                    }
                }
                SchemaItem::Packed(f) => {
                    if f.stride < f.base.size() {
                        return Err(SchemaError::BadStride {
                            name: f.name.clone(),
                            stride: f.stride,
                            item_size: f.base.size(),
                        });
                    }
                    let bits = (f.base.size() * 8) as u8;
                    let mut sub_seen = BTreeSet::new();
                    for sub in &f.fields {
                        if sub.bit_start >= sub.bit_end || sub.bit_end > bits {
                            return Err(SchemaError::BadBitRange {
                                name: sub.name.clone(),
                                start: sub.bit_start,
                                end: sub.bit_end,
                                bits,
                            });
                        }
                        if !sub_seen.insert(sub.name.clone()) {
                            return Err(SchemaError::DuplicateName {
                                block_id: self.block_id,
                                name: format!("{}.{}", f.name, sub.name),
                            });
                        }
                    }
                }
                SchemaItem::Group(g) => {
                    let mut sub_seen = BTreeSet::new();
                    for field in &g.fields {
                        field.dtype.check()?;
                        if !sub_seen.insert(field.name.clone()) {
                            return Err(SchemaError::DuplicateName {
                                block_id: self.block_id,
                                name: format!("{}.{}", g.name, field.name),
                            });
                        }
                    }
                }
            }
        }

        let auto_min = self.items.iter().map(SchemaItem::max_end).max().unwrap_or(0);
        let min_length = self.min_length.unwrap_or(auto_min);

        // Required items must fit inside any payload that passes the
        // minimum-length check; only optional items may extend beyond.
        for item in &self.items {
            let required_end = match item {
                SchemaItem::Group(g) if g.required => g
                    .fields
                    .iter()
                    .filter(|f| f.required)
                    .map(Field::end)
                    .max()
                    .unwrap_or(0),
                SchemaItem::Group(_) => 0,
                other if other.required() => other.max_end(),
                _ => 0,
            };
            if required_end > min_length {
                return Err(SchemaError::Invalid(format!(
                    "required item '{}' ends at {} beyond min_length {}",
                    item.name(),
                    required_end,
                    min_length
                )));
            }
        }

        Ok(BlockSchema {
            block_id: self.block_id,
            name: self.name,
            description: self.description,
            min_length: self.min_length.unwrap_or(auto_min),
            items: self.items,
            protocol_version: self.protocol_version,
            schema_version: self.schema_version,
            strict: self.strict,
            evidence: self.evidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Transform;

    fn freq_schema() -> BlockSchema {
        BlockSchema::builder(1300, "INV_GRID_INFO")
            .description("Grid input monitoring")
            .min_length(2)
            .field(
                Field::new("freq", 0, DataType::UInt16)
                    .with_transform([Transform::Scale(0.1)])
                    .with_unit("Hz"),
            )
            .build()
            .expect("schema")
    }

    #[test]
    fn scalar_field_with_transform() {
        let schema = freq_schema();
        let record = schema.parse(&[0x01, 0xF4], true, 2000).expect("parse");
        assert_eq!(record.values["freq"], Value::Float(50.0));
        assert!(record.validation.valid());
        assert!(record.validation.errors.is_empty());
        assert!(record.validation.warnings.is_empty());
        assert_eq!(record.raw, vec![0x01, 0xF4]);
    }

    #[test]
    fn packed_field_voltage_and_status() {
        let schema = BlockSchema::builder(6100, "PACK_CELL_INFO")
            .min_length(2)
            .packed(PackedField::new(
                "cells",
                0,
                1,
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
            .build()
            .expect("schema");

        // 0x8CAD = 1000_1100_1010_1101: voltage bits = 0x0CAD, status = 0b10
        let record = schema.parse(&[0x8C, 0xAD], true, 2000).expect("parse");
        let cells = record.values["cells"].as_list().expect("list");
        assert_eq!(cells.len(), 1);
        let cell = cells[0].as_map().expect("map");
        assert_eq!(cell["voltage"], Value::Float(3.245));
        assert_eq!(cell["status"], Value::Str("HIGH".into()));
    }

    #[test]
    fn array_field_strides() {
        let schema = BlockSchema::builder(9000, "ARRAY_TEST")
            .array(
                ArrayField::new("volts", 0, 3, 2, DataType::UInt16)
                    .with_transform([Transform::Scale(0.1)]),
            )
            .build()
            .expect("schema");
        let record = schema
            .parse(&[0x00, 0x0A, 0x00, 0x14, 0x00, 0x1E], true, 2000)
            .expect("parse");
        assert_eq!(
            record.values["volts"],
            Value::List(vec![
                Value::Float(1.0),
                Value::Float(2.0),
                Value::Float(3.0)
            ])
        );
    }

    #[test]
    fn group_emits_nested_mapping_with_absolute_offsets() {
        let schema = BlockSchema::builder(17400, "ATS_EVENT_EXT")
            .min_length(4)
            .strict(false)
            .group(
                FieldGroup::new(
                    "config_grid",
                    vec![
                        Field::new("max_current", 2, DataType::UInt16).optional(),
                    ],
                )
                .with_evidence(EvidenceStatus::Provisional),
            )
            .build()
            .expect("schema");
        let record = schema.parse(&[0x00, 0x00, 0x00, 0x20], true, 2000).expect("parse");
        let group = record.values["config_grid"].as_map().expect("map");
        assert_eq!(group["max_current"], Value::UInt(32));
    }

    #[test]
    fn version_gated_fields_emit_null() {
        let schema = BlockSchema::builder(9001, "GATED")
            .min_length(2)
            .strict(false)
            .field(Field::new("base", 0, DataType::UInt16))
            .field(
                Field::new("extended", 2, DataType::UInt16)
                    .optional()
                    .with_min_version(2001),
            )
            .build()
            .expect("schema");
        let record = schema
            .parse(&[0x00, 0x01, 0x00, 0x02], true, 2000)
            .expect("parse");
        assert_eq!(record.values["extended"], Value::Null);
        assert!(record
            .validation
            .warnings
            .iter()
            .any(|w| w.contains("extended")));

        let record = schema
            .parse(&[0x00, 0x01, 0x00, 0x02], true, 2001)
            .expect("parse");
        assert_eq!(record.values["extended"], Value::UInt(2));
    }

    #[test]
    fn short_payload_required_field_aborts() {
        let schema = BlockSchema::builder(9002, "SHORT")
            .strict(false)
            .field(Field::new("a", 0, DataType::UInt16))
            .field(Field::new("b", 2, DataType::UInt16))
            .build()
            .expect("schema");
        let err = schema.parse(&[0x00, 0x01], true, 2000).unwrap_err();
        assert!(matches!(err, ParserError::FieldFailed { ref field, .. } if field == "b"));
    }

    #[test]
    fn short_payload_optional_field_is_missing() {
        let schema = BlockSchema::builder(9003, "OPTIONAL_TAIL")
            .min_length(2)
            .strict(false)
            .field(Field::new("a", 0, DataType::UInt16))
            .field(Field::new("b", 2, DataType::UInt16).optional())
            .build()
            .expect("schema");
        let record = schema.parse(&[0x00, 0x01], true, 2000).expect("parse");
        assert_eq!(record.values["b"], Value::Null);
        assert_eq!(record.validation.missing_fields, vec!["b".to_string()]);
    }

    #[test]
    fn strict_mode_rejects_short_payload() {
        let schema = freq_schema();
        let err = schema.parse(&[0x01], true, 2000).unwrap_err();
        assert!(matches!(err, ParserError::ValidationFailed { block_id: 1300, .. }));
    }

    #[test]
    fn strict_mode_warns_about_trailing_bytes() {
        let schema = freq_schema();
        let result = schema.validate(&[0x01, 0xF4, 0xAA]);
        assert!(result.valid());
        assert!(result.warnings.iter().any(|w| w.contains("1 bytes")));
    }

    #[test]
    fn zero_payload_parses_to_zero_values() {
        let schema = BlockSchema::builder(9004, "ZEROS")
            .field(Field::new("u16", 0, DataType::UInt16))
            .field(Field::new("i16", 2, DataType::Int16))
            .field(
                Field::new("scaled", 4, DataType::UInt16).with_transform([Transform::Scale(0.1)]),
            )
            .build()
            .expect("schema");
        let record = schema.parse(&[0u8; 6], true, 2000).expect("parse");
        assert!(record.validation.valid());
        assert_eq!(record.values["u16"], Value::UInt(0));
        assert_eq!(record.values["i16"], Value::Int(0));
        assert_eq!(record.values["scaled"], Value::Float(0.0));
    }

    #[test]
    fn builder_rejects_bad_definitions() {
        // Duplicate names
        assert!(matches!(
            BlockSchema::builder(1, "DUP")
                .field(Field::new("x", 0, DataType::UInt8))
                .field(Field::new("x", 1, DataType::UInt8))
                .build(),
            Err(SchemaError::DuplicateName { .. })
        ));

        // Bit range past the backing width
        assert!(matches!(
            BlockSchema::builder(2, "BITS")
                .packed(PackedField::new(
                    "p",
                    0,
                    1,
                    1,
                    IntCodec::UInt8,
                    vec![SubField::bits("s", 4, 12)],
                ))
                .build(),
            Err(SchemaError::BadBitRange { .. })
        ));

        // Stride smaller than item size
        assert!(matches!(
            BlockSchema::builder(3, "STRIDE")
                .array(ArrayField::new("a", 0, 4, 1, DataType::UInt16))
                .build(),
            Err(SchemaError::BadStride { .. })
        ));
    }

    #[test]
    fn auto_min_length_covers_last_field() {
        let schema = BlockSchema::builder(9005, "AUTO")
            .field(Field::new("a", 0, DataType::UInt16))
            .field(Field::new("b", 6, DataType::UInt32))
            .build()
            .expect("schema");
        assert_eq!(schema.min_length(), 10);
        assert_eq!(schema.register_count(), 5);
    }

    #[test]
    fn parse_never_mutates_input() {
        let schema = freq_schema();
        let payload = vec![0x01, 0xF4];
        let record = schema.parse(&payload, true, 2000).expect("parse");
        assert_eq!(record.raw, payload);
        assert_eq!(record.length, 2);
    }
}
