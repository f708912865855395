//! Primitive wire codecs for block payloads.
//!
//! All multi-byte integers are big-endian; signed types are two's
//! complement. Payloads handed to [`DataType::parse`] are normalized bytes
//! (no Modbus framing, no CRC). The variant set is closed on purpose: the
//! device protocol defines exactly these primitives.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{ParserError, SchemaError};
use crate::value::Value;

/// Integer codecs usable as the backing type of [`EnumCodec`] and packed
/// fields. Split out of [`DataType`] so that non-integer backings are
/// unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntCodec {
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
}

impl IntCodec {
    pub fn size(self) -> usize {
        match self {
            IntCodec::UInt8 | IntCodec::Int8 => 1,
            IntCodec::UInt16 | IntCodec::Int16 => 2,
            IntCodec::UInt32 | IntCodec::Int32 => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            IntCodec::UInt8 => "UInt8",
            IntCodec::Int8 => "Int8",
            IntCodec::UInt16 => "UInt16",
            IntCodec::Int16 => "Int16",
            IntCodec::UInt32 => "UInt32",
            IntCodec::Int32 => "Int32",
        }
    }

    fn bounds_check(self, data: &[u8], offset: usize) -> Result<(), ParserError> {
        if offset + self.size() > data.len() {
            return Err(ParserError::OutOfBounds {
                kind: self.name(),
                offset,
                len: data.len(),
            });
        }
        Ok(())
    }

    /// Parse the raw integer at `offset`, widened to `i64`.
    pub fn parse_raw(self, data: &[u8], offset: usize) -> Result<i64, ParserError> {
        self.bounds_check(data, offset)?;
        let v = match self {
            IntCodec::UInt8 => i64::from(data[offset]),
            IntCodec::Int8 => i64::from(data[offset] as i8),
            IntCodec::UInt16 => i64::from(u16::from_be_bytes([data[offset], data[offset + 1]])),
            IntCodec::Int16 => i64::from(i16::from_be_bytes([data[offset], data[offset + 1]])),
            IntCodec::UInt32 => i64::from(u32::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ])),
            IntCodec::Int32 => i64::from(i32::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ])),
        };
        Ok(v)
    }

    pub fn is_signed(self) -> bool {
        matches!(self, IntCodec::Int8 | IntCodec::Int16 | IntCodec::Int32)
    }

    fn range(self) -> (i64, i64) {
        match self {
            IntCodec::UInt8 => (0, u8::MAX as i64),
            IntCodec::Int8 => (i8::MIN as i64, i8::MAX as i64),
            IntCodec::UInt16 => (0, u16::MAX as i64),
            IntCodec::Int16 => (i16::MIN as i64, i16::MAX as i64),
            IntCodec::UInt32 => (0, u32::MAX as i64),
            IntCodec::Int32 => (i32::MIN as i64, i32::MAX as i64),
        }
    }

    /// Encode `v` big-endian, range-checked.
    pub fn encode_raw(self, v: i64) -> Result<Vec<u8>, ParserError> {
        let (lo, hi) = self.range();
        if v < lo || v > hi {
            return Err(ParserError::Encode(format!(
                "{} value {v} out of range [{lo}, {hi}]",
                self.name()
            )));
        }
        let bytes = match self {
            IntCodec::UInt8 | IntCodec::Int8 => vec![v as u8],
            IntCodec::UInt16 | IntCodec::Int16 => (v as u16).to_be_bytes().to_vec(),
            IntCodec::UInt32 | IntCodec::Int32 => (v as u32).to_be_bytes().to_vec(),
        };
        Ok(bytes)
    }

    fn to_value(self, raw: i64) -> Value {
        if self.is_signed() {
            Value::Int(raw)
        } else {
            Value::UInt(raw as u64)
        }
    }
}

/// Enum codec: integer on the wire, symbolic string in parsed output.
///
/// The mapping is immutable after construction and bijective in both
/// directions so encode can round-trip every symbol. Unmapped raw values
/// decode to `UNKNOWN_<n>`.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumCodec {
    base: IntCodec,
    mapping: Arc<BTreeMap<i64, String>>,
    reverse: Arc<BTreeMap<String, i64>>,
}

impl EnumCodec {
    /// Build a codec over `base` from `(raw, symbol)` pairs.
    pub fn new<S: Into<String>>(
        base: IntCodec,
        pairs: impl IntoIterator<Item = (i64, S)>,
    ) -> Result<Self, SchemaError> {
        let mut mapping = BTreeMap::new();
        let mut reverse = BTreeMap::new();
        for (raw, symbol) in pairs {
            let symbol = symbol.into();
            if mapping.insert(raw, symbol.clone()).is_some() {
                return Err(SchemaError::EnumNotBijective(raw.to_string()));
            }
            if reverse.insert(symbol.clone(), raw).is_some() {
                return Err(SchemaError::EnumNotBijective(symbol));
            }
        }
        Ok(Self {
            base,
            mapping: Arc::new(mapping),
            reverse: Arc::new(reverse),
        })
    }

    pub fn base(&self) -> IntCodec {
        self.base
    }

    pub fn mapping(&self) -> &BTreeMap<i64, String> {
        &self.mapping
    }

    /// Map a raw integer to its symbol, or the `UNKNOWN_<n>` fallback.
    pub fn symbol(&self, raw: i64) -> String {
        self.mapping
            .get(&raw)
            .cloned()
            .unwrap_or_else(|| format!("UNKNOWN_{raw}"))
    }

    fn parse(&self, data: &[u8], offset: usize) -> Result<Value, ParserError> {
        let raw = self.base.parse_raw(data, offset)?;
        Ok(Value::Str(self.symbol(raw)))
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, ParserError> {
        let symbol = value
            .as_str()
            .ok_or_else(|| ParserError::Encode(format!("enum expects a symbol, got {}", value.kind())))?;
        let raw = self
            .reverse
            .get(symbol)
            .ok_or_else(|| ParserError::Encode(format!("enum value '{symbol}' not in mapping")))?;
        self.base.encode_raw(*raw)
    }
}

/// Closed variant over the primitive block codecs.
#[derive(Debug, Clone, PartialEq)]
pub enum DataType {
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    /// Fixed-length ASCII field, null-terminated on decode.
    String { length: usize },
    /// Unsigned bit field of declared width (8, 16, 32 or 64).
    Bitmap { bits: u8 },
    Enum(EnumCodec),
}

impl DataType {
    /// Shorthand for an enum field over `UInt8`, the protocol's common case.
    pub fn enum8<S: Into<String>>(
        pairs: impl IntoIterator<Item = (i64, S)>,
    ) -> Result<Self, SchemaError> {
        Ok(DataType::Enum(EnumCodec::new(IntCodec::UInt8, pairs)?))
    }

    /// Fixed size in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataType::UInt8 | DataType::Int8 => 1,
            DataType::UInt16 | DataType::Int16 => 2,
            DataType::UInt32 | DataType::Int32 => 4,
            DataType::String { length } => *length,
            DataType::Bitmap { bits } => usize::from(*bits) / 8,
            DataType::Enum(codec) => codec.base().size(),
        }
    }

    /// The integer codec behind this type, when there is one.
    pub fn as_int_codec(&self) -> Option<IntCodec> {
        match self {
            DataType::UInt8 => Some(IntCodec::UInt8),
            DataType::Int8 => Some(IntCodec::Int8),
            DataType::UInt16 => Some(IntCodec::UInt16),
            DataType::Int16 => Some(IntCodec::Int16),
            DataType::UInt32 => Some(IntCodec::UInt32),
            DataType::Int32 => Some(IntCodec::Int32),
            _ => None,
        }
    }

    /// Structural identity used by registry conflict detection. Includes
    /// type parameters so `String(length=8)` and `String(length=16)` differ.
    pub fn fingerprint(&self) -> String {
        match self {
            DataType::String { length } => format!("String(length={length})"),
            DataType::Bitmap { bits } => format!("Bitmap(bits={bits})"),
            DataType::Enum(codec) => {
                let pairs: Vec<String> = codec
                    .mapping()
                    .iter()
                    .map(|(k, v)| format!("{k}:{v}"))
                    .collect();
                format!(
                    "Enum(base={}, mapping=[{}])",
                    codec.base().name(),
                    pairs.join(", ")
                )
            }
            other => other
                .as_int_codec()
                .map(|c| c.name().to_string())
                .unwrap_or_default(),
        }
    }

    /// Definition-time validation; bad widths are representable but refuse
    /// to enter a schema.
    pub fn check(&self) -> Result<(), SchemaError> {
        match self {
            DataType::Bitmap { bits } if !matches!(bits, 8 | 16 | 32 | 64) => {
                Err(SchemaError::BadBitmapWidth(*bits))
            }
            DataType::String { length: 0 } => Err(SchemaError::Invalid(
                "String length must be non-zero".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Parse the value at `offset` from a normalized payload.
    pub fn parse(&self, data: &[u8], offset: usize) -> Result<Value, ParserError> {
        if let Some(codec) = self.as_int_codec() {
            let raw = codec.parse_raw(data, offset)?;
            return Ok(codec.to_value(raw));
        }
        match self {
            DataType::String { length } => {
                if offset + length > data.len() {
                    return Err(ParserError::OutOfBounds {
                        kind: "String",
                        offset,
                        len: data.len(),
                    });
                }
                let raw = &data[offset..offset + length];
                let end = raw.iter().position(|&b| b == 0x00).unwrap_or(raw.len());
                let text = &raw[..end];
                if text.iter().any(|&b| b >= 0x80) {
                    return Err(ParserError::NonAscii { offset });
                }
                Ok(Value::Str(
                    text.iter().map(|&b| b as char).collect::<String>(),
                ))
            }
            DataType::Bitmap { bits } => {
                let size = usize::from(*bits) / 8;
                if offset + size > data.len() {
                    return Err(ParserError::OutOfBounds {
                        kind: "Bitmap",
                        offset,
                        len: data.len(),
                    });
                }
                let mut acc: u64 = 0;
                for &byte in &data[offset..offset + size] {
                    acc = (acc << 8) | u64::from(byte);
                }
                Ok(Value::UInt(acc))
            }
            DataType::Enum(codec) => codec.parse(data, offset),
            _ => unreachable!("integer codecs handled above"),
        }
    }

    /// Encode a value for writing, big-endian.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, ParserError> {
        if let Some(codec) = self.as_int_codec() {
            let v = match value {
                Value::Int(v) => *v,
                Value::UInt(v) => i64::try_from(*v).map_err(|_| {
                    ParserError::Encode(format!("{} value {v} out of range", codec.name()))
                })?,
                other => {
                    return Err(ParserError::Encode(format!(
                        "{} expects an integer, got {}",
                        codec.name(),
                        other.kind()
                    )))
                }
            };
            return codec.encode_raw(v);
        }
        match self {
            DataType::String { length } => {
                let text = value.as_str().ok_or_else(|| {
                    ParserError::Encode(format!("String expects a string, got {}", value.kind()))
                })?;
                if !text.is_ascii() {
                    return Err(ParserError::Encode(
                        "String value must be ASCII".to_string(),
                    ));
                }
                if text.len() > *length {
                    return Err(ParserError::Encode(format!(
                        "string '{text}' exceeds max length {length}"
                    )));
                }
                let mut bytes = text.as_bytes().to_vec();
                bytes.resize(*length, 0x00);
                Ok(bytes)
            }
            DataType::Bitmap { bits } => {
                let v = match value {
                    Value::UInt(v) => *v,
                    Value::Int(v) if *v >= 0 => *v as u64,
                    other => {
                        return Err(ParserError::Encode(format!(
                            "Bitmap expects an unsigned integer, got {}",
                            other.kind()
                        )))
                    }
                };
                if *bits < 64 && v >= (1u64 << bits) {
                    return Err(ParserError::Encode(format!(
                        "Bitmap({bits}) value {v} out of range"
                    )));
                }
                let size = usize::from(*bits) / 8;
                let be = v.to_be_bytes();
                Ok(be[8 - size..].to_vec())
            }
            DataType::Enum(codec) => codec.encode(value),
            _ => unreachable!("integer codecs handled above"),
        }
    }
}
