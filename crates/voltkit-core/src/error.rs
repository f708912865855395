//! Error taxonomy for the SDK.
//!
//! Each layer owns a distinct error type; the top-level [`Error`] is the sum
//! of all of them. Retry classification in the client is by variant:
//! [`Error::Transport`] is retried, everything else fails fast.

use std::time::Duration;

/// Result alias used throughout the SDK.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level SDK error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport layer failure (connection, send, response timeout).
    /// The only retriable class.
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    /// Modbus layer failure (CRC, exception response, malformed frame).
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    /// Schema or parse failure (unknown block, required field, validation).
    #[error("parser: {0}")]
    Parser(#[from] ParserError),

    /// Device-state layer invariant violation.
    #[error("device: {0}")]
    Device(#[from] DeviceError),

    /// Configuration failure. Fatal at construction time.
    #[error("config: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Short class name for user-facing reports, e.g. `TransportError`.
    pub fn class(&self) -> &'static str {
        match self {
            Error::Transport(_) => "TransportError",
            Error::Protocol(_) => "ProtocolError",
            Error::Parser(_) => "ParserError",
            Error::Device(_) => "DeviceError",
            Error::Config(_) => "ConfigError",
        }
    }

    /// Whether the client retry loop may re-attempt after this error.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

/// Transport layer errors: connection failure, send failure, timeout,
/// underlying network faults.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("not connected")]
    NotConnected,

    #[error("{0}")]
    Io(String),
}

/// Modbus protocol errors. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("CRC mismatch: frame carries {found:#06x}, computed {computed:#06x}")]
    CrcMismatch { found: u16, computed: u16 },

    #[error("device exception response, code {code:#04x}")]
    Exception { code: u8 },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

/// Schema and parse errors. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ParserError {
    #[error("no schema registered for block {0}")]
    UnknownBlock(u16),

    #[error("block {block_id} already registered as '{name}'")]
    DuplicateBlock { block_id: u16, name: String },

    #[error("block {block_id} already registered as '{existing}', cannot re-register as '{new}'")]
    NameConflict {
        block_id: u16,
        existing: String,
        new: String,
    },

    #[error("block {block_id} ({name}) structure conflict:\n{details}")]
    SchemaConflict {
        block_id: u16,
        name: String,
        details: String,
    },

    #[error("batch registration rejected, registry unchanged:\n{0}")]
    BatchConflict(String),

    #[error("missing schemas for blocks {missing:?}; available: {available:?}")]
    MissingSchemas {
        missing: Vec<u16>,
        available: Vec<u16>,
    },

    #[error("{kind} at offset {offset} exceeds data length {len}")]
    OutOfBounds {
        kind: &'static str,
        offset: usize,
        len: usize,
    },

    #[error("string at offset {offset} contains non-ASCII bytes")]
    NonAscii { offset: usize },

    #[error("cannot encode {0}")]
    Encode(String),

    #[error("block {block_id} ({name}) validation failed: {errors:?}")]
    ValidationFailed {
        block_id: u16,
        name: String,
        errors: Vec<String>,
    },

    #[error("field '{field}': {source}")]
    FieldFailed {
        field: String,
        #[source]
        source: Box<ParserError>,
    },

    #[error(transparent)]
    Transform(#[from] TransformError),
}

impl ParserError {
    /// Wrap an error with the name of the field it occurred in.
    pub fn in_field(self, field: &str) -> ParserError {
        ParserError::FieldFailed {
            field: field.to_string(),
            source: Box::new(self),
        }
    }
}

/// Transform pipeline errors: compile-time (unknown name, malformed args)
/// and run-time (value not applicable).
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("unknown transform '{0}'")]
    Unknown(String),

    #[error("transform '{name}': invalid arguments '{args}'")]
    BadArgs { name: String, args: String },

    #[error("transform '{name}' failed on {input}: {reason}")]
    Apply {
        name: &'static str,
        input: String,
        reason: String,
    },
}

/// Device-state layer errors. Rare; surfaced unchanged.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("block group '{0}' not supported by this device profile")]
    UnsupportedGroup(String),

    #[error("{0}")]
    Internal(String),
}

/// Configuration errors: YAML schema violations, unresolved references,
/// validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("invalid YAML in {path}: {reason}")]
    Yaml { path: String, reason: String },

    #[error("{0}")]
    Invalid(String),

    #[error("unknown transport key '{0}'")]
    UnknownTransport(String),

    #[error("unknown sink '{0}'")]
    UnknownSink(String),
}

/// Schema definition errors raised by constructors and builders.
///
/// These indicate a broken schema definition (bad bit range, invalid bitmap
/// width, non-bijective enum), not a bad payload.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("block {block_id}: duplicate item name '{name}'")]
    DuplicateName { block_id: u16, name: String },

    #[error("bitmap width must be 8, 16, 32 or 64, got {0}")]
    BadBitmapWidth(u8),

    #[error("sub-field '{name}': bit range {start}..{end} invalid for {bits}-bit base")]
    BadBitRange {
        name: String,
        start: u8,
        end: u8,
        bits: u8,
    },

    #[error("enum mapping is not bijective: value '{0}' appears twice")]
    EnumNotBijective(String),

    #[error("array field '{name}': stride {stride} smaller than item size {item_size}")]
    BadStride {
        name: String,
        stride: usize,
        item_size: usize,
    },

    #[error("{0}")]
    Invalid(String),
}
