//! # voltkit-core - Power Station SDK Core
//!
//! This crate provides the decode stack and client orchestrator for power
//! station devices that expose versioned data *blocks* over Modbus RTU
//! frames carried by a vendor transport.
//!
//! ## Key Components
//!
//! - **Data types**: primitive wire codecs (integers, fixed strings,
//!   bitmaps, enums) with explicit big-endian layout
//! - **Transforms**: named pure value transforms composable into per-field
//!   pipelines (`abs`, `scale:0.1`, `hex_enable_list:0:3`, ...)
//! - **Schema framework**: declarative, immutable block schemas with
//!   arrays, bit-packed fields and nested groups
//! - **Schema registry**: conflict-checked catalogs with a read-only
//!   built-in catalog and instance-scoped clones
//! - **Modbus layer**: pure request framing, CRC16 and response
//!   normalization
//! - **Client**: sync orchestrator (transport → Modbus → parse → device
//!   state) with retry, plus an async facade that serializes access
//!
//! ## Example
//!
//! ```rust,ignore
//! use voltkit_core::{Client, profiles};
//!
//! let profile = profiles::es1100();
//! let mut client = Client::new(transport, profile);
//! client.connect()?;
//! let record = client.read_block(1300, None)?;
//! println!("grid frequency: {}", record.values["frequency"]);
//! ```

pub mod client;
pub mod client_async;
pub mod datatypes;
pub mod error;
pub mod modbus;
pub mod parser;
pub mod profile;
pub mod profiles;
pub mod record;
pub mod registry;
pub mod retry;
pub mod schema;
pub mod schemas;
pub mod snapshot;
pub mod state;
pub mod transform;
pub mod transport;
pub mod value;

/// Protocol generation this SDK speaks by default.
pub const PROTOCOL_VERSION: u32 = 2000;

pub use client::{Client, ClientBuilder, ReadGroupResult};
pub use client_async::AsyncClient;
pub use datatypes::{DataType, EnumCodec, IntCodec};
pub use error::{
    ConfigError, DeviceError, Error, ParserError, ProtocolError, Result, SchemaError,
    TransformError, TransportError,
};
pub use parser::BlockParser;
pub use profile::{BlockGroupDef, DeviceProfile};
pub use record::{ParsedRecord, ValidationResult};
pub use registry::SchemaRegistry;
pub use retry::RetryPolicy;
pub use schema::{
    ArrayField, BlockSchema, BlockSchemaBuilder, EvidenceStatus, Field, FieldGroup, PackedField,
    SchemaItem, SubField,
};
pub use snapshot::DeviceSnapshot;
pub use state::{BlockGroup, DeviceState};
pub use transform::{Pipeline, Transform};
pub use transport::{NoOpSink, PushCallback, Sink, Transport};
pub use value::Value;
