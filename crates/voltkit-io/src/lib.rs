//! # voltkit-io - Transports and Sinks
//!
//! Concrete implementations of the core transport and sink contracts:
//!
//! - **Transports**: an in-memory loopback transport for tests and demos,
//!   plus the keyed [`transport_factory::TransportFactory`] the runtime
//!   uses to build transports from config
//! - **Sinks**: in-memory ring buffer, JSONL append file, and composite
//!   fan-out

/// In-memory ring-buffer sink with read-side queries
pub mod sink_memory;

/// JSONL append-file sink
pub mod sink_jsonl;

/// Ordered fan-out over multiple sinks
pub mod sink_composite;

/// In-memory loopback transport for tests and demos
pub mod transport_memory;

/// Keyed transport constructor registry
pub mod transport_factory;

pub use sink_composite::CompositeSink;
pub use sink_jsonl::JsonlSink;
pub use sink_memory::MemorySink;
pub use transport_factory::{TransportFactory, TransportOpts};
pub use transport_memory::{MemoryHandle, MemoryTransport};
