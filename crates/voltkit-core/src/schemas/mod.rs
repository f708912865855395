//! Built-in block schema catalog.
//!
//! One module per block, mirroring the device documentation. The catalog
//! is assembled into a process-wide read-only [`SchemaRegistry`] exactly
//! once; clients take cheap clones via [`SchemaRegistry::with_builtins`].

use std::sync::{Arc, OnceLock};

use crate::registry::SchemaRegistry;
use crate::schema::BlockSchema;

mod block_100;
mod block_720;
mod block_1300;
mod block_1400;
mod block_6000;
mod block_6100;
mod block_12002;
mod block_17400;

/// Every built-in schema, freshly constructed.
fn catalog() -> Result<Vec<BlockSchema>, crate::error::SchemaError> {
    Ok(vec![
        block_100::schema()?,
        block_720::schema()?,
        block_1300::schema()?,
        block_1400::schema()?,
        block_6000::schema()?,
        block_6100::schema()?,
        block_12002::schema()?,
        block_17400::schema()?,
    ])
}

static BUILTINS: OnceLock<SchemaRegistry> = OnceLock::new();

/// The process-wide built-in catalog.
///
/// Populated on first access and read-only afterwards. The catalog is
/// covered by tests, so a failure here is a broken build, not a runtime
/// condition.
pub fn builtin_catalog() -> &'static SchemaRegistry {
    BUILTINS.get_or_init(|| {
        let mut registry = SchemaRegistry::new();
        let schemas = catalog().expect("built-in schema definitions are valid");
        registry
            .register_many(schemas.into_iter().map(Arc::new))
            .expect("built-in schema catalog is conflict-free");
        registry
    })
}
