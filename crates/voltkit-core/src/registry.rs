//! Schema registry: the catalog of block schemas by block id.
//!
//! Instance registries are the unit of runtime ownership; each client owns
//! one, usually seeded from the read-only built-in catalog via
//! [`SchemaRegistry::with_builtins`]. Registration is conflict-checked:
//! re-registering an identical schema is a no-op, a structurally different
//! schema under the same id is rejected and the registry left untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::ParserError;
use crate::schema::{BlockSchema, SchemaItem};

#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    schemas: BTreeMap<u16, Arc<BlockSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh registry preloaded with every built-in schema.
    pub fn with_builtins() -> Self {
        crate::schemas::builtin_catalog().clone()
    }

    /// Register one schema.
    ///
    /// Silently idempotent for an identical schema; fails on a rename or
    /// any field-level structure conflict, leaving the registry unchanged.
    pub fn register(&mut self, schema: Arc<BlockSchema>) -> Result<(), ParserError> {
        if let Some(existing) = self.schemas.get(&schema.block_id()) {
            check_compatible(existing, &schema)?;
            debug!(
                block_id = schema.block_id(),
                "schema already registered, skipping"
            );
            return Ok(());
        }
        debug!(
            block_id = schema.block_id(),
            name = schema.name(),
            "registered schema"
        );
        self.schemas.insert(schema.block_id(), schema);
        Ok(())
    }

    /// Register a batch atomically: every schema is validated against the
    /// current state and the rest of the batch first; on any conflict the
    /// whole batch is rejected and the registry is left bit-identical.
    pub fn register_many(
        &mut self,
        schemas: impl IntoIterator<Item = Arc<BlockSchema>>,
    ) -> Result<(), ParserError> {
        let schemas: Vec<Arc<BlockSchema>> = schemas.into_iter().collect();
        let mut staged: BTreeMap<u16, &Arc<BlockSchema>> = BTreeMap::new();
        let mut errors: Vec<String> = Vec::new();

        for (index, schema) in schemas.iter().enumerate() {
            let against = self
                .schemas
                .get(&schema.block_id())
                .or_else(|| staged.get(&schema.block_id()).copied());
            match against {
                Some(existing) => {
                    if let Err(err) = check_compatible(existing, schema) {
                        errors.push(format!("schema {index}: {err}"));
                    }
                }
                None => {
                    staged.insert(schema.block_id(), schema);
                }
            }
        }

        if !errors.is_empty() {
            return Err(ParserError::BatchConflict(errors.join("\n")));
        }

        for schema in schemas {
            self.schemas.entry(schema.block_id()).or_insert(schema);
        }
        Ok(())
    }

    pub fn get(&self, block_id: u16) -> Option<&Arc<BlockSchema>> {
        self.schemas.get(&block_id)
    }

    /// All registered block ids, sorted.
    pub fn list_blocks(&self) -> Vec<u16> {
        self.schemas.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<BlockSchema>> {
        self.schemas.values()
    }

    /// Resolve schemas for a set of block ids.
    ///
    /// In strict mode any missing id fails the whole resolution; otherwise
    /// missing ids are logged and the found subset is returned.
    pub fn resolve_blocks(
        &self,
        block_ids: &[u16],
        strict: bool,
    ) -> Result<BTreeMap<u16, Arc<BlockSchema>>, ParserError> {
        let mut resolved = BTreeMap::new();
        let mut missing = Vec::new();
        for &id in block_ids {
            match self.schemas.get(&id) {
                Some(schema) => {
                    resolved.insert(id, Arc::clone(schema));
                }
                None => missing.push(id),
            }
        }
        if !missing.is_empty() {
            if strict {
                return Err(ParserError::MissingSchemas {
                    missing,
                    available: self.list_blocks(),
                });
            }
            warn!(?missing, "missing schemas for blocks");
        }
        Ok(resolved)
    }
}

/// Compare a new schema against the registered one for the same block id.
fn check_compatible(existing: &BlockSchema, new: &BlockSchema) -> Result<(), ParserError> {
    if existing.name() != new.name() {
        return Err(ParserError::NameConflict {
            block_id: new.block_id(),
            existing: existing.name().to_string(),
            new: new.name().to_string(),
        });
    }

    let conflicts = item_conflicts(existing, new);
    if !conflicts.is_empty() {
        return Err(ParserError::SchemaConflict {
            block_id: new.block_id(),
            name: new.name().to_string(),
            details: conflicts.join("\n"),
        });
    }
    Ok(())
}

/// Field-level conflict listing: added/removed items and, for common
/// items, offset / type fingerprint / required flag / transform changes.
fn item_conflicts(existing: &BlockSchema, new: &BlockSchema) -> Vec<String> {
    let mut conflicts = Vec::new();

    let existing_items: BTreeMap<&str, &SchemaItem> =
        existing.items().iter().map(|i| (i.name(), i)).collect();
    let new_items: BTreeMap<&str, &SchemaItem> =
        new.items().iter().map(|i| (i.name(), i)).collect();

    let added: Vec<&str> = new_items
        .keys()
        .filter(|name| !existing_items.contains_key(*name))
        .copied()
        .collect();
    let removed: Vec<&str> = existing_items
        .keys()
        .filter(|name| !new_items.contains_key(*name))
        .copied()
        .collect();
    if !added.is_empty() {
        conflicts.push(format!("  added fields: {added:?}"));
    }
    if !removed.is_empty() {
        conflicts.push(format!("  removed fields: {removed:?}"));
    }

    for (name, old_item) in &existing_items {
        let Some(new_item) = new_items.get(name) else {
            continue;
        };
        compare_items(name, old_item, new_item, &mut conflicts);
    }

    conflicts
}

fn compare_items(name: &str, old: &SchemaItem, new: &SchemaItem, conflicts: &mut Vec<String>) {
    let (old_offset, new_offset) = (item_offset(old), item_offset(new));
    if old_offset != new_offset {
        conflicts.push(format!(
            "  field '{name}': offset changed from {old_offset} to {new_offset}"
        ));
    }

    let (old_type, new_type) = (item_type_fingerprint(old), item_type_fingerprint(new));
    if old_type != new_type {
        conflicts.push(format!(
            "  field '{name}': type changed from {old_type} to {new_type}"
        ));
    }

    if old.required() != new.required() {
        conflicts.push(format!(
            "  field '{name}': required changed from {} to {}",
            old.required(),
            new.required()
        ));
    }

    let (old_tx, new_tx) = (item_transforms(old), item_transforms(new));
    if old_tx != new_tx {
        conflicts.push(format!(
            "  field '{name}': transform changed from [{old_tx}] to [{new_tx}]"
        ));
    }
}

fn item_offset(item: &SchemaItem) -> usize {
    match item {
        SchemaItem::Scalar(f) => f.offset,
        SchemaItem::Array(f) => f.offset,
        SchemaItem::Packed(f) => f.offset,
        SchemaItem::Group(g) => g.fields.iter().map(|f| f.offset).min().unwrap_or(0),
    }
}

/// Type identity including parameters, so `String(length=8)` differs from
/// `String(length=16)` and packed/array shapes are part of the identity.
fn item_type_fingerprint(item: &SchemaItem) -> String {
    match item {
        SchemaItem::Scalar(f) => f.dtype.fingerprint(),
        SchemaItem::Array(f) => format!(
            "Array(count={}, stride={}, item={})",
            f.count,
            f.stride,
            f.item_type.fingerprint()
        ),
        SchemaItem::Packed(f) => {
            let subs: Vec<String> = f
                .fields
                .iter()
                .map(|s| format!("{}@{}..{}", s.name, s.bit_start, s.bit_end))
                .collect();
            format!(
                "Packed(count={}, stride={}, base={}, subs=[{}])",
                f.count,
                f.stride,
                f.base.name(),
                subs.join(", ")
            )
        }
        SchemaItem::Group(g) => {
            let subs: Vec<String> = g
                .fields
                .iter()
                .map(|f| format!("{}@{}:{}", f.name, f.offset, f.dtype.fingerprint()))
                .collect();
            format!("Group([{}])", subs.join(", "))
        }
    }
}

fn item_transforms(item: &SchemaItem) -> String {
    match item {
        SchemaItem::Scalar(f) => f.transform.spec_string(),
        SchemaItem::Array(f) => f.transform.spec_string(),
        SchemaItem::Packed(f) => f
            .fields
            .iter()
            .map(|s| format!("{}:[{}]", s.name, s.transform.spec_string()))
            .collect::<Vec<_>>()
            .join("; "),
        SchemaItem::Group(g) => g
            .fields
            .iter()
            .map(|f| format!("{}:[{}]", f.name, f.transform.spec_string()))
            .collect::<Vec<_>>()
            .join("; "),
    }
}
