//! Maps record fields to element ids.
//!
//! A record's field names double as its element id tags, so a field declared
//! as `#[serde(rename = "4286")]` is stored in element `0x4286`. A field named
//! `"-"` is never encoded or decoded.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use crate::error::Result;
use crate::varint::ElementId;

/// Tag that excludes a field.
pub const IGNORE_TAG: &str = "-";

/// A single mapped field of a [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldEntry {
    /// The element id the field is stored in.
    pub id: ElementId,
    /// Position of the field within the record's field list.
    pub index: usize,
    /// The field name as reported by the record.
    pub name: &'static str,
}

/// The mapping of element ids to fields for one record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    name: &'static str,
    declared: &'static [&'static str],
    fields: Vec<FieldEntry>,
}

impl Schema {
    /// Parses the tags of a record's fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedTag`](crate::Error::MalformedTag) if any field
    /// name is neither a hex id nor `"-"`.
    pub fn build(name: &'static str, fields: &'static [&'static str]) -> Result<Self> {
        let mut entries = Vec::with_capacity(fields.len());
        for (index, &field) in fields.iter().enumerate() {
            if let Some(id) = parse_tag(field)? {
                entries.push(FieldEntry {
                    id,
                    index,
                    name: field,
                });
            }
        }

        Ok(Self {
            name,
            declared: fields,
            fields: entries,
        })
    }

    /// The record's type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The mapped fields in declaration order.
    pub fn fields(&self) -> &[FieldEntry] {
        &self.fields
    }

    /// All declared field names, including excluded ones.
    pub fn declared(&self) -> &'static [&'static str] {
        self.declared
    }

    /// The amount of declared fields, including excluded ones.
    pub fn field_count(&self) -> usize {
        self.declared.len()
    }

    /// Finds the field for an element id.
    ///
    /// If several fields share an id, the first declared one wins.
    pub fn field(&self, id: ElementId) -> Option<&FieldEntry> {
        self.fields.iter().find(|f| f.id == id)
    }
}

/// Parses a single field tag. Returns [`None`] for excluded fields.
fn parse_tag(tag: &str) -> Result<Option<ElementId>> {
    if tag == IGNORE_TAG {
        Ok(None)
    } else {
        ElementId::from_tag(tag).map(Some)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct StructKey {
    name: &'static str,
    fields: usize,
    len: usize,
}

impl StructKey {
    fn new(name: &'static str, fields: &'static [&'static str]) -> Self {
        Self {
            name,
            fields: fields.as_ptr().addr(),
            len: fields.len(),
        }
    }
}

/// A memoized registry of [`Schema`]s.
///
/// Lookups only take a shared lock. A miss builds the schema without holding
/// any lock and then publishes it. Two threads missing on the same record may
/// both build it, in which case the later one replaces the earlier equal one.
#[derive(Debug, Default)]
pub struct SchemaCache {
    schemas: RwLock<HashMap<StructKey, Arc<Schema>>>,
    tags: RwLock<HashMap<&'static str, Option<ElementId>>>,
}

static GLOBAL: LazyLock<Arc<SchemaCache>> = LazyLock::new(|| Arc::new(SchemaCache::new()));

impl SchemaCache {
    /// Creates a new, empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the process-wide cache used by default.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Gets the schema for a record, building it on first use.
    ///
    /// Records are identified by their name and their static field list.
    ///
    /// # Errors
    ///
    /// Same as [`Schema::build`]. Failures are not cached.
    pub fn schema(&self, name: &'static str, fields: &'static [&'static str]) -> Result<Arc<Schema>> {
        let key = StructKey::new(name, fields);

        let cached = self
            .schemas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .map(Arc::clone);

        if let Some(schema) = cached {
            return Ok(schema);
        }

        let schema = Arc::new(Schema::build(name, fields)?);
        log::debug!(
            "Built schema for `{name}` with {} of {} fields mapped.",
            schema.fields.len(),
            schema.field_count()
        );

        self.schemas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(&schema));

        Ok(schema)
    }

    /// Parses a single field tag, caching the result.
    ///
    /// Returns [`None`] for excluded fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedTag`](crate::Error::MalformedTag) if the tag
    /// isn't valid. Failures are not cached.
    pub fn tag(&self, tag: &'static str) -> Result<Option<ElementId>> {
        let cached = self
            .tags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tag)
            .copied();

        if let Some(id) = cached {
            return Ok(id);
        }

        let id = parse_tag(tag)?;
        self.tags
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag, id);

        Ok(id)
    }

    /// Gets the amount of cached schemas.
    pub fn len(&self) -> usize {
        self.schemas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no schemas are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes all cached schemas and tags.
    pub fn clear(&self) {
        self.schemas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.tags
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
