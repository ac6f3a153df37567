//! Provider-defined type schemas
//!
//! Which properties are immutable (forcing Replace), which list properties
//! compare as unordered sets, and whether a type supports create-before-delete
//! replacement are provider policy, not engine logic. Callers supply that
//! policy here as external configuration.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Diff and replacement policy for one resource type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSchema {
    /// Properties that cannot change in place; a difference forces Replace
    #[serde(default)]
    pub immutable: BTreeSet<String>,
    /// List-typed properties the provider defines as unordered sets
    #[serde(default)]
    pub unordered_lists: BTreeSet<String>,
    /// Properties that must be present in every spec of this type
    #[serde(default)]
    pub required: BTreeSet<String>,
    /// Whether the provider can create the replacement before deleting the
    /// old resource; if false, Replace splits into delete-then-create phases
    #[serde(default)]
    pub create_before_delete: bool,
}

impl TypeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a property immutable
    pub fn immutable(mut self, property: impl Into<String>) -> Self {
        self.immutable.insert(property.into());
        self
    }

    /// Mark a list property as unordered
    pub fn unordered_list(mut self, property: impl Into<String>) -> Self {
        self.unordered_lists.insert(property.into());
        self
    }

    /// Mark a property required
    pub fn require(mut self, property: impl Into<String>) -> Self {
        self.required.insert(property.into());
        self
    }

    /// Allow create-before-delete replacement
    pub fn create_before_delete(mut self) -> Self {
        self.create_before_delete = true;
        self
    }
}

/// Registry mapping type tags to their schemas
///
/// Unknown types fall back to a permissive default: every property mutable,
/// every list ordered, replacement delete-before-create.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaRegistry {
    types: BTreeMap<String, TypeSchema>,
    #[serde(skip)]
    fallback: TypeSchema,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema for a type tag, replacing any previous one
    pub fn register(&mut self, resource_type: impl Into<String>, schema: TypeSchema) -> &mut Self {
        self.types.insert(resource_type.into(), schema);
        self
    }

    /// Builder-style registration
    pub fn with(mut self, resource_type: impl Into<String>, schema: TypeSchema) -> Self {
        self.register(resource_type, schema);
        self
    }

    /// Schema for a type tag, or the permissive default
    pub fn get(&self, resource_type: &str) -> &TypeSchema {
        self.types.get(resource_type).unwrap_or(&self.fallback)
    }

    /// Load a registry from a JSON document mapping type tags to schemas
    ///
    /// Provider schema catalogs ship as JSON; the document is a plain object
    /// keyed by type tag.
    pub fn from_json(input: &str) -> serde_json::Result<Self> {
        let types: BTreeMap<String, TypeSchema> = serde_json::from_str(input)?;
        Ok(Self {
            types,
            fallback: TypeSchema::default(),
        })
    }

    /// Serialize the registered schemas back to the JSON catalog form
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.types)
    }
}
