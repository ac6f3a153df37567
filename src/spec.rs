//! Desired-state resource model
//!
//! A [`ResourceSpec`] is the declared form of a resource: a stable logical
//! name, a type tag, and a property map whose values may reference the
//! outputs of other resources. Specs are immutable once built and live only
//! within a single reconciliation run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Stable logical name of a resource, unique within a graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ResourceId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Reference to another resource's output value
///
/// References are placeholders until the Applier resolves them against the
/// committed state snapshot. The referenced resource becomes an implicit
/// dependency of the referencing resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputRef {
    /// Logical name of the referenced resource
    pub resource: ResourceId,
    /// Name of the output value on that resource
    pub output: String,
}

/// A property value: scalar, list, or reference to another resource's output
///
/// Floats are deliberately absent so values stay `Eq`/`Ord` and diffs stay
/// exact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<PropertyValue>),
    Ref(OutputRef),
}

impl PropertyValue {
    /// Shorthand for a reference value
    pub fn reference(resource: impl Into<ResourceId>, output: impl Into<String>) -> Self {
        Self::Ref(OutputRef {
            resource: resource.into(),
            output: output.into(),
        })
    }

    /// Collect all resource ids referenced by this value, recursing into lists
    pub fn referenced_ids(&self, out: &mut BTreeSet<ResourceId>) {
        match self {
            Self::Ref(r) => {
                out.insert(r.resource.clone());
            }
            Self::List(items) => {
                for item in items {
                    item.referenced_ids(out);
                }
            }
            Self::Bool(_) | Self::Int(_) | Self::String(_) => {}
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Ordered property map; iteration order is the key order, so diffs and
/// serialized state are deterministic
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// Declared form of a single resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Logical name, unique within a graph
    pub id: ResourceId,
    /// Provider-defined type tag (e.g. "compute_function", "schedule_rule")
    pub resource_type: String,
    /// Declared property values, references unresolved
    #[serde(default)]
    pub properties: PropertyMap,
    /// Explicit dependencies in addition to those inferred from references
    #[serde(default)]
    pub depends_on: BTreeSet<ResourceId>,
}

impl ResourceSpec {
    pub fn new(id: impl Into<ResourceId>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            properties: PropertyMap::new(),
            depends_on: BTreeSet::new(),
        }
    }

    /// Builder-style property setter
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Builder-style explicit dependency
    pub fn with_dependency(mut self, id: impl Into<ResourceId>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    /// All dependency ids: explicit `depends_on` plus every id referenced
    /// from a property value
    pub fn dependency_ids(&self) -> BTreeSet<ResourceId> {
        let mut ids = self.depends_on.clone();
        for value in self.properties.values() {
            value.referenced_ids(&mut ids);
        }
        ids
    }
}
