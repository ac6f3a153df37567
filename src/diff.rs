//! Change set computation
//!
//! Pure and deterministic: identical (desired, recorded) inputs always
//! produce an identical change set, and nothing here calls the provisioning
//! API. Property comparison is structural, with list properties the schema
//! names as unordered compared as multisets.

use crate::graph::ResourceGraph;
use crate::schema::{SchemaRegistry, TypeSchema};
use crate::spec::{PropertyMap, PropertyValue, ResourceId, ResourceSpec};
use crate::state::StateRecord;
use std::collections::BTreeSet;

/// One reconciling operation for a single resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Desired but not recorded
    Create { spec: ResourceSpec },
    /// Recorded, but a mutable property differs
    Update {
        spec: ResourceSpec,
        record: StateRecord,
    },
    /// Recorded, but an immutable property differs; the resource must be
    /// re-provisioned
    Replace {
        spec: ResourceSpec,
        record: StateRecord,
    },
    /// Recorded but no longer desired
    Delete { record: StateRecord },
}

impl Change {
    pub fn id(&self) -> &ResourceId {
        match self {
            Self::Create { spec } | Self::Update { spec, .. } | Self::Replace { spec, .. } => {
                &spec.id
            }
            Self::Delete { record } => &record.id,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Create { .. } => ChangeKind::Create,
            Self::Update { .. } => ChangeKind::Update,
            Self::Replace { .. } => ChangeKind::Replace,
            Self::Delete { .. } => ChangeKind::Delete,
        }
    }
}

/// Operation tag for a [`Change`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeKind {
    Create,
    Update,
    Replace,
    Delete,
}

/// The minimal set of operations reconciling recorded state to desired state
///
/// Entries are sorted by resource id, so two identical runs produce
/// byte-for-byte identical sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    pub fn into_changes(self) -> Vec<Change> {
        self.changes
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn summary(&self) -> ChangeSummary {
        let mut summary = ChangeSummary::default();
        for change in &self.changes {
            match change.kind() {
                ChangeKind::Create => summary.creates += 1,
                ChangeKind::Update => summary.updates += 1,
                ChangeKind::Replace => summary.replaces += 1,
                ChangeKind::Delete => summary.deletes += 1,
            }
        }
        summary
    }
}

/// Change counts by operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub creates: usize,
    pub updates: usize,
    pub replaces: usize,
    pub deletes: usize,
}

impl ChangeSummary {
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }

    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Compare the desired graph against the recorded state
pub fn compute_changes(
    desired: &ResourceGraph,
    state: &[StateRecord],
    registry: &SchemaRegistry,
) -> ChangeSet {
    let mut changes = Vec::new();

    for spec in desired.specs() {
        let record = state.iter().find(|r| r.id == spec.id);
        match record {
            None => changes.push(Change::Create { spec: spec.clone() }),
            Some(record) => {
                let schema = registry.get(&spec.resource_type);
                let changed = changed_properties(&spec.properties, &record.properties, schema);
                if changed.is_empty() && spec.resource_type == record.resource_type {
                    continue;
                }
                // A changed type tag re-provisions just like an immutable
                // property change.
                let forces_replace = spec.resource_type != record.resource_type
                    || changed.iter().any(|name| schema.immutable.contains(name));
                if forces_replace {
                    changes.push(Change::Replace {
                        spec: spec.clone(),
                        record: record.clone(),
                    });
                } else {
                    changes.push(Change::Update {
                        spec: spec.clone(),
                        record: record.clone(),
                    });
                }
            }
        }
    }

    for record in state {
        if !desired.contains(&record.id) {
            changes.push(Change::Delete {
                record: record.clone(),
            });
        }
    }

    changes.sort_by(|a, b| a.id().cmp(b.id()));

    log::debug!(
        "computed change set: {} of {} desired resources differ",
        changes.len(),
        desired.len()
    );

    ChangeSet { changes }
}

/// Names of properties whose values differ, in either direction
fn changed_properties(
    desired: &PropertyMap,
    recorded: &PropertyMap,
    schema: &TypeSchema,
) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = BTreeSet::new();
    for name in desired.keys().chain(recorded.keys()) {
        let equal = match (desired.get(name), recorded.get(name)) {
            (Some(a), Some(b)) => values_equal(a, b, schema.unordered_lists.contains(name)),
            (None, None) => true,
            _ => false,
        };
        if !equal {
            names.insert(name.clone());
        }
    }
    names
}

/// Deep structural equality; top-level lists compare as multisets when the
/// schema marks the property unordered
fn values_equal(a: &PropertyValue, b: &PropertyValue, unordered: bool) -> bool {
    if !unordered {
        return a == b;
    }
    match (a, b) {
        (PropertyValue::List(left), PropertyValue::List(right)) => {
            let mut left = left.clone();
            let mut right = right.clone();
            left.sort();
            right.sort();
            left == right
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TypeSchema;
    use chrono::Utc;
    use std::collections::BTreeSet as Set;

    fn graph(specs: Vec<ResourceSpec>, registry: &SchemaRegistry) -> ResourceGraph {
        ResourceGraph::build(specs, registry).unwrap()
    }

    fn record_for(spec: &ResourceSpec) -> StateRecord {
        StateRecord {
            id: spec.id.clone(),
            resource_type: spec.resource_type.clone(),
            provider_id: format!("prov-{}", spec.id),
            properties: spec.properties.clone(),
            outputs: PropertyMap::new(),
            dependencies: spec.dependency_ids(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn empty_state_creates_everything() {
        let registry = SchemaRegistry::new();
        let desired = graph(
            vec![
                ResourceSpec::new("a", "t"),
                ResourceSpec::new("b", "t")
                    .with_property("input", PropertyValue::reference("a", "out")),
            ],
            &registry,
        );

        let changes = compute_changes(&desired, &[], &registry);
        assert_eq!(changes.summary().creates, 2);
        assert_eq!(changes.summary().total(), 2);
    }

    #[test]
    fn unchanged_resources_produce_no_changes() {
        let registry = SchemaRegistry::new();
        let spec = ResourceSpec::new("a", "t").with_property("memory", 256);
        let state = vec![record_for(&spec)];
        let desired = graph(vec![spec], &registry);

        let changes = compute_changes(&desired, &state, &registry);
        assert!(changes.is_empty());
    }

    #[test]
    fn mutable_difference_is_update() {
        let registry = SchemaRegistry::new();
        let old = ResourceSpec::new("a", "t").with_property("memory", 256);
        let state = vec![record_for(&old)];
        let desired = graph(
            vec![ResourceSpec::new("a", "t").with_property("memory", 512)],
            &registry,
        );

        let changes = compute_changes(&desired, &state, &registry);
        assert_eq!(changes.summary().updates, 1);
    }

    #[test]
    fn immutable_difference_is_replace() {
        let registry =
            SchemaRegistry::new().with("t", TypeSchema::new().immutable("runtime"));
        let old = ResourceSpec::new("a", "t").with_property("runtime", "go1.x");
        let state = vec![record_for(&old)];
        let desired = graph(
            vec![ResourceSpec::new("a", "t").with_property("runtime", "provided")],
            &registry,
        );

        let changes = compute_changes(&desired, &state, &registry);
        assert_eq!(changes.summary().replaces, 1);
    }

    #[test]
    fn removed_resource_is_delete_and_rest_untouched() {
        let registry = SchemaRegistry::new();
        let a = ResourceSpec::new("a", "t");
        let b = ResourceSpec::new("b", "t")
            .with_property("input", PropertyValue::reference("a", "out"));
        let state = vec![record_for(&a), record_for(&b)];
        let desired = graph(vec![a], &registry);

        let changes = compute_changes(&desired, &state, &registry);
        let ops: Vec<_> = changes.iter().map(|c| (c.id().clone(), c.kind())).collect();
        assert_eq!(ops, vec![(ResourceId::from("b"), ChangeKind::Delete)]);
    }

    #[test]
    fn unordered_list_ignores_order_only() {
        let registry =
            SchemaRegistry::new().with("t", TypeSchema::new().unordered_list("policies"));
        let old = ResourceSpec::new("a", "t").with_property(
            "policies",
            PropertyValue::List(vec!["read".into(), "write".into()]),
        );
        let state = vec![record_for(&old)];

        // Same elements, different order: no change
        let desired = graph(
            vec![ResourceSpec::new("a", "t").with_property(
                "policies",
                PropertyValue::List(vec!["write".into(), "read".into()]),
            )],
            &registry,
        );
        assert!(compute_changes(&desired, &state, &registry).is_empty());

        // Different multiplicity: still a change
        let desired = graph(
            vec![ResourceSpec::new("a", "t").with_property(
                "policies",
                PropertyValue::List(vec!["write".into(), "write".into(), "read".into()]),
            )],
            &registry,
        );
        assert_eq!(compute_changes(&desired, &state, &registry).len(), 1);
    }

    #[test]
    fn ordered_list_is_order_sensitive() {
        let registry = SchemaRegistry::new();
        let old = ResourceSpec::new("a", "t").with_property(
            "stages",
            PropertyValue::List(vec!["build".into(), "deploy".into()]),
        );
        let state = vec![record_for(&old)];
        let desired = graph(
            vec![ResourceSpec::new("a", "t").with_property(
                "stages",
                PropertyValue::List(vec!["deploy".into(), "build".into()]),
            )],
            &registry,
        );

        assert_eq!(compute_changes(&desired, &state, &registry).len(), 1);
    }

    #[test]
    fn diff_is_deterministic() {
        let registry = SchemaRegistry::new().with("t", TypeSchema::new().immutable("key"));
        let a = ResourceSpec::new("a", "t").with_property("key", "v1");
        let b = ResourceSpec::new("b", "t");
        let c = ResourceSpec::new("c", "t");
        let state = vec![record_for(&a), record_for(&c)];
        let specs = vec![
            a.clone().with_property("key", "v2"),
            b,
        ];

        let first = compute_changes(&graph(specs.clone(), &registry), &state, &registry);
        let second = compute_changes(&graph(specs, &registry), &state, &registry);
        assert_eq!(first, second);

        let ids: Set<_> = first.iter().map(|c| c.id().clone()).collect();
        assert_eq!(ids.len(), first.len());
    }
}
