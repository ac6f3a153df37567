//! Resource graph construction and validation
//!
//! Turns a flat list of [`ResourceSpec`]s into a validated dependency DAG:
//! reference placeholders and explicit `depends_on` entries become edges,
//! unknown ids and duplicate ids are rejected, and a reference cycle is a
//! definition error reported with its full path.

use crate::error::DefinitionError;
use crate::schema::SchemaRegistry;
use crate::spec::{ResourceId, ResourceSpec};
use std::collections::{BTreeMap, BTreeSet};

/// Validated desired-state dependency graph
///
/// Edges point from dependent to dependency. The edge set is guaranteed
/// acyclic once `build` succeeds.
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    specs: BTreeMap<ResourceId, ResourceSpec>,
    dependencies: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
}

impl ResourceGraph {
    /// Build and validate a graph from declared specs
    ///
    /// Validation order: duplicates, required properties (per the registry's
    /// type schemas), reference resolution, then cycle detection. The first
    /// failure is returned; nothing here touches the provisioning API.
    pub fn build(
        specs: Vec<ResourceSpec>,
        registry: &SchemaRegistry,
    ) -> Result<Self, DefinitionError> {
        let mut by_id: BTreeMap<ResourceId, ResourceSpec> = BTreeMap::new();
        for spec in specs {
            if by_id.contains_key(&spec.id) {
                return Err(DefinitionError::DuplicateId(spec.id));
            }
            by_id.insert(spec.id.clone(), spec);
        }

        for spec in by_id.values() {
            let schema = registry.get(&spec.resource_type);
            for property in &schema.required {
                if !spec.properties.contains_key(property) {
                    return Err(DefinitionError::MissingProperty {
                        id: spec.id.clone(),
                        resource_type: spec.resource_type.clone(),
                        property: property.clone(),
                    });
                }
            }
        }

        let mut dependencies: BTreeMap<ResourceId, BTreeSet<ResourceId>> = BTreeMap::new();
        for spec in by_id.values() {
            let deps = spec.dependency_ids();
            for dep in &deps {
                if !by_id.contains_key(dep) {
                    return Err(DefinitionError::UnknownReference {
                        dependent: spec.id.clone(),
                        missing: dep.clone(),
                    });
                }
            }
            dependencies.insert(spec.id.clone(), deps);
        }

        let graph = Self {
            specs: by_id,
            dependencies,
        };

        if let Some(path) = graph.find_cycle() {
            return Err(DefinitionError::Cycle { path });
        }

        log::debug!(
            "built resource graph: {} resources, {} edges",
            graph.specs.len(),
            graph.dependencies.values().map(BTreeSet::len).sum::<usize>()
        );

        Ok(graph)
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceSpec> {
        self.specs.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.specs.contains_key(id)
    }

    /// Specs in id order
    pub fn specs(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.specs.values()
    }

    /// Direct dependencies of a resource
    pub fn dependencies_of(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        self.dependencies.get(id).cloned().unwrap_or_default()
    }

    /// Direct dependents of a resource (resources whose edges point at `id`)
    pub fn dependents_of(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        self.dependencies
            .iter()
            .filter(|(_, deps)| deps.contains(id))
            .map(|(dependent, _)| dependent.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Depth-first cycle search tracking an in-progress set
    ///
    /// Returns the first cycle found as a closed path (first id repeated at
    /// the end), or None for an acyclic graph.
    fn find_cycle(&self) -> Option<Vec<ResourceId>> {
        let mut marks: BTreeMap<&ResourceId, Mark> = BTreeMap::new();
        let mut path: Vec<&ResourceId> = Vec::new();

        for start in self.specs.keys() {
            if marks.contains_key(start) {
                continue;
            }
            if let Some(cycle) = self.visit(start, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        id: &'a ResourceId,
        marks: &mut BTreeMap<&'a ResourceId, Mark>,
        path: &mut Vec<&'a ResourceId>,
    ) -> Option<Vec<ResourceId>> {
        marks.insert(id, Mark::InProgress);
        path.push(id);

        if let Some(deps) = self.dependencies.get(id) {
            for dep in deps {
                match marks.get(dep) {
                    Some(Mark::Done) => {}
                    Some(Mark::InProgress) => {
                        // Close the loop: slice the path from the first
                        // occurrence of `dep` and repeat it at the end.
                        let from = path.iter().position(|p| *p == dep).unwrap_or(0);
                        let mut cycle: Vec<ResourceId> =
                            path[from..].iter().map(|p| (*p).clone()).collect();
                        cycle.push(dep.clone());
                        return Some(cycle);
                    }
                    None => {
                        if let Some(cycle) = self.visit(dep, marks, path) {
                            return Some(cycle);
                        }
                    }
                }
            }
        }

        path.pop();
        marks.insert(id, Mark::Done);
        None
    }
}

/// Marker state for the DFS cycle search
#[derive(Clone, Copy, PartialEq)]
enum Mark {
    InProgress,
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::PropertyValue;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new()
    }

    #[test]
    fn builds_edges_from_references_and_explicit_deps() {
        let specs = vec![
            ResourceSpec::new("table", "kv_table"),
            ResourceSpec::new("func", "compute_function")
                .with_property("table_name", PropertyValue::reference("table", "name"))
                .with_dependency("role"),
            ResourceSpec::new("role", "iam_role"),
        ];

        let graph = ResourceGraph::build(specs, &registry()).unwrap();
        let deps = graph.dependencies_of(&"func".into());
        assert!(deps.contains(&"table".into()));
        assert!(deps.contains(&"role".into()));
        assert!(graph.dependencies_of(&"table".into()).is_empty());
        assert_eq!(
            graph.dependents_of(&"table".into()),
            BTreeSet::from([ResourceId::from("func")])
        );
    }

    #[test]
    fn rejects_duplicate_ids() {
        let specs = vec![
            ResourceSpec::new("func", "compute_function"),
            ResourceSpec::new("func", "compute_function"),
        ];
        let err = ResourceGraph::build(specs, &registry()).unwrap_err();
        assert_eq!(err, DefinitionError::DuplicateId("func".into()));
    }

    #[test]
    fn rejects_unknown_reference() {
        let specs = vec![ResourceSpec::new("alias", "function_alias")
            .with_property("function", PropertyValue::reference("missing", "arn"))];
        let err = ResourceGraph::build(specs, &registry()).unwrap_err();
        assert_eq!(
            err,
            DefinitionError::UnknownReference {
                dependent: "alias".into(),
                missing: "missing".into(),
            }
        );
    }

    #[test]
    fn rejects_missing_required_property() {
        let registry = SchemaRegistry::new()
            .with("compute_function", crate::schema::TypeSchema::new().require("handler"));
        let specs = vec![ResourceSpec::new("func", "compute_function")];
        let err = ResourceGraph::build(specs, &registry).unwrap_err();
        assert!(matches!(err, DefinitionError::MissingProperty { .. }));
    }

    #[test]
    fn reports_cycle_with_valid_path() {
        let specs = vec![
            ResourceSpec::new("a", "t").with_dependency("b"),
            ResourceSpec::new("b", "t").with_dependency("c"),
            ResourceSpec::new("c", "t").with_dependency("a"),
        ];
        let err = ResourceGraph::build(specs, &registry()).unwrap_err();
        let DefinitionError::Cycle { path } = err else {
            panic!("expected cycle error");
        };

        // The reported path must be a real cycle in the input: closed, and
        // every consecutive pair a declared edge.
        assert_eq!(path.first(), path.last());
        assert!(path.len() >= 3);
        let edges: BTreeSet<(ResourceId, ResourceId)> = [
            ("a".into(), "b".into()),
            ("b".into(), "c".into()),
            ("c".into(), "a".into()),
        ]
        .into();
        for pair in path.windows(2) {
            assert!(edges.contains(&(pair[0].clone(), pair[1].clone())));
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let specs = vec![ResourceSpec::new("a", "t").with_dependency("a")];
        let err = ResourceGraph::build(specs, &registry()).unwrap_err();
        assert!(matches!(err, DefinitionError::Cycle { .. }));
    }
}
