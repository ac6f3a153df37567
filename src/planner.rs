//! Execution planning
//!
//! Orders a change set into batches via layered topological sort (Kahn's
//! algorithm): each batch is the set of unscheduled steps whose prerequisites
//! are all scheduled, so steps within a batch are safe to run concurrently.
//!
//! Ordering rules:
//! - a create-like step runs after the create-like steps of its dependencies
//! - a delete runs only after everything recorded as depending on the
//!   resource has been deleted, replaced, or updated away from it
//! - a Replace on a type without create-before-delete support splits into a
//!   delete phase and a create phase in separate batches
//!
//! The planner has no failure path of its own: cycles are rejected upstream
//! by graph construction.

use crate::diff::{Change, ChangeSet};
use crate::graph::ResourceGraph;
use crate::schema::SchemaRegistry;
use crate::spec::{ResourceId, ResourceSpec};
use crate::state::StateRecord;
use std::collections::{BTreeMap, BTreeSet};

/// A single schedulable operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    Create {
        spec: ResourceSpec,
    },
    Update {
        spec: ResourceSpec,
        record: StateRecord,
    },
    /// Atomic replace: provision the new resource, then delete the old one
    Replace {
        spec: ResourceSpec,
        record: StateRecord,
    },
    /// First phase of a split replace
    DeleteForReplace {
        record: StateRecord,
    },
    /// Second phase of a split replace
    CreateForReplace {
        spec: ResourceSpec,
    },
    Delete {
        record: StateRecord,
    },
}

impl StepAction {
    /// Verb used in logs and step errors
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Create { .. } | Self::CreateForReplace { .. } => "create",
            Self::Update { .. } => "update",
            Self::Replace { .. } => "replace",
            Self::DeleteForReplace { .. } | Self::Delete { .. } => "delete",
        }
    }

    fn is_create_like(&self) -> bool {
        matches!(
            self,
            Self::Create { .. }
                | Self::Update { .. }
                | Self::Replace { .. }
                | Self::CreateForReplace { .. }
        )
    }
}

/// One entry of an execution batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub id: ResourceId,
    pub action: StepAction,
}

/// Ordered sequence of execution batches
///
/// Batches run strictly in order; the steps of one batch have no ordering
/// constraints among themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub batches: Vec<Vec<PlanStep>>,
}

impl ExecutionPlan {
    pub fn total_steps(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Steps flattened in batch order
    pub fn steps(&self) -> impl Iterator<Item = &PlanStep> {
        self.batches.iter().flatten()
    }
}

/// Key distinguishing the converge and destroy phases of one resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum StepKey {
    Converge(ResourceId),
    Destroy(ResourceId),
}

/// Order a change set into execution batches
pub fn plan_changes(
    changes: ChangeSet,
    desired: &ResourceGraph,
    registry: &SchemaRegistry,
) -> ExecutionPlan {
    let mut steps: BTreeMap<StepKey, PlanStep> = BTreeMap::new();

    // Records of every changed resource, used to find recorded dependents
    // when ordering deletions.
    let mut records: Vec<StateRecord> = Vec::new();

    for change in changes.into_changes() {
        match change {
            Change::Create { spec } => {
                steps.insert(
                    StepKey::Converge(spec.id.clone()),
                    PlanStep {
                        id: spec.id.clone(),
                        action: StepAction::Create { spec },
                    },
                );
            }
            Change::Update { spec, record } => {
                records.push(record.clone());
                steps.insert(
                    StepKey::Converge(spec.id.clone()),
                    PlanStep {
                        id: spec.id.clone(),
                        action: StepAction::Update { spec, record },
                    },
                );
            }
            Change::Replace { spec, record } => {
                records.push(record.clone());
                if registry.get(&spec.resource_type).create_before_delete {
                    steps.insert(
                        StepKey::Converge(spec.id.clone()),
                        PlanStep {
                            id: spec.id.clone(),
                            action: StepAction::Replace { spec, record },
                        },
                    );
                } else {
                    steps.insert(
                        StepKey::Destroy(spec.id.clone()),
                        PlanStep {
                            id: spec.id.clone(),
                            action: StepAction::DeleteForReplace { record },
                        },
                    );
                    steps.insert(
                        StepKey::Converge(spec.id.clone()),
                        PlanStep {
                            id: spec.id.clone(),
                            action: StepAction::CreateForReplace { spec },
                        },
                    );
                }
            }
            Change::Delete { record } => {
                records.push(record.clone());
                steps.insert(
                    StepKey::Destroy(record.id.clone()),
                    PlanStep {
                        id: record.id.clone(),
                        action: StepAction::Delete { record },
                    },
                );
            }
        }
    }

    let prereqs = build_prereqs(&steps, &records, desired);
    layer(steps, &prereqs)
}

/// Prerequisite step keys per step
fn build_prereqs(
    steps: &BTreeMap<StepKey, PlanStep>,
    records: &[StateRecord],
    desired: &ResourceGraph,
) -> BTreeMap<StepKey, BTreeSet<StepKey>> {
    let mut prereqs: BTreeMap<StepKey, BTreeSet<StepKey>> = BTreeMap::new();

    for (key, step) in steps {
        let mut wants: BTreeSet<StepKey> = BTreeSet::new();

        if step.action.is_create_like() {
            // Wait for every dependency that is itself being converged.
            for dep in desired.dependencies_of(&step.id) {
                let dep_key = StepKey::Converge(dep);
                if steps.contains_key(&dep_key) {
                    wants.insert(dep_key);
                }
            }
            // The create phase of a split replace waits for its own delete
            // phase.
            if matches!(step.action, StepAction::CreateForReplace { .. }) {
                wants.insert(StepKey::Destroy(step.id.clone()));
            }
        } else {
            // Pure deletes wait for every recorded dependent to be deleted,
            // replaced, or updated off this resource first. The delete phase
            // of a split replace only waits for dependent destroys: its
            // dependents may still reference the resource in the desired
            // state, and their converge steps already wait for the create
            // phase.
            let split_phase = matches!(step.action, StepAction::DeleteForReplace { .. });
            for dependent in records.iter().filter(|r| r.dependencies.contains(&step.id)) {
                let destroy = StepKey::Destroy(dependent.id.clone());
                if steps.contains_key(&destroy) {
                    wants.insert(destroy);
                } else if !split_phase {
                    let converge = StepKey::Converge(dependent.id.clone());
                    if steps.contains_key(&converge) {
                        wants.insert(converge);
                    }
                }
            }
        }

        prereqs.insert(key.clone(), wants);
    }

    prereqs
}

/// Layered Kahn's algorithm over the step graph
fn layer(
    mut remaining: BTreeMap<StepKey, PlanStep>,
    prereqs: &BTreeMap<StepKey, BTreeSet<StepKey>>,
) -> ExecutionPlan {
    let mut batches: Vec<Vec<PlanStep>> = Vec::new();

    while !remaining.is_empty() {
        let ready: Vec<StepKey> = remaining
            .keys()
            .filter(|key| {
                prereqs
                    .get(*key)
                    .is_none_or(|wants| wants.iter().all(|w| !remaining.contains_key(w)))
            })
            .cloned()
            .collect();

        // The change set derives from an acyclic graph, so progress is
        // guaranteed; the guard keeps a planner bug from looping forever.
        debug_assert!(!ready.is_empty(), "step graph made no progress");
        if ready.is_empty() {
            break;
        }

        let mut batch: Vec<PlanStep> = Vec::with_capacity(ready.len());
        for key in ready {
            if let Some(step) = remaining.remove(&key) {
                batch.push(step);
            }
        }
        batch.sort_by(|a, b| a.id.cmp(&b.id));
        batches.push(batch);
    }

    log::debug!(
        "planned {} steps across {} batches",
        batches.iter().map(Vec::len).sum::<usize>(),
        batches.len()
    );

    ExecutionPlan { batches }
}
