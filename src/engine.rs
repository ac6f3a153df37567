//! Whole-pipeline entry points
//!
//! Chains graph construction, diffing, planning, and applying for callers
//! that don't need to drive the stages individually.

use crate::applier::{self, ApplyOptions, ApplyReport};
use crate::diff::{self, ChangeSet};
use crate::graph::ResourceGraph;
use crate::planner::{self, ExecutionPlan};
use crate::provider::{CancelToken, ProgressCallback, Provisioner};
use crate::schema::SchemaRegistry;
use crate::spec::ResourceSpec;
use crate::state::StateStore;
use anyhow::Result;
use std::sync::Arc;

/// Build, diff, and plan without touching the provisioning API
///
/// Definition errors (unknown references, cycles, missing required
/// properties) surface here, before anything is provisioned.
pub fn plan(
    specs: Vec<ResourceSpec>,
    registry: &SchemaRegistry,
    store: &mut dyn StateStore,
) -> Result<(ChangeSet, ExecutionPlan)> {
    let desired = ResourceGraph::build(specs, registry)?;
    let state = store.load()?;
    let changes = diff::compute_changes(&desired, &state, registry);

    let summary = changes.summary();
    log::info!(
        "plan: {} to create, {} to update, {} to replace, {} to delete",
        summary.creates,
        summary.updates,
        summary.replaces,
        summary.deletes
    );

    let execution = planner::plan_changes(changes.clone(), &desired, registry);
    Ok((changes, execution))
}

/// Full reconciliation: plan and apply in one call
pub fn reconcile<P: ProgressCallback>(
    specs: Vec<ResourceSpec>,
    registry: &SchemaRegistry,
    provisioner: Arc<dyn Provisioner>,
    store: &mut dyn StateStore,
    opts: &ApplyOptions,
    progress: &mut P,
    cancel: &CancelToken,
) -> Result<ApplyReport> {
    let (_, execution) = plan(specs, registry, store)?;
    applier::apply_plan(execution, provisioner, store, opts, progress, cancel)
}

/// Full reconciliation without progress reporting or cancellation
pub fn reconcile_simple(
    specs: Vec<ResourceSpec>,
    registry: &SchemaRegistry,
    provisioner: Arc<dyn Provisioner>,
    store: &mut dyn StateStore,
    opts: &ApplyOptions,
) -> Result<ApplyReport> {
    use crate::provider::NoProgress;

    reconcile(
        specs,
        registry,
        provisioner,
        store,
        opts,
        &mut NoProgress,
        &CancelToken::new(),
    )
}
