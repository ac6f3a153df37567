//! Plan execution
//!
//! Batches run strictly sequentially; steps within a batch run concurrently
//! on a bounded thread pool. Every successful step commits its state record
//! before the next batch starts, so a failure or crash mid-run leaves a
//! correct, resumable partial state. Failures never abort the process: the
//! run finishes its in-flight steps, stops scheduling, and reports succeeded,
//! failed, and not-attempted steps.

use crate::error::StepError;
use crate::planner::{ExecutionPlan, PlanStep, StepAction};
use crate::provider::{Applied, ApplyRequest, CancelToken, NoProgress, ProgressCallback, Provisioner};
use crate::spec::{PropertyMap, PropertyValue, ResourceId, ResourceSpec};
use crate::state::{StateRecord, StateStore};
use anyhow::{Context, Result, anyhow, bail};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

/// Options for an apply run
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Concurrency limit within a batch
    pub jobs: usize,
    /// Per-call provisioning timeout; a timed-out call counts as failed and
    /// its eventual result is discarded
    pub timeout: Option<Duration>,
    /// Report the plan without provisioning or committing anything
    pub dry_run: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            timeout: None,
            dry_run: false,
        }
    }
}

/// Result of one plan step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Created,
    Updated,
    Replaced,
    Deleted,
    Skipped { reason: String },
    Failed { error: String },
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Created | Self::Updated | Self::Replaced | Self::Deleted
        )
    }
}

/// Counts by outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ApplySummary {
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    fn add(&mut self, outcome: &StepOutcome) {
        match outcome {
            StepOutcome::Created => self.created += 1,
            StepOutcome::Updated => self.updated += 1,
            StepOutcome::Replaced => self.replaced += 1,
            StepOutcome::Deleted => self.deleted += 1,
            StepOutcome::Skipped { .. } => self.skipped += 1,
            StepOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Full outcome of an apply run
///
/// The state store reflects exactly the steps in `succeeded`; re-running the
/// pipeline with the same desired state retries only `failed` and
/// `not_attempted`.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub succeeded: Vec<ResourceId>,
    pub failed: Vec<StepError>,
    pub not_attempted: Vec<ResourceId>,
    pub summary: ApplySummary,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// True when every step ran (nothing skipped by failure or cancellation)
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.not_attempted.is_empty()
    }
}

/// Snapshot plus store, locked together so a commit and its snapshot update
/// are one critical section
struct SharedState<'a> {
    store: &'a mut dyn StateStore,
    snapshot: BTreeMap<ResourceId, StateRecord>,
}

impl SharedState<'_> {
    fn commit(&mut self, record: StateRecord) -> Result<()> {
        self.store.commit(&record).context("state commit failed")?;
        self.snapshot.insert(record.id.clone(), record);
        Ok(())
    }

    fn remove(&mut self, id: &ResourceId) -> Result<()> {
        self.store.remove(id).context("state remove failed")?;
        self.snapshot.remove(id);
        Ok(())
    }
}

/// Execute a plan
pub fn apply_plan<P: ProgressCallback>(
    plan: ExecutionPlan,
    provisioner: Arc<dyn Provisioner>,
    store: &mut dyn StateStore,
    opts: &ApplyOptions,
    progress: &mut P,
    cancel: &CancelToken,
) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();

    if opts.dry_run {
        for step in plan.steps() {
            log::info!("dry run: would {} `{}`", step.action.verb(), step.id);
            report.not_attempted.push(step.id.clone());
            report.summary.skipped += 1;
        }
        return Ok(report);
    }

    let snapshot: BTreeMap<ResourceId, StateRecord> = store
        .load()
        .context("failed to load state")?
        .into_iter()
        .map(|r| (r.id.clone(), r))
        .collect();
    let shared = Mutex::new(SharedState { store, snapshot });

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.jobs.max(1))
        .build()
        .map_err(|e| anyhow!("failed to create apply thread pool: {e}"))?;

    let mut halted = false;

    for (index, batch) in plan.batches.into_iter().enumerate() {
        if halted || cancel.is_cancelled() {
            for step in batch {
                report.not_attempted.push(step.id);
            }
            continue;
        }

        progress.on_batch_start(index, batch.len());
        log::info!("applying batch {} ({} steps)", index + 1, batch.len());

        let batch_failed = AtomicBool::new(false);
        let outcomes: Vec<(PlanStep, StepOutcome)> = pool.install(|| {
            batch
                .into_par_iter()
                .map(|step| {
                    // Cancellation and failures stop steps that have not
                    // started; steps already in flight run to completion or
                    // timeout.
                    if cancel.is_cancelled() {
                        return (
                            step,
                            StepOutcome::Skipped {
                                reason: "cancelled".into(),
                            },
                        );
                    }
                    if batch_failed.load(Ordering::SeqCst) {
                        return (
                            step,
                            StepOutcome::Skipped {
                                reason: "an earlier step failed".into(),
                            },
                        );
                    }
                    let outcome = execute_step(&step, &provisioner, &shared, opts.timeout);
                    if !outcome.is_success() {
                        batch_failed.store(true, Ordering::SeqCst);
                    }
                    (step, outcome)
                })
                .collect()
        });

        for (step, outcome) in outcomes {
            report.summary.add(&outcome);
            progress.on_step_complete(&step.id, &outcome);
            match outcome {
                StepOutcome::Failed { error } => {
                    log::warn!("{} of `{}` failed: {error}", step.action.verb(), step.id);
                    report.failed.push(StepError {
                        id: step.id,
                        operation: step.action.verb(),
                        message: error,
                    });
                    halted = true;
                }
                StepOutcome::Skipped { .. } => {
                    report.not_attempted.push(step.id);
                }
                _ => report.succeeded.push(step.id),
            }
        }

        progress.on_batch_complete(index);
    }

    log::info!(
        "apply finished: {} changed, {} failed, {} not attempted",
        report.summary.total_changes(),
        report.failed.len(),
        report.not_attempted.len()
    );

    Ok(report)
}

/// Execute a plan without progress reporting or cancellation
pub fn apply_simple(
    plan: ExecutionPlan,
    provisioner: Arc<dyn Provisioner>,
    store: &mut dyn StateStore,
    opts: &ApplyOptions,
) -> Result<ApplyReport> {
    apply_plan(
        plan,
        provisioner,
        store,
        opts,
        &mut NoProgress,
        &CancelToken::new(),
    )
}

/// Run one step, translating any error into a Failed outcome
fn execute_step(
    step: &PlanStep,
    provisioner: &Arc<dyn Provisioner>,
    shared: &Mutex<SharedState<'_>>,
    timeout: Option<Duration>,
) -> StepOutcome {
    let result = match &step.action {
        StepAction::Create { spec } | StepAction::CreateForReplace { spec } => {
            provision(spec, None, provisioner, shared, timeout).map(|()| StepOutcome::Created)
        }
        StepAction::Update { spec, record } => {
            provision(spec, Some(record.provider_id.clone()), provisioner, shared, timeout)
                .map(|()| StepOutcome::Updated)
        }
        StepAction::Replace { spec, record } => {
            // Create-before-delete: the new record is committed as soon as
            // the new resource exists, so a failed cleanup still leaves the
            // state pointing at the live resource.
            provision(spec, None, provisioner, shared, timeout).and_then(|()| {
                let prov = Arc::clone(provisioner);
                let resource_type = record.resource_type.clone();
                let provider_id = record.provider_id.clone();
                call_with_timeout(timeout, move || prov.delete(&resource_type, &provider_id))
                    .map(|()| StepOutcome::Replaced)
            })
        }
        StepAction::Delete { record } | StepAction::DeleteForReplace { record } => {
            let prov = Arc::clone(provisioner);
            let resource_type = record.resource_type.clone();
            let provider_id = record.provider_id.clone();
            call_with_timeout(timeout, move || prov.delete(&resource_type, &provider_id))
                .and_then(|()| {
                    lock_shared(shared).remove(&step.id)?;
                    Ok(StepOutcome::Deleted)
                })
        }
    };

    result.unwrap_or_else(|e| StepOutcome::Failed {
        error: format!("{e:#}"),
    })
}

/// Provision a spec (create or in-place update) and commit its record
fn provision(
    spec: &ResourceSpec,
    provider_id: Option<String>,
    provisioner: &Arc<dyn Provisioner>,
    shared: &Mutex<SharedState<'_>>,
    timeout: Option<Duration>,
) -> Result<()> {
    let properties = {
        let guard = lock_shared(shared);
        resolve_properties(&spec.properties, &guard.snapshot)?
    };

    let request = ApplyRequest {
        id: spec.id.clone(),
        resource_type: spec.resource_type.clone(),
        properties,
        provider_id,
    };

    let prov = Arc::clone(provisioner);
    let applied: Applied = call_with_timeout(timeout, move || prov.apply(&request))?;

    lock_shared(shared).commit(StateRecord::from_applied(spec, applied))
}

/// Replace every reference with the committed output value it points at
///
/// Dependencies always land in earlier batches, so their outputs are in the
/// snapshot by the time a dependent resolves.
fn resolve_properties(
    properties: &PropertyMap,
    snapshot: &BTreeMap<ResourceId, StateRecord>,
) -> Result<PropertyMap> {
    properties
        .iter()
        .map(|(name, value)| Ok((name.clone(), resolve_value(value, snapshot)?)))
        .collect()
}

fn resolve_value(
    value: &PropertyValue,
    snapshot: &BTreeMap<ResourceId, StateRecord>,
) -> Result<PropertyValue> {
    match value {
        PropertyValue::Ref(r) => {
            let record = snapshot
                .get(&r.resource)
                .ok_or_else(|| anyhow!("no state record for referenced resource `{}`", r.resource))?;
            record.outputs.get(&r.output).cloned().ok_or_else(|| {
                anyhow!("resource `{}` has no output `{}`", r.resource, r.output)
            })
        }
        PropertyValue::List(items) => Ok(PropertyValue::List(
            items
                .iter()
                .map(|item| resolve_value(item, snapshot))
                .collect::<Result<_>>()?,
        )),
        scalar => Ok(scalar.clone()),
    }
}

/// Run a provisioning call, bounding it with `timeout` when set
///
/// The call runs on its own thread; on timeout the thread is left to finish
/// and its result is discarded, so the provider is never interrupted
/// mid-call.
fn call_with_timeout<T, F>(timeout: Option<Duration>, call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let Some(limit) = timeout else {
        return call();
    };

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(call());
    });

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            bail!("provisioning call exceeded timeout of {limit:?}")
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            bail!("provisioning call panicked")
        }
    }
}

/// Lock the shared state, recovering the data from a poisoned lock
fn lock_shared<'a, 'b>(shared: &'a Mutex<SharedState<'b>>) -> std::sync::MutexGuard<'a, SharedState<'b>> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
