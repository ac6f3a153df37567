//! Provisioning boundary and execution callbacks
//!
//! These traits keep the engine free of any concrete provider: credentials,
//! request signing, and transport retries all live behind [`Provisioner`].

use crate::applier::StepOutcome;
use crate::spec::{PropertyMap, ResourceId};
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One provisioning call
///
/// `properties` has every reference resolved to a concrete value;
/// `provider_id` is set for in-place updates and absent for creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyRequest {
    pub id: ResourceId,
    pub resource_type: String,
    pub properties: PropertyMap,
    pub provider_id: Option<String>,
}

/// Successful provisioning result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Provider-assigned identifier for the resource
    pub provider_id: String,
    /// Output values other resources may reference
    pub outputs: PropertyMap,
}

/// External provisioning API
///
/// Implementations own authentication and transport concerns. Calls may
/// block; the Applier bounds them with its configured timeout.
pub trait Provisioner: Send + Sync {
    /// Create or update a resource
    fn apply(&self, request: &ApplyRequest) -> Result<Applied>;

    /// Delete a resource by its provider-assigned id
    fn delete(&self, resource_type: &str, provider_id: &str) -> Result<()>;
}

/// Progress callback for apply runs
///
/// Implement this to drive a UI; parallel steps report after each batch
/// completes, in step order.
pub trait ProgressCallback: Send {
    /// Called before a batch starts executing
    fn on_batch_start(&mut self, index: usize, size: usize);

    /// Called once per step after the batch it belongs to finishes
    fn on_step_complete(&mut self, id: &ResourceId, outcome: &StepOutcome);

    /// Called after a batch finishes
    fn on_batch_complete(&mut self, index: usize);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_batch_start(&mut self, _index: usize, _size: usize) {}
    fn on_step_complete(&mut self, _id: &ResourceId, _outcome: &StepOutcome) {}
    fn on_batch_complete(&mut self, _index: usize) {}
}

/// Cooperative cancellation handle
///
/// Cancelling stops new steps from being issued; steps already in flight
/// finish or time out normally, so no provisioning call is ever abandoned
/// with an unknown outcome.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
