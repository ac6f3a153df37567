//! Error taxonomy
//!
//! Definition errors are fatal and raised before any provisioning call.
//! Per-step apply failures are aggregated into the apply report instead of
//! aborting, so callers always learn the full outcome of a run.

use crate::spec::ResourceId;
use thiserror::Error;

/// A fatal error in the desired-state definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("duplicate resource id `{0}`")]
    DuplicateId(ResourceId),

    #[error("resource `{dependent}` references unknown resource `{missing}`")]
    UnknownReference {
        dependent: ResourceId,
        missing: ResourceId,
    },

    #[error("resource `{id}` ({resource_type}) is missing required property `{property}`")]
    MissingProperty {
        id: ResourceId,
        resource_type: String,
        property: String,
    },

    #[error("dependency cycle: {}", format_cycle(.path))]
    Cycle { path: Vec<ResourceId> },
}

fn format_cycle(path: &[ResourceId]) -> String {
    path.iter()
        .map(ResourceId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Failure of a single plan step, carried in the apply report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} of `{id}` failed: {message}")]
pub struct StepError {
    /// Resource the step was operating on
    pub id: ResourceId,
    /// Attempted operation ("create", "update", "replace", "delete")
    pub operation: &'static str,
    /// Underlying provisioning or state-store failure
    pub message: String,
}
