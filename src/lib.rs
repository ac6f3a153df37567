//! # Terraplane
//!
//! A declarative-configuration reconciliation engine: turn a desired-state
//! description into an ordered sequence of provisioning operations against a
//! remote stateful system.
//!
//! ## Pipeline
//!
//! - **Graph**: declared [`ResourceSpec`]s plus their cross-references become
//!   a validated dependency DAG ([`ResourceGraph`]); cycles and unknown
//!   references are definition errors caught before any provisioning call.
//! - **Diff**: the desired graph is compared against the recorded
//!   [`StateRecord`]s, producing a [`ChangeSet`] of create / update /
//!   replace / delete operations. Pure and deterministic.
//! - **Plan**: changes are ordered into execution batches
//!   ([`ExecutionPlan`]) by layered topological sort; deletions run in
//!   reverse dependency order and replacements split into phases when the
//!   provider cannot create before deleting.
//! - **Apply**: batches run sequentially, steps within a batch concurrently,
//!   each success committing its state record so a failed run resumes
//!   exactly where it stopped.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use terraplane::{
//!     ApplyOptions, MemoryStateStore, PropertyValue, ResourceSpec,
//!     SchemaRegistry, TypeSchema, reconcile_simple,
//! };
//!
//! let registry = SchemaRegistry::new()
//!     .with("compute_function", TypeSchema::new().immutable("runtime"));
//!
//! let specs = vec![
//!     ResourceSpec::new("table", "kv_table"),
//!     ResourceSpec::new("func", "compute_function")
//!         .with_property("runtime", "go1.x")
//!         .with_property("table_name", PropertyValue::reference("table", "name")),
//! ];
//!
//! let mut store = MemoryStateStore::new();
//! let report = reconcile_simple(
//!     specs,
//!     &registry,
//!     Arc::new(my_provisioner),
//!     &mut store,
//!     &ApplyOptions::default(),
//! )?;
//! assert!(report.is_complete());
//! ```
//!
//! ## Collaborators
//!
//! The engine touches exactly two external seams, both trait objects:
//! [`Provisioner`] (the provider API; owns auth and transport) and
//! [`StateStore`] (durable per-resource snapshots; a TOML-file and an
//! in-memory implementation are provided).

pub mod applier;
pub mod diff;
pub mod engine;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod schema;
pub mod spec;
pub mod state;

// Re-export main types at crate root
pub use applier::{ApplyOptions, ApplyReport, ApplySummary, StepOutcome, apply_plan, apply_simple};
pub use diff::{Change, ChangeKind, ChangeSet, ChangeSummary, compute_changes};
pub use engine::{plan, reconcile, reconcile_simple};
pub use error::{DefinitionError, StepError};
pub use graph::ResourceGraph;
pub use planner::{ExecutionPlan, PlanStep, StepAction, plan_changes};
pub use provider::{
    Applied, ApplyRequest, CancelToken, NoProgress, ProgressCallback, Provisioner,
};
pub use schema::{SchemaRegistry, TypeSchema};
pub use spec::{OutputRef, PropertyMap, PropertyValue, ResourceId, ResourceSpec};
pub use state::{FileStateStore, MemoryStateStore, StateRecord, StateStore};
