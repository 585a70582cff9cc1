//! pgsource-reconciler — converges pipelines towards their spec.
//!
//! # Architecture
//!
//! ```text
//! Controller
//!   ├── StoreEvent watch + periodic resync ──▶ WorkQueue (dedup, backoff)
//!   └── N workers ──▶ ReconcileEngine
//!         ├── SchemaMutator         (function, per-table triggers)
//!         ├── DependencyOrchestrator
//!         │     ├── WorkloadScheduler (receiver)
//!         │     └── BindingManager    (sink binding)
//!         └── FinalizeEngine        (on deletion: triggers, then function)
//! ```
//!
//! Retries are never internal to a run: a failed run returns an error and
//! the controller re-adds the key with per-key exponential backoff.

pub mod cancel;
pub mod collaborators;
pub mod controller;
pub mod engine;
pub mod error;
pub mod finalize;
pub mod orchestrator;
pub mod queue;
pub mod store;

#[cfg(test)]
mod testing;

pub use cancel::Cancellation;
pub use collaborators::{StoreBindingManager, StoreWorkloadScheduler};
pub use controller::Controller;
pub use engine::{ReconcileEngine, ReconcileEvent};
pub use error::{ReconcileError, ReconcileResult};
pub use finalize::FinalizeEngine;
pub use orchestrator::{BindingManager, DependencyOrchestrator, WorkloadScheduler};
pub use queue::WorkQueue;
pub use store::ResourceStore;
