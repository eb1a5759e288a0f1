//! # Reconciler
//!
//! Reconciles `AuthProxyWorkload` resources against the workloads they select.
//!
//! ## Module Structure
//!
//! - `types.rs` - Reconciler context, errors and backoff state
//! - `validation.rs` - Spec rules shared with the validating webhook
//! - `plan.rs` - Pure per-workload decisions
//! - `rollout.rs` - Conflict-retrying workload writes
//! - `status.rs` - Status computation and status subresource writes
//! - `reconcile.rs` - Finalizer-driven reconcile entry point

pub mod plan;
mod reconcile;
pub mod rollout;
pub mod status;
mod types;
pub mod validation;

pub use reconcile::reconcile;
pub use types::{BackoffState, BackoffStates, Reconciler, ReconcilerError};
