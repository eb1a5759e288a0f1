//! # Types
//!
//! Core types for the reconciler.

use crate::config::SharedControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::crd::AuthProxyWorkload;
use crate::workload::{MutationError, WorkloadKind};
use kube::Client;
use kube_runtime::reflector::Store;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Reconciliation failed: {0}")]
    ReconciliationFailed(#[from] anyhow::Error),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Failed to compute proxy configuration: {0}")]
    Mutation(#[from] MutationError),

    #[error("{kind} {namespace}/{name} kept conflicting after {attempts} update attempts")]
    ConflictRetriesExhausted {
        kind: WorkloadKind,
        namespace: String,
        name: String,
        attempts: u32,
    },

    #[error("Finalizer error: {0}")]
    Finalizer(#[source] Box<kube_runtime::finalizer::Error<ReconcilerError>>),
}

/// Backoff state for a specific resource
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(1, 10),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new()
    }
}

/// Backoff states keyed by `namespace/name`, shared between reconcile and the error policy
#[derive(Debug, Clone, Default)]
pub struct BackoffStates(Arc<Mutex<HashMap<String, BackoffState>>>);

impl BackoffStates {
    /// Count an error for `key` and return the next delay in seconds with the error count.
    ///
    /// `None` when the map is poisoned.
    pub fn record_error(&self, key: &str) -> Option<(u64, u32)> {
        let mut states = self.0.lock().ok()?;
        let state = states.entry(key.to_string()).or_default();
        state.increment_error();
        Some((state.backoff.next_backoff_seconds(), state.error_count))
    }

    pub fn reset(&self, key: &str) {
        if let Ok(mut states) = self.0.lock() {
            if let Some(state) = states.get_mut(key) {
                state.reset();
            }
        }
    }

    pub fn forget(&self, key: &str) {
        if let Ok(mut states) = self.0.lock() {
            states.remove(key);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().map(|s| s.len()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared reconcile context
#[derive(Clone)]
pub struct Reconciler {
    pub client: Client,
    /// Watch-fed cache of every `AuthProxyWorkload`, shared with the webhook
    pub resources: Store<AuthProxyWorkload>,
    pub config: SharedControllerConfig,
    pub backoff_states: BackoffStates,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("cached_resources", &self.resources.state().len())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(
        client: Client,
        resources: Store<AuthProxyWorkload>,
        config: SharedControllerConfig,
    ) -> Self {
        Self {
            client,
            resources,
            config,
            backoff_states: BackoffStates::default(),
        }
    }

    /// Cached resources in `namespace`, with `current` standing in for its cached copy
    #[must_use]
    pub fn resources_with(&self, current: &AuthProxyWorkload) -> Vec<AuthProxyWorkload> {
        let cached: Vec<AuthProxyWorkload> = self
            .resources
            .state()
            .iter()
            .map(|r| (**r).clone())
            .collect();
        super::plan::resources_with(current, &cached)
    }

    /// Cached resources in `namespace` other than `excluded`
    #[must_use]
    pub fn resources_without(&self, namespace: &str, excluded: &str) -> Vec<AuthProxyWorkload> {
        self.resources
            .state()
            .iter()
            .filter(|r| r.namespace() == namespace && r.name() != excluded)
            .map(|r| (**r).clone())
            .collect()
    }

    /// Forget the error history of a resource after a successful reconcile
    pub fn reset_backoff(&self, key: &str) {
        self.backoff_states.reset(key);
    }

    /// Drop the backoff entry of a resource whose finalizer has been released
    pub fn forget_backoff(&self, key: &str) {
        self.backoff_states.forget(key);
    }
}
