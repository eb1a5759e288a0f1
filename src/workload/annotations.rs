//! # Generation Tracking
//!
//! Every workload carries, per selecting `AuthProxyWorkload`, a pair of pod
//! template annotations:
//!
//! - `<domain>/<name>-request`: the resource generation a mutation is owed for
//! - `<domain>/<name>-applied`: the resource generation actually materialized
//!
//! The controller raises `request` as soon as it sees a new generation. Whoever
//! performs the mutation (the controller for rollout-capable kinds, the webhook
//! for new objects) raises `applied`. The two paths are not synchronized with
//! each other; both converge because the mutation is idempotent.

use super::kinds::Workload;
use super::names::{applied_annotation, request_annotation};
use crate::constants::{API_GROUP, MANAGED_ENV_ANNOTATION};
use crate::crd::AuthProxyWorkload;
use std::collections::{BTreeMap, BTreeSet};

/// Snapshot of the annotation state for one (resource, workload) pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationStatus {
    pub instance_generation: i64,
    pub last_requested: Option<i64>,
    pub last_applied: Option<i64>,
    pub new_requested: Option<i64>,
    pub new_applied: Option<i64>,
}

impl GenerationStatus {
    /// Applied and requested both equal the current resource generation
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.new_requested == Some(self.instance_generation)
            && self.new_applied == Some(self.instance_generation)
    }
}

fn read_generation(annotations: &BTreeMap<String, String>, key: &str) -> Option<i64> {
    annotations.get(key).and_then(|v| v.parse().ok())
}

/// Current state without modifying the workload
#[must_use]
pub fn generation_status(resource: &AuthProxyWorkload, workload: &Workload) -> GenerationStatus {
    let annotations = workload.template_annotations();
    let requested = read_generation(&annotations, &request_annotation(resource.name()));
    let applied = read_generation(&annotations, &applied_annotation(resource.name()));
    GenerationStatus {
        instance_generation: resource.generation(),
        last_requested: requested,
        last_applied: applied,
        new_requested: requested,
        new_applied: applied,
    }
}

fn mark(
    resource: &AuthProxyWorkload,
    workload: &mut Workload,
    applied: bool,
) -> (bool, GenerationStatus) {
    let mut annotations = workload.template_annotations();
    let generation = resource.generation();
    let mut status = generation_status(resource, workload);
    let value = generation.to_string();

    let mut changed = false;
    let mut set = |key: String| {
        if annotations.get(&key) != Some(&value) {
            annotations.insert(key, value.clone());
            changed = true;
        }
    };
    set(request_annotation(resource.name()));
    status.new_requested = Some(generation);
    if applied {
        set(applied_annotation(resource.name()));
        status.new_applied = Some(generation);
    }

    if changed {
        workload.set_template_annotations(annotations);
    }
    (changed, status)
}

/// Record that `workload` owes a mutation for the resource's current generation
pub fn mark_needs_update(
    resource: &AuthProxyWorkload,
    workload: &mut Workload,
) -> (bool, GenerationStatus) {
    mark(resource, workload, false)
}

/// Record that the resource's current generation has been applied to `workload`
pub fn mark_updated(
    resource: &AuthProxyWorkload,
    workload: &mut Workload,
) -> (bool, GenerationStatus) {
    mark(resource, workload, true)
}

/// Whether the workload carries tracking annotations for `resource_name`
#[must_use]
pub fn is_tracked(resource_name: &str, workload: &Workload) -> bool {
    let annotations = workload.template_annotations();
    annotations.contains_key(&request_annotation(resource_name))
        || annotations.contains_key(&applied_annotation(resource_name))
}

/// Drop tracking annotations of every resource not in `live`.
///
/// Returns whether anything was removed.
pub fn prune_stale(workload: &mut Workload, live: &[&AuthProxyWorkload]) -> bool {
    let keep: BTreeSet<String> = live
        .iter()
        .flat_map(|r| [request_annotation(r.name()), applied_annotation(r.name())])
        .chain(std::iter::once(MANAGED_ENV_ANNOTATION.to_string()))
        .collect();
    let domain = format!("{API_GROUP}/");
    let mut annotations = workload.template_annotations();
    let before = annotations.len();
    annotations.retain(|k, _| !k.starts_with(&domain) || keep.contains(k));
    if annotations.len() == before {
        return false;
    }
    workload.set_template_annotations(annotations);
    true
}
