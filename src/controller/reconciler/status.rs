//! # Status Management
//!
//! Builds `AuthProxyWorkloadStatus` from the per-workload tracking state and
//! writes it through the status subresource.

use crate::constants::FIELD_MANAGER;
use crate::crd::{
    AuthProxyWorkload, AuthProxyWorkloadStatus, Condition, WorkloadStatus, CONDITION_UP_TO_DATE,
    REASON_FINISHED_RECONCILE, REASON_INVALID_SPEC, REASON_NO_WORKLOADS_FOUND, REASON_UP_TO_DATE,
    REASON_WORKLOAD_NEEDS_UPDATE,
};
use crate::workload::{GenerationStatus, Workload};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use serde_json::json;
use tracing::debug;

/// One selected workload together with its tracking state
#[derive(Debug, Clone)]
pub struct ObservedWorkload {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub generation: GenerationStatus,
}

impl ObservedWorkload {
    #[must_use]
    pub fn new(workload: &Workload, generation: GenerationStatus) -> Self {
        Self {
            kind: workload.kind().to_string(),
            namespace: workload.namespace().to_string(),
            name: workload.name().to_string(),
            generation,
        }
    }
}

fn workload_condition(observed: &ObservedWorkload, generation: i64) -> Condition {
    let g = &observed.generation;
    if g.is_up_to_date() {
        Condition::new(
            CONDITION_UP_TO_DATE,
            true,
            REASON_UP_TO_DATE,
            format!(
                "Workload runs the proxy configuration of generation {}",
                g.instance_generation
            ),
            generation,
        )
    } else {
        let applied = g.new_applied.map_or_else(|| "none".to_string(), |a| a.to_string());
        Condition::new(
            CONDITION_UP_TO_DATE,
            false,
            REASON_WORKLOAD_NEEDS_UPDATE,
            format!(
                "Workload needs generation {} of the proxy configuration, \
                 applied generation is {applied}",
                g.instance_generation
            ),
            generation,
        )
    }
}

/// Compute the full status from the workloads currently selected.
///
/// Transition times of conditions whose status did not flip are carried over
/// from the stored status, so recomputing an unchanged state yields an equal
/// value and no write.
#[must_use]
pub fn compute_status(
    resource: &AuthProxyWorkload,
    observed: &[ObservedWorkload],
    now: &str,
) -> AuthProxyWorkloadStatus {
    let generation = resource.generation();
    let previous = resource.status.clone().unwrap_or_default();

    let mut workload_status: Vec<WorkloadStatus> = observed
        .iter()
        .map(|o| {
            let mut condition = workload_condition(o, generation);
            let previous_conditions = previous
                .workload_status
                .iter()
                .find(|w| w.kind == o.kind && w.namespace == o.namespace && w.name == o.name)
                .map(|w| w.conditions.as_slice())
                .unwrap_or_default();
            condition.carry_transition_time(previous_conditions, now);
            WorkloadStatus {
                kind: o.kind.clone(),
                namespace: o.namespace.clone(),
                name: o.name.clone(),
                conditions: vec![condition],
            }
        })
        .collect();
    workload_status.sort_by(|a, b| (&a.kind, &a.name).cmp(&(&b.kind, &b.name)));

    let pending = observed.iter().filter(|o| !o.generation.is_up_to_date()).count();
    let mut condition = if observed.is_empty() {
        Condition::new(
            CONDITION_UP_TO_DATE,
            true,
            REASON_NO_WORKLOADS_FOUND,
            "No workload matches the selector",
            generation,
        )
    } else if pending == 0 {
        Condition::new(
            CONDITION_UP_TO_DATE,
            true,
            REASON_FINISHED_RECONCILE,
            format!("All {} selected workloads are up to date", observed.len()),
            generation,
        )
    } else {
        Condition::new(
            CONDITION_UP_TO_DATE,
            false,
            REASON_WORKLOAD_NEEDS_UPDATE,
            format!("{pending} of {} selected workloads need an update", observed.len()),
            generation,
        )
    };
    condition.carry_transition_time(&previous.conditions, now);

    AuthProxyWorkloadStatus {
        conditions: vec![condition],
        workload_status,
        observed_generation: Some(generation),
    }
}

/// Status of a resource that failed validation. Per-workload entries are kept as they were.
#[must_use]
pub fn invalid_status(
    resource: &AuthProxyWorkload,
    message: &str,
    now: &str,
) -> AuthProxyWorkloadStatus {
    let generation = resource.generation();
    let previous = resource.status.clone().unwrap_or_default();
    let mut condition = Condition::new(
        CONDITION_UP_TO_DATE,
        false,
        REASON_INVALID_SPEC,
        message,
        generation,
    );
    condition.carry_transition_time(&previous.conditions, now);
    AuthProxyWorkloadStatus {
        conditions: vec![condition],
        workload_status: previous.workload_status,
        observed_generation: Some(generation),
    }
}

/// Write `status` unless it equals the stored one. Returns whether a patch was sent.
pub async fn patch_status(
    client: &Client,
    resource: &AuthProxyWorkload,
    status: &AuthProxyWorkloadStatus,
) -> Result<bool, kube::Error> {
    if resource.status.as_ref() == Some(status) {
        debug!(
            resource.name = resource.name(),
            resource.namespace = resource.namespace(),
            "Skipping status update - status unchanged"
        );
        return Ok(false);
    }

    let api: Api<AuthProxyWorkload> = Api::namespaced(client.clone(), resource.namespace());
    let params = PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..PatchParams::default()
    };
    api.patch_status(resource.name(), &params, &Patch::Merge(json!({ "status": status })))
        .await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::AuthProxyWorkloadSpec;

    const T0: &str = "2026-01-01T00:00:00Z";
    const T1: &str = "2026-01-01T00:05:00Z";

    fn resource(generation: i64) -> AuthProxyWorkload {
        let mut r = AuthProxyWorkload::new("db", AuthProxyWorkloadSpec::default());
        r.metadata.namespace = Some("default".to_string());
        r.metadata.generation = Some(generation);
        r
    }

    fn observed(name: &str, generation: i64, applied: Option<i64>) -> ObservedWorkload {
        ObservedWorkload {
            kind: "Deployment".to_string(),
            namespace: "default".to_string(),
            name: name.to_string(),
            generation: GenerationStatus {
                instance_generation: generation,
                new_requested: Some(generation),
                new_applied: applied,
                ..Default::default()
            },
        }
    }

    fn top(status: &AuthProxyWorkloadStatus) -> (&str, Option<&str>) {
        let c = status.up_to_date().unwrap_or_else(|| panic!("missing UpToDate"));
        (c.status.as_str(), c.reason.as_deref())
    }

    #[test]
    fn test_no_workloads() {
        let status = compute_status(&resource(1), &[], T0);
        assert_eq!(top(&status), ("True", Some(REASON_NO_WORKLOADS_FOUND)));
        assert!(status.workload_status.is_empty());
        assert_eq!(status.observed_generation, Some(1));
    }

    #[test]
    fn test_pending_and_finished() {
        let workloads = [observed("b", 2, Some(2)), observed("a", 2, Some(1))];
        let status = compute_status(&resource(2), &workloads, T0);
        assert_eq!(top(&status), ("False", Some(REASON_WORKLOAD_NEEDS_UPDATE)));
        let names: Vec<&str> = status.workload_status.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(!status.workload_status[0].conditions[0].is_true());
        assert!(status.workload_status[1].conditions[0].is_true());

        let status = compute_status(&resource(2), &[observed("a", 2, Some(2))], T0);
        assert_eq!(top(&status), ("True", Some(REASON_FINISHED_RECONCILE)));
    }

    #[test]
    fn test_recompute_is_stable() {
        let mut r = resource(1);
        let first = compute_status(&r, &[observed("a", 1, Some(1))], T0);
        r.status = Some(first.clone());
        let second = compute_status(&r, &[observed("a", 1, Some(1))], T1);
        assert_eq!(first, second);

        let flipped = compute_status(&r, &[observed("a", 1, None)], T1);
        assert_eq!(flipped.conditions[0].last_transition_time.as_deref(), Some(T1));
    }

    #[test]
    fn test_invalid_status_keeps_workloads() {
        let mut r = resource(3);
        r.status = Some(compute_status(&r, &[observed("a", 3, Some(3))], T0));
        let status = invalid_status(&r, "spec.instances: at least one instance is required", T1);
        assert_eq!(top(&status), ("False", Some(REASON_INVALID_SPEC)));
        assert_eq!(status.workload_status.len(), 1);
    }
}
