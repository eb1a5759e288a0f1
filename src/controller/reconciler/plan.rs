//! # Planning
//!
//! Pure decisions of a reconcile pass. Given the current workload and the set
//! of live resources, compute what the workload should look like and whether
//! it has to be written. The async layer only fetches inputs and performs the
//! writes these functions ask for, so a 409 retry simply plans again against
//! the re-fetched object.

use crate::crd::AuthProxyWorkload;
use crate::workload::annotations::is_tracked;
use crate::workload::{
    generation_status, mark_needs_update, reconcile_workload, resource_matches, GenerationStatus,
    MutationError, ProxyDefaults, Workload,
};

/// Outcome of planning one matched workload
#[derive(Debug, Clone)]
pub struct WorkloadPlan {
    /// Desired state of the workload
    pub workload: Workload,
    /// Whether `workload` differs from the stored object and must be replaced
    pub write: bool,
    /// Tracking state of the reconciled resource on the desired workload
    pub generation: GenerationStatus,
}

/// Relationship between a workload and the resource being reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// The resource selects the workload
    Matched,
    /// The workload still carries artifacts of a resource that no longer selects it
    Stale,
    Unrelated,
}

/// Classify a workload. Owned workloads are managed through their owner and always unrelated.
#[must_use]
pub fn relation(resource: &AuthProxyWorkload, workload: &Workload) -> Relation {
    if workload.has_owner() {
        Relation::Unrelated
    } else if resource_matches(resource, workload) {
        Relation::Matched
    } else if is_tracked(resource.name(), workload) {
        Relation::Stale
    } else {
        Relation::Unrelated
    }
}

/// The resources of `current`'s namespace, with `current` replacing any cached copy of itself
#[must_use]
pub fn resources_with(
    current: &AuthProxyWorkload,
    cached: &[AuthProxyWorkload],
) -> Vec<AuthProxyWorkload> {
    cached
        .iter()
        .filter(|r| r.namespace() == current.namespace() && r.name() != current.name())
        .cloned()
        .chain(std::iter::once(current.clone()))
        .collect()
}

/// Plan a workload selected by `resource`.
///
/// The request annotation is always raised. Template kinds under the
/// `Workload` rollout strategy also get the full mutation, which changes the
/// pod template and so starts a rollout. Pods and Jobs are never rewritten;
/// their status reflects whatever the webhook applied at creation.
pub fn plan_matched(
    resource: &AuthProxyWorkload,
    resources: &[AuthProxyWorkload],
    workload: &Workload,
    defaults: &ProxyDefaults,
) -> Result<WorkloadPlan, MutationError> {
    let mut desired = workload.clone();
    let (requested, _) = mark_needs_update(resource, &mut desired);

    let write = if desired.kind().supports_template_update() && resource.rollout_enabled() {
        let (outcome, _) = reconcile_workload(&mut desired, resources, defaults)?;
        requested || outcome.changed
    } else {
        false
    };

    let generation = generation_status(resource, &desired);
    Ok(WorkloadPlan {
        workload: desired,
        write,
        generation,
    })
}

/// Plan the removal of artifacts left by resources absent from `resources`.
///
/// Returns the desired workload when it has to be written. Pods and Jobs
/// cannot be changed and always yield `None`.
pub fn plan_prune(
    resources: &[AuthProxyWorkload],
    workload: &Workload,
    defaults: &ProxyDefaults,
) -> Result<Option<Workload>, MutationError> {
    if !workload.kind().supports_template_update() || workload.has_owner() {
        return Ok(None);
    }
    let mut desired = workload.clone();
    let (outcome, _) = reconcile_workload(&mut desired, resources, defaults)?;
    Ok(outcome.changed.then_some(desired))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        AuthProxyContainerSpec, AuthProxyWorkloadSpec, InstanceSpec, RolloutStrategy,
        WorkloadSelectorSpec,
    };
    use crate::workload::WorkloadKind;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use serde_json::json;

    fn resource(name: &str, generation: i64) -> AuthProxyWorkload {
        let mut r = AuthProxyWorkload::new(
            name,
            AuthProxyWorkloadSpec {
                workload_selector: WorkloadSelectorSpec {
                    kind: "Deployment".to_string(),
                    selector: Some(LabelSelector {
                        match_labels: Some([("app".to_string(), "hello".to_string())].into()),
                        match_expressions: None,
                    }),
                    ..Default::default()
                },
                instances: vec![InstanceSpec {
                    connection_string: "proj:region:db".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        r.metadata.namespace = Some("default".to_string());
        r.metadata.generation = Some(generation);
        r
    }

    fn workload(kind: WorkloadKind, labels: serde_json::Value) -> Workload {
        let template = json!({
            "metadata": {"labels": labels},
            "spec": {"containers": [{"name": "app", "image": "busybox"}]}
        });
        let raw = match kind {
            WorkloadKind::Pod => json!({
                "metadata": {"name": "web", "namespace": "default", "labels": labels},
                "spec": template["spec"]
            }),
            _ => json!({
                "metadata": {"name": "web", "namespace": "default", "labels": labels},
                "spec": {"selector": {}, "template": template}
            }),
        };
        Workload::from_value(kind, raw).unwrap_or_else(|e| panic!("{e}"))
    }

    fn containers(w: &Workload) -> Vec<String> {
        w.pod_template()
            .spec
            .map(|s| s.containers.into_iter().map(|c| c.name).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_relation() {
        let r = resource("db", 1);
        let hello = workload(WorkloadKind::Deployment, json!({"app": "hello"}));
        assert_eq!(relation(&r, &hello), Relation::Matched);
        let bye = workload(WorkloadKind::Deployment, json!({"app": "bye"}));
        assert_eq!(relation(&r, &bye), Relation::Unrelated);

        let mut stale = workload(WorkloadKind::Deployment, json!({"app": "bye"}));
        mark_needs_update(&r, &mut stale);
        assert_eq!(relation(&r, &stale), Relation::Stale);
    }

    #[test]
    fn test_matched_deployment_is_rolled_out() {
        let r = resource("db", 1);
        let w = workload(WorkloadKind::Deployment, json!({"app": "hello"}));
        let plan = plan_matched(&r, &[r.clone()], &w, &ProxyDefaults::default())
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(plan.write);
        assert!(plan.generation.is_up_to_date());
        assert_eq!(containers(&plan.workload), vec!["app".to_string(), "csql-db".to_string()]);

        let again = plan_matched(&r, &[r.clone()], &plan.workload, &ProxyDefaults::default())
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(!again.write);
    }

    #[test]
    fn test_pod_is_never_written() {
        let r = resource("db", 2);
        let pod = workload(WorkloadKind::Pod, json!({"app": "hello"}));
        let plan = plan_matched(&r, &[r.clone()], &pod, &ProxyDefaults::default())
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(!plan.write);
        assert_eq!(plan.generation.new_requested, Some(2));
        assert_eq!(plan.generation.new_applied, None);
        assert!(!plan.generation.is_up_to_date());
        assert_eq!(containers(&plan.workload), vec!["app".to_string()]);
    }

    #[test]
    fn test_rollout_strategy_none_only_observes() {
        let mut r = resource("db", 1);
        r.spec.auth_proxy_container = Some(AuthProxyContainerSpec {
            rollout_strategy: Some(RolloutStrategy::None),
            ..Default::default()
        });
        let w = workload(WorkloadKind::Deployment, json!({"app": "hello"}));
        let plan = plan_matched(&r, &[r.clone()], &w, &ProxyDefaults::default())
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(!plan.write);
        assert!(!plan.generation.is_up_to_date());
    }

    #[test]
    fn test_prune_removes_deleted_resource() {
        let r = resource("db", 1);
        let w = workload(WorkloadKind::Deployment, json!({"app": "hello"}));
        let plan = plan_matched(&r, &[r.clone()], &w, &ProxyDefaults::default())
            .unwrap_or_else(|e| panic!("{e}"));

        let pruned = plan_prune(&[], &plan.workload, &ProxyDefaults::default())
            .unwrap_or_else(|e| panic!("{e}"))
            .unwrap_or_else(|| panic!("expected a write"));
        assert_eq!(containers(&pruned), vec!["app".to_string()]);
        assert!(!is_tracked("db", &pruned));
        assert!(plan_prune(&[], &pruned, &ProxyDefaults::default())
            .unwrap_or_else(|e| panic!("{e}"))
            .is_none());
    }

    #[test]
    fn test_resources_with_replaces_cached_copy() {
        let cached = vec![resource("db", 1), resource("other", 1)];
        let merged = resources_with(&resource("db", 2), &cached);
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().any(|r| r.name() == "db" && r.generation() == 2));
    }
}
