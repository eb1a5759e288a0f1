//! # Workloads
//!
//! The mutation engine: naming, the uniform workload view, selector matching,
//! pod template mutation and generation tracking. Everything here except
//! [`client`] is pure and shared by the controller and the admission webhook.

pub mod annotations;
pub mod client;
pub mod kinds;
pub mod names;
pub mod podspec;
pub mod selector;

pub use annotations::{generation_status, mark_needs_update, mark_updated, GenerationStatus};
pub use kinds::{Workload, WorkloadError, WorkloadKind};
pub use podspec::{
    apply_proxies, EnvConflict, MountConflict, MutationError, MutationOutcome, ProxyDefaults,
};
pub use selector::{matches, matching_resources, resource_matches, try_matches, SelectorError};

/// Apply the proxies of every matching resource to the workload and mark each
/// of them as applied.
///
/// `resources` may contain resources that do not select the workload; they
/// are filtered out, and their artifacts are removed from the template.
pub fn reconcile_workload(
    workload: &mut Workload,
    resources: &[crate::crd::AuthProxyWorkload],
    defaults: &ProxyDefaults,
) -> Result<(MutationOutcome, Vec<GenerationStatus>), MutationError> {
    let matching = matching_resources(resources, workload);
    let mut template = workload.pod_template();
    let mut outcome = apply_proxies(&mut template, &matching, defaults)?;
    workload.set_pod_template(template);

    let live: Vec<&crate::crd::AuthProxyWorkload> = matching.iter().collect();
    outcome.changed |= annotations::prune_stale(workload, &live);
    let mut statuses = Vec::with_capacity(matching.len());
    for resource in &matching {
        let (changed, status) = mark_updated(resource, workload);
        outcome.changed |= changed;
        statuses.push(status);
    }
    Ok((outcome, statuses))
}
