//! # Selector Matching
//!
//! Decides whether a workload is selected by an `AuthProxyWorkload`.
//!
//! All rules must pass:
//! 1. kind equality (the first segment of a versioned kind)
//! 2. exact name equality when a name is given
//! 3. the selector namespace, or the resource's own namespace, equals the workload namespace
//! 4. the label selector matches the workload labels (absent selector matches everything)
//!
//! A label selector that cannot be parsed never matches.

use super::kinds::{Workload, WorkloadKind};
use crate::controller::reconciler::validation::validate;
use crate::crd::{AuthProxyWorkload, WorkloadSelectorSpec};
use crate::observability::metrics;
use kube::core::{Selector, SelectorExt};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
#[error("invalid label selector for workload selector of kind {kind:?}: {message}")]
pub struct SelectorError {
    pub kind: String,
    pub message: String,
}

/// Fail-closed match: a malformed label selector is logged, counted and treated as no match
#[must_use]
pub fn matches(
    workload: &Workload,
    selector: &WorkloadSelectorSpec,
    default_namespace: &str,
) -> bool {
    match try_matches(workload, selector, default_namespace) {
        Ok(matched) => matched,
        Err(e) => {
            warn!(
                workload.kind = %workload.kind(),
                workload.name = workload.name(),
                workload.namespace = workload.namespace(),
                error = %e,
                "selector.parse_failed, treating as non-match"
            );
            metrics::increment_selector_parse_errors();
            false
        }
    }
}

/// Match that surfaces selector parse failures to the caller
pub fn try_matches(
    workload: &Workload,
    selector: &WorkloadSelectorSpec,
    default_namespace: &str,
) -> Result<bool, SelectorError> {
    // Parse first so a broken selector is reported even when other rules reject
    let label_selector = parse_label_selector(selector)?;

    if !kind_matches(&selector.kind, workload.kind()) {
        return Ok(false);
    }
    if let Some(name) = selector.name.as_deref().filter(|n| !n.is_empty()) {
        if name != workload.name() {
            return Ok(false);
        }
    }
    let namespace = selector
        .namespace
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .unwrap_or(default_namespace);
    if namespace != workload.namespace() {
        return Ok(false);
    }
    Ok(label_selector.is_none_or(|s| s.matches(&workload.labels())))
}

/// Whether `resource` selects `workload`, using the resource's namespace as default
#[must_use]
pub fn resource_matches(resource: &AuthProxyWorkload, workload: &Workload) -> bool {
    matches(workload, &resource.spec.workload_selector, resource.namespace())
}

/// Live, valid resources selecting `workload`, sorted by name.
///
/// Resources being deleted are treated as absent. A resource failing
/// validation is left out as well, so its artifacts are pruned and it never
/// blocks the valid resources selecting the same workload.
#[must_use]
pub fn matching_resources<'a, I>(resources: I, workload: &Workload) -> Vec<AuthProxyWorkload>
where
    I: IntoIterator<Item = &'a AuthProxyWorkload>,
{
    let mut selected: Vec<AuthProxyWorkload> = resources
        .into_iter()
        .filter(|r| !r.is_deleting() && resource_matches(r, workload))
        .filter(|r| match validate(r) {
            Ok(()) => true,
            Err(e) => {
                metrics::increment_invalid_resources_skipped();
                warn!(
                    resource.name = r.name(),
                    resource.namespace = r.namespace(),
                    workload.kind = %workload.kind(),
                    workload.name = workload.name(),
                    error = %e,
                    "resource.invalid, leaving it out of the mutation"
                );
                false
            }
        })
        .cloned()
        .collect();
    selected.sort_by(|a, b| a.name().cmp(b.name()));
    selected
}

/// Parse the optional label selector of a workload selector
pub fn parse_label_selector(
    selector: &WorkloadSelectorSpec,
) -> Result<Option<Selector>, SelectorError> {
    selector
        .selector
        .clone()
        .map(Selector::try_from)
        .transpose()
        .map_err(|e| SelectorError {
            kind: selector.kind.clone(),
            message: e.to_string(),
        })
}

fn kind_matches(selector_kind: &str, kind: WorkloadKind) -> bool {
    if selector_kind.is_empty() {
        return true;
    }
    selector_kind
        .parse::<WorkloadKind>()
        .is_ok_and(|k| k == kind)
}
