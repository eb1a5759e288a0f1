//! Mutating admission for the six workload kinds.

use super::{WebhookError, WebhookState};
use crate::crd::AuthProxyWorkload;
use crate::observability::metrics;
use crate::workload::{reconcile_workload, try_matches, ProxyDefaults, Workload, WorkloadKind};
use axum::{extract::State, Json};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Handle a mutating admission review for any supported workload kind
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let start = Instant::now();
    let request: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            metrics::record_admission_review("mutate", "invalid", start.elapsed().as_secs_f64());
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let resources: Vec<AuthProxyWorkload> = state
        .resources
        .state()
        .iter()
        .map(|r| (**r).clone())
        .collect();
    let response = mutate_review(&request, &resources, &state.defaults);

    let outcome = match (response.allowed, response.patch.is_some()) {
        (false, _) => "denied",
        (true, true) => "patched",
        (true, false) => "allowed",
    };
    metrics::record_admission_review("mutate", outcome, start.elapsed().as_secs_f64());
    Json(response.into_review())
}

/// Compute the admission response for one request.
///
/// Objects that need no proxy configuration are admitted unchanged; a
/// mutated object gets a JSON patch; anything that prevents a correct
/// mutation denies the request.
#[must_use]
pub fn mutate_review(
    request: &AdmissionRequest<DynamicObject>,
    resources: &[AuthProxyWorkload],
    defaults: &ProxyDefaults,
) -> AdmissionResponse {
    let span = tracing::span!(
        tracing::Level::INFO,
        "webhook.mutate",
        uid = request.uid.as_str(),
        kind = request.kind.kind.as_str(),
        namespace = request.namespace.as_deref().unwrap_or_default(),
        name = request.name.as_str(),
    );
    let _guard = span.enter();

    let response = AdmissionResponse::from(request);
    match mutate(request, resources, defaults) {
        Ok(None) => response,
        Ok(Some((patch, warnings))) => {
            info!(operations = patch.0.len(), "webhook.mutate.patched");
            match response.with_patch(patch) {
                Ok(mut patched) => {
                    if !warnings.is_empty() {
                        patched.warnings = Some(warnings);
                    }
                    patched
                }
                Err(e) => {
                    error!(error = %e, "Failed to serialize patch");
                    AdmissionResponse::from(request)
                        .deny(WebhookError::Patch(e.to_string()).to_string())
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "webhook.mutate.denied");
            response.deny(e.to_string())
        }
    }
}

fn mutate(
    request: &AdmissionRequest<DynamicObject>,
    resources: &[AuthProxyWorkload],
    defaults: &ProxyDefaults,
) -> Result<Option<(json_patch::Patch, Vec<String>)>, WebhookError> {
    let kind: WorkloadKind = request.kind.kind.parse()?;
    match request.operation {
        Operation::Create => {}
        Operation::Update if kind.supports_template_update() => {}
        // A Pod or Job spec cannot change after creation
        _ => return Ok(None),
    }
    let Some(object) = &request.object else {
        debug!("No object in request, allowing unchanged");
        return Ok(None);
    };

    let mut raw = serde_json::to_value(object)
        .map_err(|e| WebhookError::InvalidReview(format!("object is not serializable: {e}")))?;
    let meta = raw.get_mut("metadata").and_then(Value::as_object_mut);
    if let (Some(namespace), Some(meta)) = (&request.namespace, meta) {
        meta.entry("namespace")
            .or_insert_with(|| Value::String(namespace.clone()));
    }
    let before = Workload::from_value(kind, raw)?;
    if before.has_owner() {
        debug!("Workload is owned by another object, allowing unchanged");
        return Ok(None);
    }

    // A broken selector on a candidate must not silently skip the proxy
    for resource in resources
        .iter()
        .filter(|r| r.namespace() == before.namespace() && !r.is_deleting())
        .filter(|r| {
            let selected = r.spec.workload_selector.kind.parse::<WorkloadKind>();
            selected.is_ok_and(|k| k == kind)
        })
    {
        try_matches(&before, &resource.spec.workload_selector, resource.namespace()).map_err(
            |source| WebhookError::Selector {
                resource: resource.name().to_string(),
                source,
            },
        )?;
    }

    let mut after = before.clone();
    let (outcome, statuses) = reconcile_workload(&mut after, resources, defaults)?;
    if !outcome.changed {
        return Ok(None);
    }
    debug!(resources = statuses.len(), "webhook.mutate.applied");

    let patch = json_patch::diff(&before.to_value()?, &after.to_value()?);
    let env_warnings = outcome.conflicts.iter().map(|c| {
        format!(
            "container {} already defines {}, the operator value was not injected",
            c.container, c.variable
        )
    });
    let mount_warnings = outcome.mount_conflicts.iter().map(|c| {
        format!(
            "container {} already mounts a volume at {}, \
             the proxy socket directory was not mounted",
            c.container, c.mount_path
        )
    });
    let warnings = env_warnings.chain(mount_warnings).collect();
    Ok(Some((patch, warnings)))
}
