//! Validating admission for `AuthProxyWorkload` resources.

use super::WebhookState;
use crate::controller::reconciler::validation;
use crate::crd::AuthProxyWorkload;
use crate::observability::metrics;
use axum::{extract::State, Json};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

pub async fn validate_handler(
    State(_state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<AuthProxyWorkload>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let start = Instant::now();
    let request: AdmissionRequest<AuthProxyWorkload> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            metrics::record_admission_review("validate", "invalid", start.elapsed().as_secs_f64());
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    let response = validate_review(&request);
    let outcome = if response.allowed { "allowed" } else { "denied" };
    metrics::record_admission_review("validate", outcome, start.elapsed().as_secs_f64());
    Json(response.into_review())
}

fn with_namespace(resource: &AuthProxyWorkload, namespace: Option<&String>) -> AuthProxyWorkload {
    let mut resource = resource.clone();
    if resource.metadata.namespace.is_none() {
        resource.metadata.namespace = namespace.cloned();
    }
    resource
}

/// Validate a create or update. Objects on their way out are never blocked.
#[must_use]
pub fn validate_review(request: &AdmissionRequest<AuthProxyWorkload>) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);
    let Some(object) = request.object.as_ref() else {
        return response;
    };
    let object = with_namespace(object, request.namespace.as_ref());
    if object.is_deleting() {
        return response;
    }

    let result = match (&request.operation, request.old_object.as_ref()) {
        (Operation::Create, _) => validation::validate(&object),
        (Operation::Update, Some(old)) => {
            validation::validate_update(&with_namespace(old, request.namespace.as_ref()), &object)
        }
        (Operation::Update, None) => validation::validate(&object),
        _ => Ok(()),
    };
    match result {
        Ok(()) => response,
        Err(e) => {
            warn!(
                resource.name = object.name(),
                resource.namespace = object.namespace(),
                error = %e,
                "webhook.validate.denied"
            );
            response.deny(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn resource(kind: &str, instances: Value) -> Value {
        json!({
            "apiVersion": "cloudsql.cloud.google.com/v1",
            "kind": "AuthProxyWorkload",
            "metadata": {"name": "db"},
            "spec": {
                "workloadSelector": {"kind": kind, "name": "web"},
                "instances": instances
            }
        })
    }

    fn request(
        operation: &str,
        object: Value,
        old: Option<Value>,
    ) -> AdmissionRequest<AuthProxyWorkload> {
        let review: AdmissionReview<AuthProxyWorkload> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "7d2e",
                "kind": {
                    "group": "cloudsql.cloud.google.com",
                    "version": "v1",
                    "kind": "AuthProxyWorkload"
                },
                "resource": {
                    "group": "cloudsql.cloud.google.com",
                    "version": "v1",
                    "resource": "authproxyworkloads"
                },
                "namespace": "default",
                "operation": operation,
                "userInfo": {"username": "admin"},
                "object": object,
                "oldObject": old,
                "dryRun": false
            }
        }))
        .unwrap_or_else(|e| panic!("{e}"));
        review.try_into().unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn test_create() {
        let ok = resource("Deployment", json!([{"connectionString": "proj:region:db"}]));
        assert!(validate_review(&request("CREATE", ok, None)).allowed);

        let unknown = resource("ReplicaSet", json!([{"connectionString": "proj:region:db"}]));
        assert!(!validate_review(&request("CREATE", unknown, None)).allowed);

        let empty = resource("Deployment", json!([]));
        let response = validate_review(&request("CREATE", empty, None));
        assert!(!response.allowed);
        assert!(response.result.message.contains("spec.instances"));
    }

    #[test]
    fn test_update_keeps_selector() {
        let old = resource("Deployment", json!([{"connectionString": "proj:region:db"}]));
        let same_selector =
            resource("Deployment", json!([{"connectionString": "proj:region:other"}]));
        assert!(validate_review(&request("UPDATE", same_selector, Some(old.clone()))).allowed);

        let moved = resource("StatefulSet", json!([{"connectionString": "proj:region:db"}]));
        let response = validate_review(&request("UPDATE", moved, Some(old)));
        assert!(!response.allowed);
        assert!(response.result.message.contains("immutable"));
    }

    #[test]
    fn test_deleting_object_is_not_blocked() {
        let mut invalid = resource("Deployment", json!([]));
        invalid["metadata"]["deletionTimestamp"] = json!("2026-01-01T00:00:00Z");
        let old = invalid.clone();
        assert!(validate_review(&request("UPDATE", invalid, Some(old))).allowed);
    }
}
