//! Shared fixtures for the integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use cloudsql_proxy_operator::crd::AuthProxyWorkload;
use cloudsql_proxy_operator::workload::{Workload, WorkloadKind};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionReview};
use serde_json::{json, Value};
use std::path::PathBuf;

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

pub fn load_resource(name: &str) -> AuthProxyWorkload {
    let text = std::fs::read_to_string(fixture_path(name)).expect("fixture should be readable");
    serde_yaml::from_str(&text).expect("fixture should deserialize")
}

/// A Deployment in `default` with one application container
pub fn deployment_value(name: &str, labels: Value) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": name, "namespace": "default", "labels": labels.clone()},
        "spec": {
            "replicas": 1,
            "selector": {"matchLabels": labels.clone()},
            "template": {
                "metadata": {"labels": labels},
                "spec": {"containers": [{"name": "app", "image": "ghcr.io/example/hello:1.0"}]}
            }
        }
    })
}

pub fn deployment(name: &str, labels: Value) -> Workload {
    Workload::from_value(WorkloadKind::Deployment, deployment_value(name, labels))
        .expect("deployment should decode")
}

pub fn admission_request(
    operation: &str,
    kind: &str,
    object: Value,
) -> AdmissionRequest<DynamicObject> {
    let review: AdmissionReview<DynamicObject> =
        serde_json::from_value(admission_review(operation, kind, object))
            .expect("review should decode");
    review.try_into().expect("review should carry a request")
}

pub fn admission_review(operation: &str, kind: &str, object: Value) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "0b7c2f4e-1d2a-4c8e-9f3b-5a6d7e8f9a0b",
            "kind": {"group": "apps", "version": "v1", "kind": kind},
            "resource": {
                "group": "apps",
                "version": "v1",
                "resource": format!("{}s", kind.to_lowercase())
            },
            "namespace": "default",
            "operation": operation,
            "userInfo": {"username": "kubernetes-admin"},
            "object": object,
            "dryRun": false
        }
    })
}

/// Apply an RFC 6902 patch carried by an admission response
pub fn apply_patch(object: &Value, patch: &[u8]) -> Value {
    let patch: json_patch::Patch = serde_json::from_slice(patch).expect("patch should decode");
    let mut doc = object.clone();
    json_patch::patch(&mut doc, &patch).expect("patch should apply");
    doc
}

pub fn container_names(pod_spec: &Value) -> Vec<String> {
    pod_spec["containers"]
        .as_array()
        .map(|cs| cs.iter().filter_map(|c| c["name"].as_str().map(String::from)).collect())
        .unwrap_or_default()
}

pub fn template_container_names(workload: &Workload) -> Vec<String> {
    workload
        .pod_template()
        .spec
        .map(|s| s.containers.into_iter().map(|c| c.name).collect())
        .unwrap_or_default()
}
