//! Injection scenarios driven through the webhook and the reconcile planner
//! together, without a cluster.

mod common;

use cloudsql_proxy_operator::controller::reconciler::plan::{plan_matched, plan_prune};
use cloudsql_proxy_operator::controller::reconciler::status::{compute_status, ObservedWorkload};
use cloudsql_proxy_operator::crd::{
    InstanceSpec, SocketType, REASON_FINISHED_RECONCILE, REASON_NO_WORKLOADS_FOUND,
};
use cloudsql_proxy_operator::webhook::mutate_review;
use cloudsql_proxy_operator::workload::names::container_name;
use cloudsql_proxy_operator::workload::{generation_status, ProxyDefaults, Workload, WorkloadKind};
use common::{
    admission_request, apply_patch, container_names, deployment, deployment_value, load_resource,
    template_container_names,
};
use serde_json::{json, Value};

const NOW: &str = "2026-01-01T00:00:00Z";

fn env_value(container: &Value, name: &str) -> Option<String> {
    container["env"]
        .as_array()?
        .iter()
        .find(|e| e["name"] == name)
        .and_then(|e| e["value"].as_str().map(String::from))
}

/// A Pod as a ReplicaSet would stamp it out of the Deployment template
fn pod_from_template(workload: &Workload) -> Value {
    let template = serde_json::to_value(workload.pod_template()).expect("template should encode");
    let mut metadata = template["metadata"].clone();
    metadata["name"] = json!("hello-7d9f8b6c5-x2x4q");
    metadata["namespace"] = json!("default");
    metadata["ownerReferences"] = json!([{
        "apiVersion": "apps/v1",
        "kind": "ReplicaSet",
        "name": "hello-7d9f8b6c5",
        "uid": "6a1f2c3d-0000-4000-8000-000000000001",
        "controller": true
    }]);
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": metadata,
        "spec": template["spec"].clone()
    })
}

#[test]
fn test_new_deployment_gets_proxy_at_admission() {
    let resource = load_resource("authproxyworkload-hello.yaml");
    let object = deployment_value("hello", json!({"app": "hello"}));

    let response = mutate_review(
        &admission_request("CREATE", "Deployment", object.clone()),
        &[resource],
        &ProxyDefaults::default(),
    );
    assert!(response.allowed);
    let patch = response.patch.as_deref().expect("a matching deployment should be patched");
    let admitted = apply_patch(&object, patch);

    let pod_spec = &admitted["spec"]["template"]["spec"];
    assert_eq!(container_names(pod_spec), vec!["app", "csql-hello-db"]);

    let proxy = &pod_spec["containers"][1];
    let args: Vec<&str> = proxy["args"]
        .as_array()
        .expect("proxy should have args")
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(args.iter().any(|a| a.starts_with("proj:region:db")), "args: {args:?}");
    assert!(args.contains(&"proj:region:db?port=5000"), "args: {args:?}");

    let app = &pod_spec["containers"][0];
    assert_eq!(env_value(app, "DB_HOST").as_deref(), Some("127.0.0.1"));
    assert_eq!(env_value(app, "DB_PORT").as_deref(), Some("5000"));

    let annotations = &admitted["spec"]["template"]["metadata"]["annotations"];
    assert_eq!(annotations["cloudsql.cloud.google.com/hello-db-request"], "1");
    assert_eq!(annotations["cloudsql.cloud.google.com/hello-db-applied"], "1");
}

#[test]
fn test_existing_deployment_is_rolled_out_and_new_pods_carry_proxy() {
    let resource = load_resource("authproxyworkload-hello.yaml");
    let resources = vec![resource.clone()];
    let existing = deployment("hello", json!({"app": "hello"}));
    assert_eq!(template_container_names(&existing), vec!["app"]);

    let plan = plan_matched(&resource, &resources, &existing, &ProxyDefaults::default())
        .expect("planning should succeed");
    assert!(plan.write, "the template change must be written to trigger a rollout");
    assert!(plan.generation.is_up_to_date());
    assert_eq!(template_container_names(&plan.workload), vec!["app", "csql-hello-db"]);

    // The ReplicaSet's pods are owned, so admission leaves them alone
    let pod = pod_from_template(&plan.workload);
    let response = mutate_review(
        &admission_request("CREATE", "Pod", pod.clone()),
        &resources,
        &ProxyDefaults::default(),
    );
    assert!(response.allowed);
    assert!(response.patch.is_none());
    assert_eq!(container_names(&pod["spec"]), vec!["app", "csql-hello-db"]);

    let status = compute_status(
        &resource,
        &[ObservedWorkload::new(&plan.workload, plan.generation)],
        NOW,
    );
    let condition = status.up_to_date().expect("status should carry UpToDate");
    assert!(condition.is_true());
    assert_eq!(condition.reason.as_deref(), Some(REASON_FINISHED_RECONCILE));
    assert_eq!(status.workload_status.len(), 1);
}

#[test]
fn test_deleting_resource_restores_original_template() {
    let resource = load_resource("authproxyworkload-hello.yaml");
    let original = deployment("hello", json!({"app": "hello"}));
    let defaults = ProxyDefaults::default();
    let injected = plan_matched(&resource, &[resource.clone()], &original, &defaults)
        .expect("planning should succeed")
        .workload;

    let pruned = plan_prune(&[], &injected, &ProxyDefaults::default())
        .expect("pruning should succeed")
        .expect("an injected deployment must be rewritten");
    assert_eq!(template_container_names(&pruned), vec!["app"]);
    assert!(pruned.template_annotations().is_empty());
    assert_eq!(pruned.pod_template(), original.pod_template());

    assert!(plan_prune(&[], &pruned, &ProxyDefaults::default())
        .expect("pruning should succeed")
        .is_none());

    let status = compute_status(&resource, &[], NOW);
    assert_eq!(
        status.up_to_date().and_then(|c| c.reason.as_deref()),
        Some(REASON_NO_WORKLOADS_FOUND)
    );
}

#[test]
fn test_long_resource_name_gives_bounded_deterministic_container() {
    let long_name = "a".repeat(59);
    let mut resource = load_resource("authproxyworkload-hello.yaml");
    resource.metadata.name = Some(long_name.clone());

    let expected = container_name(&long_name);
    assert!(expected.len() <= 63);
    assert!(expected.starts_with("csql-"));
    assert_eq!(expected, container_name(&long_name));

    let object = deployment_value("hello", json!({"app": "hello"}));
    let request = admission_request("CREATE", "Deployment", object.clone());
    let first = mutate_review(&request, &[resource.clone()], &ProxyDefaults::default());
    let second = mutate_review(&request, &[resource], &ProxyDefaults::default());
    assert_eq!(first.patch, second.patch);

    let patch = first.patch.as_deref().expect("deployment should be patched");
    let admitted = apply_patch(&object, patch);
    assert_eq!(
        container_names(&admitted["spec"]["template"]["spec"]),
        vec!["app".to_string(), expected]
    );
}

#[test]
fn test_controller_after_webhook_writes_nothing() {
    let resource = load_resource("authproxyworkload-hello.yaml");
    let object = deployment_value("hello", json!({"app": "hello"}));
    let response = mutate_review(
        &admission_request("CREATE", "Deployment", object.clone()),
        &[resource.clone()],
        &ProxyDefaults::default(),
    );
    let patch = response.patch.as_deref().expect("deployment should be patched");
    let admitted = apply_patch(&object, patch);
    let stored = Workload::from_value(WorkloadKind::Deployment, admitted)
        .expect("deployment should decode");

    let plan = plan_matched(&resource, &[resource.clone()], &stored, &ProxyDefaults::default())
        .expect("planning should succeed");
    assert!(!plan.write);
    assert!(generation_status(&resource, &stored).is_up_to_date());
}

#[test]
fn test_webhook_after_controller_patches_nothing() {
    let resource = load_resource("authproxyworkload-hello.yaml");
    let plan = plan_matched(
        &resource,
        &[resource.clone()],
        &deployment("hello", json!({"app": "hello"})),
        &ProxyDefaults::default(),
    )
    .expect("planning should succeed");

    let written = plan.workload.to_value().expect("deployment should encode");
    let response = mutate_review(
        &admission_request("UPDATE", "Deployment", written),
        &[resource],
        &ProxyDefaults::default(),
    );
    assert!(response.allowed);
    assert!(response.patch.is_none());
}

#[test]
fn test_new_generation_is_requested_then_applied() {
    let mut resource = load_resource("authproxyworkload-hello.yaml");
    let first = plan_matched(
        &resource,
        &[resource.clone()],
        &deployment("hello", json!({"app": "hello"})),
        &ProxyDefaults::default(),
    )
    .expect("planning should succeed")
    .workload;
    assert_eq!(
        first
            .template_annotations()
            .get("cloudsql.cloud.google.com/hello-db-applied")
            .map(String::as_str),
        Some("1")
    );

    resource.metadata.generation = Some(2);
    resource.spec.instances[0].port = Some(6000);
    let second = plan_matched(&resource, &[resource.clone()], &first, &ProxyDefaults::default())
        .expect("planning should succeed");
    assert!(second.write);
    assert!(second.generation.is_up_to_date());
    assert_eq!(second.generation.new_applied, Some(2));

    let annotations = second.workload.template_annotations();
    assert_eq!(
        annotations.get("cloudsql.cloud.google.com/hello-db-request").map(String::as_str),
        Some("2")
    );
    let template = serde_json::to_value(second.workload.pod_template())
        .expect("template should encode");
    assert_eq!(
        env_value(&template["spec"]["containers"][0], "DB_PORT").as_deref(),
        Some("6000")
    );
}

#[test]
fn test_invalid_peer_is_left_out_at_admission() {
    let good = load_resource("authproxyworkload-hello.yaml");
    let mut bad = good.clone();
    bad.metadata.name = Some("broken-db".to_string());
    bad.spec.instances[0].connection_string = "not-a-connection-string".to_string();
    let object = deployment_value("hello", json!({"app": "hello"}));

    let response = mutate_review(
        &admission_request("CREATE", "Deployment", object.clone()),
        &[good, bad],
        &ProxyDefaults::default(),
    );
    assert!(response.allowed);
    let patch = response.patch.as_deref().expect("deployment should be patched");
    let admitted = apply_patch(&object, patch);
    assert_eq!(
        container_names(&admitted["spec"]["template"]["spec"]),
        vec!["app", "csql-hello-db"]
    );
}

#[test]
fn test_unix_sockets_in_one_directory_share_a_volume() {
    let mut first = load_resource("authproxyworkload-hello.yaml");
    first.metadata.name = Some("first-db".to_string());
    first.spec.instances = vec![InstanceSpec {
        connection_string: "proj:region:first".to_string(),
        socket_type: Some(SocketType::Unix),
        unix_socket_path: Some("/cloudsql/first.sock".to_string()),
        ..Default::default()
    }];
    let mut second = first.clone();
    second.metadata.name = Some("second-db".to_string());
    second.spec.instances[0].connection_string = "proj:region:second".to_string();
    second.spec.instances[0].unix_socket_path = Some("/cloudsql/second.sock".to_string());
    let object = deployment_value("hello", json!({"app": "hello"}));

    let response = mutate_review(
        &admission_request("CREATE", "Deployment", object.clone()),
        &[first, second],
        &ProxyDefaults::default(),
    );
    let patch = response.patch.as_deref().expect("deployment should be patched");
    let admitted = apply_patch(&object, patch);
    let pod_spec = &admitted["spec"]["template"]["spec"];

    let volumes: Vec<&str> = pod_spec["volumes"]
        .as_array()
        .expect("pod should have volumes")
        .iter()
        .filter_map(|v| v["name"].as_str())
        .collect();
    assert_eq!(volumes, vec!["csql-unix-cloudsql"]);

    for container in pod_spec["containers"].as_array().expect("pod should have containers") {
        let mounts: Vec<(&str, &str)> = container["volumeMounts"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|m| Some((m["name"].as_str()?, m["mountPath"].as_str()?)))
            .collect();
        assert_eq!(
            mounts,
            vec![("csql-unix-cloudsql", "/cloudsql")],
            "container {}",
            container["name"]
        );
    }
}
