//! # CRD Tests
//!
//! Sample resources deserialize into the typed spec and the generated CRD
//! carries the expected names and subresources.

mod common;

use cloudsql_proxy_operator::controller::reconciler::validation;
use cloudsql_proxy_operator::crd::{AdminApi, AuthProxyWorkload, RolloutStrategy, SocketType};
use kube::core::CustomResourceExt;

#[test]
fn test_minimal_resource() {
    let resource = common::load_resource("authproxyworkload-hello.yaml");
    assert_eq!(resource.name(), "hello-db");
    assert_eq!(resource.spec.workload_selector.kind, "Deployment");
    assert_eq!(resource.spec.instances.len(), 1);
    assert_eq!(resource.spec.instances[0].socket_type(), SocketType::Tcp);
    assert!(resource.rollout_enabled());
    assert!(validation::validate(&resource).is_ok());
}

#[test]
fn test_full_resource() {
    let resource = common::load_resource("authproxyworkload-full.yaml");
    let proxy = resource.spec.auth_proxy_container.clone().expect("authProxyContainer");
    assert_eq!(proxy.max_connections, Some(20));
    assert_eq!(proxy.rollout_strategy, Some(RolloutStrategy::None));
    assert!(!resource.rollout_enabled());

    let telemetry = proxy.telemetry.expect("telemetry");
    assert_eq!(telemetry.http_port, Some(9090));
    assert_eq!(telemetry.disable_metrics, Some(true));

    let admin = proxy.admin_server.expect("adminServer");
    assert_eq!(admin.enable_apis, vec![AdminApi::Debug, AdminApi::QuitQuitQuit]);

    let secret = resource
        .spec
        .authentication
        .as_ref()
        .and_then(|a| a.credentials_file_secret.as_ref())
        .expect("credentialsFileSecret");
    assert_eq!((secret.name.as_str(), secret.key.as_str()), ("proxy-sa", "key.json"));

    assert_eq!(resource.spec.instances[1].socket_type(), SocketType::Unix);
    assert!(validation::validate(&resource).is_ok());
}

#[test]
fn test_generated_crd() {
    let crd = AuthProxyWorkload::crd();
    assert_eq!(crd.spec.group, "cloudsql.cloud.google.com");
    assert_eq!(crd.spec.names.kind, "AuthProxyWorkload");
    assert_eq!(crd.spec.names.plural, "authproxyworkloads");
    assert_eq!(crd.spec.scope, "Namespaced");
    assert_eq!(crd.spec.names.short_names, Some(vec!["apw".to_string()]));

    let version = &crd.spec.versions[0];
    assert_eq!(version.name, "v1");
    assert!(version.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());

    let yaml = serde_yaml::to_string(&crd).expect("CRD should serialize");
    assert!(yaml.contains("workloadSelector"));
}
