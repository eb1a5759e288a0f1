//! # AuthProxyWorkload Spec
//!
//! The declarative configuration of one proxy sidecar: which workloads it is
//! attached to, how it authenticates and which database instances it exposes.

use k8s_openapi::api::core::v1::{Container, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use serde::{Deserialize, Serialize};

/// AuthProxyWorkload Custom Resource Definition
///
/// Attaches a Cloud SQL Auth Proxy sidecar to every workload matched by
/// `workloadSelector`.
///
/// # Example
///
/// ```yaml
/// apiVersion: cloudsql.cloud.google.com/v1
/// kind: AuthProxyWorkload
/// metadata:
///   name: hello-db
///   namespace: default
/// spec:
///   workloadSelector:
///     kind: Deployment
///     selector:
///       matchLabels:
///         app: hello
///   instances:
///     - connectionString: my-project:us-central1:db
///       portEnvName: DB_PORT
///       hostEnvName: DB_HOST
/// ```
#[derive(
    kube::CustomResource,
    Debug,
    Clone,
    Default,
    Deserialize,
    Serialize,
    schemars::JsonSchema,
    PartialEq,
)]
#[kube(
    kind = "AuthProxyWorkload",
    group = "cloudsql.cloud.google.com",
    version = "v1",
    namespaced,
    status = "crate::crd::AuthProxyWorkloadStatus",
    shortname = "apw",
    printcolumn = r#"{"name":"Kind","type":"string","jsonPath":".spec.workloadSelector.kind"}"#,
    printcolumn = r#"{"name":"UpToDate","type":"string",
        "jsonPath":".status.conditions[?(@.type==\"UpToDate\")].status"}"#,
    printcolumn = r#"{"name":"Reason","type":"string",
        "jsonPath":".status.conditions[?(@.type==\"UpToDate\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AuthProxyWorkloadSpec {
    /// Selects the workloads that receive the proxy container
    pub workload_selector: WorkloadSelectorSpec,
    /// Credentials used by the proxy. Absent means the ambient identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<AuthenticationSpec>,
    /// Overrides for the generated proxy container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_proxy_container: Option<AuthProxyContainerSpec>,
    /// Database instances exposed by the proxy. At least one is required.
    pub instances: Vec<InstanceSpec>,
}

/// Which workloads a resource applies to
///
/// `kind` is required. `name` and `selector` narrow the match; when both are
/// absent every workload of that kind in the namespace matches.
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSelectorSpec {
    /// Workload kind, optionally versioned (`Deployment` or `Deployment.v1.apps`)
    pub kind: String,
    /// Namespace of the workloads. Must equal the resource's own namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Exact workload name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Label selector over the workload's own labels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationSpec {
    /// Secret holding a service account credentials file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_file_secret: Option<CredentialsFileSecret>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsFileSecret {
    /// Secret name in the workload's namespace
    pub name: String,
    /// Key within the secret containing the credentials JSON
    pub key: String,
}

/// Settings applied to the generated proxy container
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthProxyContainerSpec {
    /// Image override. Defaults to the operator's configured proxy image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Resource requests and limits. Defaults to `cpu: 1` and `memory: 2Gi` requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Complete container used verbatim, only its name is replaced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,
    /// `--max-connections`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<i64>,
    /// `--max-sigterm-delay` in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sigterm_delay: Option<i64>,
    /// `--sqladmin-api-endpoint`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_admin_api_endpoint: Option<String>,
    /// `--quiet`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiet: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<TelemetrySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_server: Option<AdminServerSpec>,
    /// How changes reach already-running workloads. Defaults to `Workload`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_strategy: Option<RolloutStrategy>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry_project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry_sample_rate: Option<i64>,
    /// Port of the proxy's health and metrics HTTP server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_traces: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_metrics: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdminServerSpec {
    pub port: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enable_apis: Vec<AdminApi>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
pub enum AdminApi {
    Debug,
    QuitQuitQuit,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
pub enum RolloutStrategy {
    /// Update workload pod templates so Kubernetes replaces running pods
    #[default]
    Workload,
    /// Only touch pods as they are created
    None,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SocketType {
    #[default]
    Tcp,
    Unix,
}

/// One database instance exposed by the proxy
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    /// `project:region:instance`
    pub connection_string: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_type: Option<SocketType>,
    /// TCP port. Auto-assigned from 5000 when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    /// Env var receiving the TCP port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_env_name: Option<String>,
    /// Env var receiving `127.0.0.1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_env_name: Option<String>,
    /// Unix socket path, required for `unix` instances
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unix_socket_path: Option<String>,
    /// Env var receiving the unix socket path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unix_socket_path_env_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_iam_authn: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psc: Option<bool>,
}

impl InstanceSpec {
    #[must_use]
    pub fn socket_type(&self) -> SocketType {
        self.socket_type.unwrap_or_default()
    }
}
