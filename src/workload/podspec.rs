//! # Pod Template Mutation
//!
//! Computes the pod template a workload should have given every
//! `AuthProxyWorkload` currently selecting it.
//!
//! Containers, volumes and volume mounts whose names carry the reserved
//! `csql-` prefix belong to the operator and are rewritten freely: desired
//! entries replace existing ones in place, new ones are appended and stale ones
//! are removed. Everything else in the template belongs to the user and is left
//! as it is, except for the environment variables the operator injects into
//! application containers. Those are tracked by name in the
//! `cloudsql.cloud.google.com/managed-env` template annotation so a variable the
//! user defined is never overwritten or removed.
//!
//! Applying the mutation twice with the same inputs yields the same template.

use super::names;
use crate::constants::{
    CREDENTIALS_MOUNT_ROOT, DEFAULT_FIRST_INSTANCE_PORT, DEFAULT_HEALTH_CHECK_PORT,
    DEFAULT_PROXY_IMAGE, MANAGED_ENV_ANNOTATION, PROXY_HOST,
};
use crate::crd::{AdminApi, AuthProxyWorkload, InstanceSpec, SocketType};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, HTTPGetAction, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, SecretVolumeSource, SecurityContext, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::{BTreeMap, BTreeSet};

const MAX_PORT: i32 = 65535;
const PROXY_USER_ID: i64 = 65532;

/// Operator-wide defaults for generated proxy containers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyDefaults {
    pub image: String,
}

impl Default for ProxyDefaults {
    fn default() -> Self {
        Self {
            image: DEFAULT_PROXY_IMAGE.to_string(),
        }
    }
}

/// An injected variable skipped because the container already defines it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConflict {
    pub container: String,
    pub variable: String,
}

/// A socket directory not shared with a container that already mounts something there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConflict {
    pub container: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationOutcome {
    /// Whether the template differs from the input
    pub changed: bool,
    pub conflicts: Vec<EnvConflict>,
    pub mount_conflicts: Vec<MountConflict>,
}

#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error("environment variable {variable} is requested by both {first} and {second}")]
    DuplicateEnv {
        variable: String,
        first: String,
        second: String,
    },
    #[error(
        "instance {connection_string} of {resource} uses a unix socket but has no unixSocketPath"
    )]
    MissingSocketPath {
        resource: String,
        connection_string: String,
    },
    #[error("no free port at or above {start} for {resource}")]
    PortsExhausted { resource: String, start: i32 },
}

/// Ports already taken inside the pod network namespace
#[derive(Debug, Default)]
struct PortAllocator {
    used: BTreeSet<i32>,
}

impl PortAllocator {
    /// Seed with the ports of application containers and every explicitly configured port
    fn for_pod(spec: &PodSpec, resources: &[&AuthProxyWorkload]) -> Self {
        let mut used: BTreeSet<i32> = spec
            .containers
            .iter()
            .filter(|c| !names::is_operator_owned(&c.name))
            .flat_map(|c| c.ports.iter().flatten())
            .map(|p| p.container_port)
            .collect();
        for resource in resources {
            used.extend(resource.spec.instances.iter().filter_map(|i| i.port));
            if let Some(container) = &resource.spec.auth_proxy_container {
                used.extend(container.telemetry.as_ref().and_then(|t| t.http_port));
                used.extend(container.admin_server.as_ref().map(|a| a.port));
            }
        }
        Self { used }
    }

    fn allocate(&mut self, start: i32, resource: &str) -> Result<i32, MutationError> {
        let port = (start..=MAX_PORT)
            .find(|p| !self.used.contains(p))
            .ok_or_else(|| MutationError::PortsExhausted {
                resource: resource.to_string(),
                start,
            })?;
        self.used.insert(port);
        Ok(port)
    }
}

/// Everything one resource contributes to a pod
#[derive(Debug)]
struct DesiredProxy {
    resource: String,
    container: Container,
    volumes: Vec<Volume>,
    /// Socket directory mounts shared with application containers
    shared_mounts: Vec<VolumeMount>,
    env: Vec<(String, String)>,
}

/// Rewrite `template` so it carries exactly the proxies of `resources`.
///
/// Resources being deleted are ignored, so their artifacts are pruned.
pub fn apply_proxies(
    template: &mut PodTemplateSpec,
    resources: &[AuthProxyWorkload],
    defaults: &ProxyDefaults,
) -> Result<MutationOutcome, MutationError> {
    let before = template.clone();
    let mut live: Vec<&AuthProxyWorkload> =
        resources.iter().filter(|r| !r.is_deleting()).collect();
    live.sort_by(|a, b| a.name().cmp(b.name()));
    live.dedup_by(|a, b| a.name() == b.name());

    let mut spec = template.spec.clone().unwrap_or_default();
    let mut ports = PortAllocator::for_pod(&spec, &live);
    let desired = live
        .iter()
        .map(|r| desired_proxy(r, defaults, &mut ports))
        .collect::<Result<Vec<_>, _>>()?;
    let env = collect_env(&desired)?;

    spec.containers = upsert_owned(
        std::mem::take(&mut spec.containers),
        desired.iter().map(|d| d.container.clone()).collect(),
        |c| c.name.as_str(),
    );
    // Socket directories shared by several resources map to one volume
    let mut desired_volumes: Vec<Volume> = Vec::new();
    for volume in desired.iter().flat_map(|d| d.volumes.iter()) {
        if !desired_volumes.iter().any(|v| v.name == volume.name) {
            desired_volumes.push(volume.clone());
        }
    }
    let volumes = upsert_owned(
        spec.volumes.clone().unwrap_or_default(),
        desired_volumes,
        |v| v.name.as_str(),
    );
    spec.volumes = finish(volumes, spec.volumes.as_ref());

    let mut shared_mounts: Vec<VolumeMount> = Vec::new();
    for mount in desired.iter().flat_map(|d| d.shared_mounts.iter()) {
        if !shared_mounts.iter().any(|m| m.mount_path == mount.mount_path) {
            shared_mounts.push(mount.clone());
        }
    }

    let mut annotations = template
        .metadata
        .as_ref()
        .and_then(|m| m.annotations.clone())
        .unwrap_or_default();
    let managed = parse_managed_env(annotations.get(MANAGED_ENV_ANNOTATION));
    let mut now_managed = BTreeSet::new();
    let mut conflicts = Vec::new();
    let mut mount_conflicts = Vec::new();
    for container in spec
        .containers
        .iter_mut()
        .filter(|c| !names::is_operator_owned(&c.name))
    {
        sync_shared_mounts(container, &shared_mounts, &mut mount_conflicts);
        sync_env(container, &env, &managed, &mut now_managed, &mut conflicts);
    }

    if now_managed.is_empty() {
        annotations.remove(MANAGED_ENV_ANNOTATION);
    } else {
        let value = now_managed.into_iter().collect::<Vec<_>>().join(",");
        annotations.insert(MANAGED_ENV_ANNOTATION.to_string(), value);
    }
    let had_annotations = template
        .metadata
        .as_ref()
        .is_some_and(|m| m.annotations.is_some());
    if !annotations.is_empty() || had_annotations {
        let meta = template.metadata.get_or_insert_with(Default::default);
        meta.annotations = (!annotations.is_empty()).then_some(annotations);
    }

    template.spec = Some(spec);
    Ok(MutationOutcome {
        changed: *template != before,
        conflicts,
        mount_conflicts,
    })
}

fn desired_proxy(
    resource: &AuthProxyWorkload,
    defaults: &ProxyDefaults,
    ports: &mut PortAllocator,
) -> Result<DesiredProxy, MutationError> {
    let name = resource.name();
    let proxy = resource.spec.auth_proxy_container.clone().unwrap_or_default();
    let mut volumes = Vec::new();
    let mut proxy_mounts = Vec::new();
    let mut shared_mounts = Vec::new();
    let mut env = Vec::new();
    let mut container_ports = Vec::new();
    let mut instance_args = Vec::new();

    for instance in &resource.spec.instances {
        let mut params: BTreeMap<&str, String> = BTreeMap::new();
        match instance.socket_type() {
            SocketType::Tcp => {
                let port = match instance.port {
                    Some(port) => port,
                    None => ports.allocate(DEFAULT_FIRST_INSTANCE_PORT, name)?,
                };
                params.insert("port", port.to_string());
                container_ports.push(tcp_port(port));
                if let Some(var) = &instance.host_env_name {
                    env.push((var.clone(), PROXY_HOST.to_string()));
                }
                if let Some(var) = &instance.port_env_name {
                    env.push((var.clone(), port.to_string()));
                }
            }
            SocketType::Unix => {
                let path = instance
                    .unix_socket_path
                    .clone()
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| MutationError::MissingSocketPath {
                        resource: name.to_string(),
                        connection_string: instance.connection_string.clone(),
                    })?;
                let dir = socket_dir(&path);
                let volume = names::socket_volume_name(&dir);
                if !volumes.iter().any(|v: &Volume| v.name == volume) {
                    volumes.push(Volume {
                        name: volume.clone(),
                        empty_dir: Some(EmptyDirVolumeSource::default()),
                        ..Default::default()
                    });
                }
                let mount = VolumeMount {
                    name: volume,
                    mount_path: dir,
                    ..Default::default()
                };
                if !proxy_mounts.iter().any(|m: &VolumeMount| m.mount_path == mount.mount_path) {
                    proxy_mounts.push(mount.clone());
                    shared_mounts.push(mount);
                }
                if let Some(var) = &instance.unix_socket_path_env_name {
                    env.push((var.clone(), path.clone()));
                }
                params.insert("unix-socket-path", path);
            }
        }
        instance_flags(instance, &mut params);
        instance_args.push(instance_arg(&instance.connection_string, &params));
    }

    let telemetry = proxy.telemetry.clone().unwrap_or_default();
    let health_port = match telemetry.http_port {
        Some(port) => port,
        None => ports.allocate(DEFAULT_HEALTH_CHECK_PORT, name)?,
    };

    let mut args = vec![
        "--structured-logs".to_string(),
        "--health-check".to_string(),
        "--http-address=0.0.0.0".to_string(),
        format!("--http-port={health_port}"),
    ];
    if let Some(admin) = &proxy.admin_server {
        args.push(format!("--admin-port={}", admin.port));
        if admin.enable_apis.contains(&AdminApi::Debug) {
            args.push("--debug".to_string());
        }
        if admin.enable_apis.contains(&AdminApi::QuitQuitQuit) {
            args.push("--quitquitquit".to_string());
        }
    }
    push_value(&mut args, "--quota-project", telemetry.quota_project.as_ref());
    push_flag(&mut args, "--prometheus", telemetry.prometheus);
    push_value(&mut args, "--prometheus-namespace", telemetry.prometheus_namespace.as_ref());
    push_value(&mut args, "--telemetry-project", telemetry.telemetry_project.as_ref());
    push_value(&mut args, "--telemetry-prefix", telemetry.telemetry_prefix.as_ref());
    push_value(&mut args, "--telemetry-sample-rate", telemetry.telemetry_sample_rate.as_ref());
    push_flag(&mut args, "--disable-traces", telemetry.disable_traces);
    push_flag(&mut args, "--disable-metrics", telemetry.disable_metrics);
    push_value(&mut args, "--max-connections", proxy.max_connections.as_ref());
    if let Some(delay) = proxy.max_sigterm_delay {
        args.push(format!("--max-sigterm-delay={delay}s"));
    }
    push_value(&mut args, "--sqladmin-api-endpoint", proxy.sql_admin_api_endpoint.as_ref());
    push_flag(&mut args, "--quiet", proxy.quiet);

    if let Some(secret) = resource
        .spec
        .authentication
        .as_ref()
        .and_then(|a| a.credentials_file_secret.as_ref())
    {
        let volume = names::credentials_volume_name(name);
        let dir = format!("{CREDENTIALS_MOUNT_ROOT}/{name}");
        args.push(format!("--credentials-file={dir}/{}", secret.key));
        volumes.push(Volume {
            name: volume.clone(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
        proxy_mounts.push(VolumeMount {
            name: volume,
            mount_path: dir,
            read_only: Some(true),
            ..Default::default()
        });
    }
    args.extend(instance_args);

    let container_name = names::container_name(name);
    let container = match proxy.container.clone() {
        Some(mut custom) => {
            custom.name = container_name;
            custom
        }
        None => {
            container_ports.push(tcp_port(health_port));
            Container {
                name: container_name,
                image: Some(proxy.image.clone().unwrap_or_else(|| defaults.image.clone())),
                args: Some(args),
                ports: Some(container_ports),
                env: (!env.is_empty()).then(|| {
                    env.iter()
                        .map(|(n, v)| EnvVar {
                            name: n.clone(),
                            value: Some(v.clone()),
                            value_from: None,
                        })
                        .collect()
                }),
                resources: Some(proxy.resources.clone().unwrap_or_else(default_resources)),
                security_context: Some(SecurityContext {
                    run_as_non_root: Some(true),
                    run_as_user: Some(PROXY_USER_ID),
                    read_only_root_filesystem: Some(true),
                    allow_privilege_escalation: Some(false),
                    ..Default::default()
                }),
                startup_probe: Some(http_probe("/startup", health_port)),
                liveness_probe: Some(http_probe("/liveness", health_port)),
                readiness_probe: Some(http_probe("/readiness", health_port)),
                volume_mounts: (!proxy_mounts.is_empty()).then_some(proxy_mounts),
                ..Default::default()
            }
        }
    };

    Ok(DesiredProxy {
        resource: name.to_string(),
        container,
        volumes,
        shared_mounts,
        env,
    })
}

fn instance_flags(instance: &InstanceSpec, params: &mut BTreeMap<&str, String>) {
    if instance.auto_iam_authn == Some(true) {
        params.insert("auto-iam-authn", "true".to_string());
    }
    if instance.private_ip == Some(true) {
        params.insert("private-ip", "true".to_string());
    }
    if instance.psc == Some(true) {
        params.insert("psc", "true".to_string());
    }
}

fn instance_arg(connection_string: &str, params: &BTreeMap<&str, String>) -> String {
    if params.is_empty() {
        return connection_string.to_string();
    }
    let query = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{connection_string}?{query}")
}

fn push_value<T: ToString>(args: &mut Vec<String>, flag: &str, value: Option<&T>) {
    if let Some(value) = value {
        args.push(format!("{flag}={}", value.to_string()));
    }
}

fn push_flag(args: &mut Vec<String>, flag: &str, enabled: Option<bool>) {
    if enabled == Some(true) {
        args.push(flag.to_string());
    }
}

fn tcp_port(port: i32) -> ContainerPort {
    ContainerPort {
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn http_probe(path: &str, port: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        period_seconds: Some(30),
        failure_threshold: Some(6),
        timeout_seconds: Some(10),
        ..Default::default()
    }
}

fn default_resources() -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity("1".to_string())),
            ("memory".to_string(), Quantity("2Gi".to_string())),
        ])),
        ..Default::default()
    }
}

/// Parent directory of a unix socket path
fn socket_dir(path: &str) -> String {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((dir, _)) => dir.to_string(),
    }
}

/// Flatten requested env vars, rejecting two resources asking for the same name
fn collect_env(desired: &[DesiredProxy]) -> Result<Vec<(String, String)>, MutationError> {
    let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
    let mut env = Vec::new();
    for proxy in desired {
        for (name, value) in &proxy.env {
            if let Some(first) = owners.insert(name.as_str(), proxy.resource.as_str()) {
                if first != proxy.resource {
                    return Err(MutationError::DuplicateEnv {
                        variable: name.clone(),
                        first: first.to_string(),
                        second: proxy.resource.clone(),
                    });
                }
                continue;
            }
            env.push((name.clone(), value.clone()));
        }
    }
    Ok(env)
}

/// Replace operator-owned entries in place, drop stale ones, append new ones
fn upsert_owned<T>(existing: Vec<T>, desired: Vec<T>, name: impl Fn(&T) -> &str) -> Vec<T> {
    let mut pending: Vec<Option<T>> = desired.into_iter().map(Some).collect();
    let mut result = Vec::with_capacity(existing.len() + pending.len());
    for item in existing {
        if !names::is_operator_owned(name(&item)) {
            result.push(item);
            continue;
        }
        let slot = pending
            .iter_mut()
            .find(|d| d.as_ref().is_some_and(|d| name(d) == name(&item)));
        if let Some(replacement) = slot.and_then(Option::take) {
            result.push(replacement);
        }
    }
    result.extend(pending.into_iter().flatten());
    result
}

/// Empty lists collapse to an absent field unless the user wrote an explicit empty list
fn finish<T>(items: Vec<T>, original: Option<&Vec<T>>) -> Option<Vec<T>> {
    if items.is_empty() && !original.is_some_and(Vec::is_empty) {
        None
    } else {
        Some(items)
    }
}

fn sync_shared_mounts(
    container: &mut Container,
    shared: &[VolumeMount],
    conflicts: &mut Vec<MountConflict>,
) {
    let original = container.volume_mounts.take();
    let existing = original.clone().unwrap_or_default();
    let user_paths: BTreeSet<&str> = existing
        .iter()
        .filter(|m| !names::is_operator_owned(&m.name))
        .map(|m| m.mount_path.as_str())
        .collect();
    let mut wanted = Vec::with_capacity(shared.len());
    for mount in shared {
        if user_paths.contains(mount.mount_path.as_str()) {
            conflicts.push(MountConflict {
                container: container.name.clone(),
                mount_path: mount.mount_path.clone(),
            });
        } else {
            wanted.push(mount.clone());
        }
    }
    let mounts = upsert_owned(existing, wanted, |m| m.name.as_str());
    container.volume_mounts = finish(mounts, original.as_ref());
}

fn sync_env(
    container: &mut Container,
    desired: &[(String, String)],
    managed: &BTreeSet<String>,
    now_managed: &mut BTreeSet<String>,
    conflicts: &mut Vec<EnvConflict>,
) {
    let container_name = container.name.clone();
    let key = |var: &str| format!("{container_name}:{var}");
    let original = container.env.clone();
    let mut env = original.clone().unwrap_or_default();
    env.retain(|e| !managed.contains(&key(&e.name)) || desired.iter().any(|(n, _)| *n == e.name));
    for (name, value) in desired {
        let owned = managed.contains(&key(name));
        match env.iter_mut().find(|e| e.name == *name) {
            Some(existing) if owned => {
                existing.value = Some(value.clone());
                existing.value_from = None;
                now_managed.insert(key(name));
            }
            Some(_) => conflicts.push(EnvConflict {
                container: container_name.clone(),
                variable: name.clone(),
            }),
            None => {
                env.push(EnvVar {
                    name: name.clone(),
                    value: Some(value.clone()),
                    value_from: None,
                });
                now_managed.insert(key(name));
            }
        }
    }
    container.env = finish(env, original.as_ref());
}

fn parse_managed_env(value: Option<&String>) -> BTreeSet<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
