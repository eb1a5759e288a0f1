//! # Spec Validation
//!
//! Rules shared by the validating webhook and the reconciler. The webhook
//! rejects a bad resource outright; the reconciler reports it as
//! `UpToDate=False, reason=InvalidSpec` and leaves workloads alone.

use crate::crd::{AuthProxyWorkload, InstanceSpec, SocketType, WorkloadSelectorSpec};
use crate::workload::selector::parse_label_selector;
use crate::workload::WorkloadKind;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;

/// One failed rule, addressed by its JSON path in the resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl std::error::Error for ValidationError {}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        write!(f, "invalid AuthProxyWorkload: {}", messages.join("; "))
    }
}

#[derive(Default)]
struct Collector {
    errors: Vec<FieldError>,
}

impl Collector {
    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    fn finish(self) -> Result<(), ValidationError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { errors: self.errors })
        }
    }
}

fn compile(pattern: &str, out: &mut Collector) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            out.push("<internal>", format!("failed to compile pattern {pattern}: {e}"));
            None
        }
    }
}

/// Validate a resource on its own (create, and every reconcile)
pub fn validate(resource: &AuthProxyWorkload) -> Result<(), ValidationError> {
    let mut out = Collector::default();
    validate_selector(&resource.spec.workload_selector, resource.namespace(), &mut out);
    validate_instances(&resource.spec.instances, &mut out);

    if let Some(secret) = resource
        .spec
        .authentication
        .as_ref()
        .and_then(|a| a.credentials_file_secret.as_ref())
    {
        if secret.name.trim().is_empty() {
            out.push("spec.authentication.credentialsFileSecret.name", "must not be empty");
        }
        if secret.key.trim().is_empty() {
            out.push("spec.authentication.credentialsFileSecret.key", "must not be empty");
        }
    }

    if let Some(container) = &resource.spec.auth_proxy_container {
        if container.max_connections.is_some_and(|v| v < 0) {
            out.push("spec.authProxyContainer.maxConnections", "must not be negative");
        }
        if container.max_sigterm_delay.is_some_and(|v| v < 0) {
            out.push("spec.authProxyContainer.maxSigtermDelay", "must not be negative");
        }
        if let Some(telemetry) = &container.telemetry {
            if telemetry.telemetry_sample_rate.is_some_and(|v| v < 0) {
                out.push(
                    "spec.authProxyContainer.telemetry.telemetrySampleRate",
                    "must not be negative",
                );
            }
            if let Some(port) = telemetry.http_port {
                check_port(port, "spec.authProxyContainer.telemetry.httpPort", &mut out);
            }
        }
        if let Some(admin) = &container.admin_server {
            check_port(admin.port, "spec.authProxyContainer.adminServer.port", &mut out);
        }
    }

    out.finish()
}

/// Validate an update: the new object must be valid and keep its workload selector
pub fn validate_update(
    old: &AuthProxyWorkload,
    new: &AuthProxyWorkload,
) -> Result<(), ValidationError> {
    let mut errors = validate(new).err().map(|e| e.errors).unwrap_or_default();
    if old.spec.workload_selector != new.spec.workload_selector {
        errors.push(FieldError {
            field: "spec.workloadSelector".to_string(),
            message: "field is immutable".to_string(),
        });
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { errors })
    }
}

fn validate_selector(
    selector: &WorkloadSelectorSpec,
    resource_namespace: &str,
    out: &mut Collector,
) {
    let kind = selector.kind.trim();
    if kind.is_empty() {
        out.push("spec.workloadSelector.kind", "must not be empty");
    } else if let Some(re) = compile(r"^[A-Za-z]+(\.[A-Za-z0-9-]+)*$", out) {
        if !re.is_match(kind) {
            out.push("spec.workloadSelector.kind", format!("'{kind}' does not look like a kind"));
        } else if kind.parse::<WorkloadKind>().is_err() {
            let supported: Vec<&str> = WorkloadKind::ALL.iter().map(|k| k.as_str()).collect();
            out.push(
                "spec.workloadSelector.kind",
                format!("unsupported kind '{kind}', expected one of {}", supported.join(", ")),
            );
        }
    }

    if let Some(namespace) = selector.namespace.as_deref().filter(|ns| !ns.is_empty()) {
        if namespace.contains('*') {
            out.push("spec.workloadSelector.namespace", "wildcards are not supported");
        } else if namespace != resource_namespace {
            out.push(
                "spec.workloadSelector.namespace",
                format!("must equal the resource namespace '{resource_namespace}'"),
            );
        }
    }

    if let Err(e) = parse_label_selector(selector) {
        out.push("spec.workloadSelector.selector", e.message);
    }
}

fn validate_instances(instances: &[InstanceSpec], out: &mut Collector) {
    if instances.is_empty() {
        out.push("spec.instances", "at least one instance is required");
        return;
    }
    let connection_re = compile(r"^[^:\s]+:[^:\s]+:[^:\s]+$", out);
    let env_re = compile(r"^[A-Za-z_][A-Za-z0-9_]*$", out);
    let mut env_names = BTreeSet::new();

    for (i, instance) in instances.iter().enumerate() {
        let field = |name: &str| format!("spec.instances[{i}].{name}");

        if connection_re
            .as_ref()
            .is_some_and(|re| !re.is_match(&instance.connection_string))
        {
            out.push(
                field("connectionString"),
                format!(
                    "'{}' is not of the form project:region:instance",
                    instance.connection_string
                ),
            );
        }

        match instance.socket_type() {
            SocketType::Unix => {
                if instance.unix_socket_path.as_deref().is_none_or(str::is_empty) {
                    out.push(field("unixSocketPath"), "required when socketType is unix");
                }
                if instance.port.is_some() {
                    out.push(field("port"), "not allowed when socketType is unix");
                }
            }
            SocketType::Tcp => {
                if instance.unix_socket_path.is_some() {
                    out.push(field("unixSocketPath"), "not allowed when socketType is tcp");
                }
                if let Some(port) = instance.port {
                    check_port(port, &field("port"), out);
                }
            }
        }

        for (key, value) in [
            ("portEnvName", &instance.port_env_name),
            ("hostEnvName", &instance.host_env_name),
            ("unixSocketPathEnvName", &instance.unix_socket_path_env_name),
        ] {
            let Some(name) = value else { continue };
            if env_re.as_ref().is_some_and(|re| !re.is_match(name)) {
                out.push(field(key), format!("'{name}' is not a valid environment variable name"));
            } else if !env_names.insert(name.clone()) {
                out.push(field(key), format!("environment variable '{name}' is already used"));
            }
        }
    }
}

fn check_port(port: i32, field: &str, out: &mut Collector) {
    if !(1..=65535).contains(&port) {
        out.push(field, format!("port {port} is outside 1-65535"));
    }
}
