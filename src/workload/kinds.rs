//! # Workload Kinds
//!
//! A closed view over the six workload kinds the operator can attach a proxy
//! to. Each variant exposes its pod template (spec and metadata) through the
//! same pair of accessors, hiding where each kind nests its template.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    #[error(
        "unknown workload kind {0:?}, \
         expected one of Deployment, StatefulSet, DaemonSet, Job, CronJob, Pod"
    )]
    UnknownKind(String),
    #[error("failed to decode {kind} object: {source}")]
    Decode {
        kind: WorkloadKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode {kind} object: {source}")]
    Encode {
        kind: WorkloadKind,
        #[source]
        source: serde_json::Error,
    },
}

/// The fixed set of kinds a workload selector may name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
    Pod,
}

impl WorkloadKind {
    pub const ALL: [WorkloadKind; 6] = [
        WorkloadKind::Deployment,
        WorkloadKind::StatefulSet,
        WorkloadKind::DaemonSet,
        WorkloadKind::Job,
        WorkloadKind::CronJob,
        WorkloadKind::Pod,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::Job => "Job",
            WorkloadKind::CronJob => "CronJob",
            WorkloadKind::Pod => "Pod",
        }
    }

    /// Whether changing the stored pod template makes Kubernetes replace running pods.
    ///
    /// Jobs and Pods have immutable pod specs; they only pick up proxy changes
    /// when they are recreated and pass through the admission webhook.
    #[must_use]
    pub fn supports_template_update(self) -> bool {
        matches!(
            self,
            WorkloadKind::Deployment
                | WorkloadKind::StatefulSet
                | WorkloadKind::DaemonSet
                | WorkloadKind::CronJob
        )
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = WorkloadError;

    /// Accepts a bare kind or a versioned one such as `Deployment.v1.apps`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = s.split('.').next().unwrap_or_default();
        WorkloadKind::ALL
            .into_iter()
            .find(|k| k.as_str() == kind)
            .ok_or_else(|| WorkloadError::UnknownKind(s.to_string()))
    }
}

/// A workload object of one of the supported kinds
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    Deployment(Deployment),
    StatefulSet(StatefulSet),
    DaemonSet(DaemonSet),
    Job(Job),
    CronJob(CronJob),
    Pod(Pod),
}

impl Workload {
    #[must_use]
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Workload::Deployment(_) => WorkloadKind::Deployment,
            Workload::StatefulSet(_) => WorkloadKind::StatefulSet,
            Workload::DaemonSet(_) => WorkloadKind::DaemonSet,
            Workload::Job(_) => WorkloadKind::Job,
            Workload::CronJob(_) => WorkloadKind::CronJob,
            Workload::Pod(_) => WorkloadKind::Pod,
        }
    }

    /// Object metadata of the workload itself
    #[must_use]
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Workload::Deployment(o) => &o.metadata,
            Workload::StatefulSet(o) => &o.metadata,
            Workload::DaemonSet(o) => &o.metadata,
            Workload::Job(o) => &o.metadata,
            Workload::CronJob(o) => &o.metadata,
            Workload::Pod(o) => &o.metadata,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    /// Labels of the workload object, used for selector matching
    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.meta().labels.clone().unwrap_or_default()
    }

    /// Whether another controller owns this object
    #[must_use]
    pub fn has_owner(&self) -> bool {
        self.meta()
            .owner_references
            .as_ref()
            .is_some_and(|refs| !refs.is_empty())
    }

    /// The pod template: spec plus template metadata.
    ///
    /// For a Pod the template metadata is the Pod's own metadata.
    #[must_use]
    pub fn pod_template(&self) -> PodTemplateSpec {
        match self {
            Workload::Deployment(o) => {
                o.spec.as_ref().map(|s| s.template.clone()).unwrap_or_default()
            }
            Workload::StatefulSet(o) => {
                o.spec.as_ref().map(|s| s.template.clone()).unwrap_or_default()
            }
            Workload::DaemonSet(o) => {
                o.spec.as_ref().map(|s| s.template.clone()).unwrap_or_default()
            }
            Workload::Job(o) => o.spec.as_ref().map(|s| s.template.clone()).unwrap_or_default(),
            Workload::CronJob(o) => o
                .spec
                .as_ref()
                .and_then(|s| s.job_template.spec.as_ref())
                .map(|s| s.template.clone())
                .unwrap_or_default(),
            Workload::Pod(o) => PodTemplateSpec {
                metadata: Some(o.metadata.clone()),
                spec: o.spec.clone(),
            },
        }
    }

    /// Replace the pod template.
    ///
    /// For a Pod only the labels and annotations of the template metadata are
    /// copied back; identity fields of the Pod are never touched.
    pub fn set_pod_template(&mut self, template: PodTemplateSpec) {
        match self {
            Workload::Deployment(o) => {
                o.spec.get_or_insert_with(Default::default).template = template;
            }
            Workload::StatefulSet(o) => {
                o.spec.get_or_insert_with(Default::default).template = template;
            }
            Workload::DaemonSet(o) => {
                o.spec.get_or_insert_with(Default::default).template = template;
            }
            Workload::Job(o) => o.spec.get_or_insert_with(Default::default).template = template,
            Workload::CronJob(o) => {
                o.spec
                    .get_or_insert_with(Default::default)
                    .job_template
                    .spec
                    .get_or_insert_with(Default::default)
                    .template = template;
            }
            Workload::Pod(o) => {
                let meta = template.metadata.unwrap_or_default();
                o.metadata.labels = meta.labels;
                o.metadata.annotations = meta.annotations;
                o.spec = template.spec;
            }
        }
    }

    /// Annotations on the pod template metadata
    #[must_use]
    pub fn template_annotations(&self) -> BTreeMap<String, String> {
        self.pod_template()
            .metadata
            .and_then(|m| m.annotations)
            .unwrap_or_default()
    }

    /// Replace the pod template annotations, leaving the rest of the template intact
    pub fn set_template_annotations(&mut self, annotations: BTreeMap<String, String>) {
        let mut template = self.pod_template();
        let meta = template.metadata.get_or_insert_with(Default::default);
        meta.annotations = if annotations.is_empty() {
            None
        } else {
            Some(annotations)
        };
        self.set_pod_template(template);
    }

    /// Decode a raw object of the given kind
    pub fn from_value(kind: WorkloadKind, value: Value) -> Result<Self, WorkloadError> {
        fn decode<T: serde::de::DeserializeOwned>(
            kind: WorkloadKind,
            value: Value,
        ) -> Result<T, WorkloadError> {
            serde_json::from_value(value).map_err(|source| WorkloadError::Decode { kind, source })
        }
        Ok(match kind {
            WorkloadKind::Deployment => Workload::Deployment(decode(kind, value)?),
            WorkloadKind::StatefulSet => Workload::StatefulSet(decode(kind, value)?),
            WorkloadKind::DaemonSet => Workload::DaemonSet(decode(kind, value)?),
            WorkloadKind::Job => Workload::Job(decode(kind, value)?),
            WorkloadKind::CronJob => Workload::CronJob(decode(kind, value)?),
            WorkloadKind::Pod => Workload::Pod(decode(kind, value)?),
        })
    }

    /// Encode the workload back into a raw object
    pub fn to_value(&self) -> Result<Value, WorkloadError> {
        let kind = self.kind();
        let result = match self {
            Workload::Deployment(o) => serde_json::to_value(o),
            Workload::StatefulSet(o) => serde_json::to_value(o),
            Workload::DaemonSet(o) => serde_json::to_value(o),
            Workload::Job(o) => serde_json::to_value(o),
            Workload::CronJob(o) => serde_json::to_value(o),
            Workload::Pod(o) => serde_json::to_value(o),
        };
        result.map_err(|source| WorkloadError::Encode { kind, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec};
    use serde_json::json;

    fn template_with(container: &str) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                annotations: Some(BTreeMap::from([("a".to_string(), "b".to_string())])),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: container.to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_kind_parsing_accepts_versioned_kinds() {
        let parse = |raw: &str| raw.parse::<WorkloadKind>().ok();
        assert_eq!(parse("Deployment"), Some(WorkloadKind::Deployment));
        assert_eq!(parse("Deployment.v1.apps"), Some(WorkloadKind::Deployment));
        assert_eq!(parse("CronJob.v1.batch"), Some(WorkloadKind::CronJob));
    }

    #[test]
    fn test_unknown_kind_is_descriptive() {
        let err = "ReplicaSet".parse::<WorkloadKind>().err().map(|e| e.to_string());
        assert!(err.is_some_and(|e| e.contains("ReplicaSet") && e.contains("Deployment")));
        assert!("deployment".parse::<WorkloadKind>().is_err());
    }

    #[test]
    fn test_template_update_support() {
        assert!(WorkloadKind::Deployment.supports_template_update());
        assert!(WorkloadKind::CronJob.supports_template_update());
        assert!(!WorkloadKind::Job.supports_template_update());
        assert!(!WorkloadKind::Pod.supports_template_update());
    }

    #[test]
    fn test_template_roundtrip_for_every_kind() {
        for kind in WorkloadKind::ALL {
            let raw = json!({"metadata": {"name": "w", "namespace": "ns"}});
            let mut workload = match Workload::from_value(kind, raw) {
                Ok(w) => w,
                Err(e) => panic!("decode {kind}: {e}"),
            };
            workload.set_pod_template(template_with("app"));
            let template = workload.pod_template();
            let names: Vec<_> = template
                .spec
                .map(|s| s.containers.into_iter().map(|c| c.name).collect())
                .unwrap_or_default();
            assert_eq!(names, vec!["app".to_string()], "kind {kind}");
            assert_eq!(workload.template_annotations().get("a").map(String::as_str), Some("b"));
            assert_eq!(workload.name(), "w");
        }
    }

    #[test]
    fn test_cronjob_template_nesting() {
        let raw = json!({
            "metadata": {"name": "nightly", "namespace": "ns"},
            "spec": {
                "schedule": "0 0 * * *",
                "jobTemplate": {
                    "spec": {"template": {"spec": {"containers": [{"name": "job"}]}}}
                }
            }
        });
        let workload = Workload::from_value(WorkloadKind::CronJob, raw).ok();
        let containers = workload
            .and_then(|w| w.pod_template().spec)
            .map(|s| s.containers.len());
        assert_eq!(containers, Some(1));
    }

    #[test]
    fn test_pod_template_keeps_pod_identity() {
        let raw = json!({"metadata": {"name": "p", "namespace": "ns", "uid": "123"}});
        let Ok(mut pod) = Workload::from_value(WorkloadKind::Pod, raw) else {
            panic!("pod should decode");
        };
        let mut template = template_with("app");
        if let Some(meta) = template.metadata.as_mut() {
            meta.name = Some("other".to_string());
        }
        pod.set_pod_template(template);
        assert_eq!(pod.name(), "p");
        assert_eq!(pod.meta().uid.as_deref(), Some("123"));
    }

    #[test]
    fn test_owner_detection() {
        let raw = json!({"metadata": {
            "name": "p",
            "ownerReferences": [
                {"apiVersion": "apps/v1", "kind": "ReplicaSet", "name": "rs", "uid": "1"}
            ]
        }});
        let pod = Workload::from_value(WorkloadKind::Pod, raw).ok();
        assert!(pod.is_some_and(|p| p.has_owner()));
    }
}
