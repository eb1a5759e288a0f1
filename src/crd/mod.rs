//! # Custom Resource Definitions
//!
//! CRD types for the Cloud SQL proxy operator.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `AuthProxyWorkload` specification, selector and proxy settings
//! - `status.rs` - Status types reporting per-workload rollout state

mod spec;
mod status;

pub use spec::{
    AdminApi, AdminServerSpec, AuthProxyContainerSpec, AuthProxyWorkload, AuthProxyWorkloadSpec,
    AuthenticationSpec, CredentialsFileSecret, InstanceSpec, RolloutStrategy, SocketType,
    TelemetrySpec, WorkloadSelectorSpec,
};
pub use status::{
    AuthProxyWorkloadStatus, Condition, WorkloadStatus, CONDITION_UP_TO_DATE,
    REASON_FINISHED_RECONCILE, REASON_INVALID_SPEC, REASON_NO_WORKLOADS_FOUND,
    REASON_UP_TO_DATE, REASON_WORKLOAD_NEEDS_UPDATE,
};

impl AuthProxyWorkload {
    /// Name of the resource, empty when unset
    #[must_use]
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Namespace of the resource, empty when unset
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Current `.metadata.generation`, zero when unset
    #[must_use]
    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }

    /// Whether the resource is being deleted and must be treated as absent
    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the controller should roll out template changes for this resource
    #[must_use]
    pub fn rollout_enabled(&self) -> bool {
        self.spec
            .auth_proxy_container
            .as_ref()
            .and_then(|c| c.rollout_strategy)
            .unwrap_or_default()
            == RolloutStrategy::Workload
    }
}
