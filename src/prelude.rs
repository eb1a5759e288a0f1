//! # Prelude
//!
//! Re-exports commonly used types for convenience.
//!
//! ```rust
//! use cloudsql_proxy_operator::prelude::*;
//! ```

pub use crate::crd::*;

pub use crate::controller::reconciler::{reconcile, BackoffState, Reconciler, ReconcilerError};

pub use crate::config::{ControllerConfig, ServerConfig, SharedControllerConfig, SharedServerConfig};

pub use crate::workload::{
    apply_proxies, generation_status, mark_needs_update, mark_updated, matches, GenerationStatus,
    MutationError, MutationOutcome, ProxyDefaults, Workload, WorkloadError, WorkloadKind,
};

pub use crate::webhook::{WebhookError, WebhookState};
