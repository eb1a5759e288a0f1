//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of the `AuthProxyWorkload` custom resource and the domain used for
/// every annotation the operator writes.
pub const API_GROUP: &str = "cloudsql.cloud.google.com";

/// Finalizer held on `AuthProxyWorkload` resources until workload cleanup completes
pub const FINALIZER_NAME: &str = "cloudsql.cloud.google.com/finalizer";

/// Field manager used for every write the operator performs
pub const FIELD_MANAGER: &str = "cloudsql-proxy-operator";

/// Reserved prefix for every container and volume the operator owns
pub const GENERATED_NAME_PREFIX: &str = "csql-";

/// Template annotation listing the `container:ENV_NAME` pairs the operator injected
pub const MANAGED_ENV_ANNOTATION: &str = "cloudsql.cloud.google.com/managed-env";

/// Maximum length of a DNS-1123 label
pub const MAX_NAME_LENGTH: usize = 63;

/// Default proxy image used when a resource does not override it
pub const DEFAULT_PROXY_IMAGE: &str = "gcr.io/cloud-sql-connectors/cloud-sql-proxy:2.14.1";

/// First port handed out to instances without an explicit port
pub const DEFAULT_FIRST_INSTANCE_PORT: i32 = 5000;

/// First port tried for the proxy health/telemetry HTTP server
pub const DEFAULT_HEALTH_CHECK_PORT: i32 = 9801;

/// Loopback address injected into `hostEnvName` variables
pub const PROXY_HOST: &str = "127.0.0.1";

/// Directory under which credentials secrets are mounted in the proxy container
pub const CREDENTIALS_MOUNT_ROOT: &str = "/csql/secrets";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTPS port for the admission webhook server
pub const DEFAULT_WEBHOOK_PORT: u16 = 9443;

/// Default directory holding `tls.crt` and `tls.key` for the webhook server
pub const DEFAULT_WEBHOOK_CERT_DIR: &str = "/tmp/k8s-webhook-server/serving-certs";

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default requeue interval for reconciliation errors (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Requeue interval while any selected workload has not applied the latest generation (seconds)
pub const DEFAULT_PENDING_REQUEUE_SECS: u64 = 30;

/// Number of attempts for a workload write that keeps hitting 409 Conflict
pub const DEFAULT_CONFLICT_RETRY_ATTEMPTS: u32 = 5;

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Default number of resources reconciled concurrently
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;
