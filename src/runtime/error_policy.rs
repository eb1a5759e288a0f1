//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//! This module handles reconciliation errors and watch stream errors.

use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::AuthProxyWorkload;
use crate::observability::metrics;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

/// Handle reconciliation errors with a per-resource Fibonacci backoff
pub fn handle_reconciliation_error(
    obj: Arc<AuthProxyWorkload>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.name();
    let namespace = obj.namespace();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = name,
        resource.namespace = namespace,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}/{}: {:?}", namespace, name, error);
    metrics::increment_reconciliation_errors();

    let resource_key = format!("{namespace}/{name}");
    let (delay, error_count) = match ctx.backoff_states.record_error(&resource_key) {
        Some((seconds, count)) => (Duration::from_secs(seconds), count),
        None => {
            warn!("Failed to lock backoff states, using configured error requeue");
            let fallback = ctx
                .config
                .try_read()
                .map(|c| c.reconciliation_error_requeue_duration())
                .unwrap_or(Duration::from_secs(
                    crate::constants::DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS,
                ));
            (fallback, 0)
        }
    };

    info!(
        backoff_secs = delay.as_secs(),
        error_count, "Retrying with Fibonacci backoff (trigger source: error-backoff)"
    );
    metrics::increment_requeues_total("error-backoff");
    Action::requeue(delay)
}

/// Watch stream failure categories, each with its own recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorClass {
    Unauthorized,
    Expired,
    Throttled,
    NotFound,
    Other,
}

/// Classify a watch error from its debug rendering.
///
/// Not-found is checked first: a plain-text 404 body surfaces as a decode
/// error that also mentions the failed watch.
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorClass {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    if (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found {
        WatchErrorClass::Unauthorized
    } else if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        WatchErrorClass::Expired
    } else if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        WatchErrorClass::Throttled
    } else if is_not_found {
        WatchErrorClass::NotFound
    } else {
        WatchErrorClass::Other
    }
}

/// Handle watch stream errors with appropriate classification and backoff
///
/// Returns `None` to filter out the error (allow restart) or `Some(())` to continue.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
    restart_delay: Duration,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    match classify_watch_error(error_string) {
        WatchErrorClass::Unauthorized => {
            error!(
                "Watch authentication failed (401 Unauthorized) - \
                 RBAC may have been revoked or token expired"
            );
            error!(
                "   Verify the operator ClusterRole still grants list/watch on \
                 authproxyworkloads and the six workload kinds:"
            );
            error!(
                "      kubectl auth can-i watch authproxyworkloads.cloudsql.cloud.google.com \
                 --as=system:serviceaccount:cloudsql-proxy-operator-system:cloudsql-proxy-operator \
                 --all-namespaces"
            );
            warn!(
                "Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                restart_delay.as_secs()
            );
            tokio::time::sleep(restart_delay).await;
            None
        }
        WatchErrorClass::Expired => {
            warn!(error_type = "410", "watch.error.resource_version_expired");
            None
        }
        WatchErrorClass::Throttled => {
            let current_backoff = backoff.load(Ordering::Relaxed);
            warn!(
                "API server storage reinitializing (429), backing off for {}ms before restart...",
                current_backoff
            );
            tokio::time::sleep(Duration::from_millis(current_backoff)).await;
            backoff.store((current_backoff * 2).min(max_backoff_ms), Ordering::Relaxed);
            None
        }
        WatchErrorClass::NotFound => {
            warn!(
                "Resource not found (404) - normal for deleted objects, \
                 or the AuthProxyWorkload CRD is missing. Error: {}",
                error_string
            );
            Some(())
        }
        WatchErrorClass::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(restart_delay).await;
            None
        }
    }
}
