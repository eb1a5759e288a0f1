//! # Rollout
//!
//! Writes planned workloads with resource-version guarded replaces. On a 409
//! the workload is re-fetched and the plan recomputed against the fresh
//! object, since the desired template depends on what is stored.

use super::plan::{self, Relation};
use super::types::ReconcilerError;
use crate::crd::AuthProxyWorkload;
use crate::observability::metrics;
use crate::workload::client::{self, WorkloadApi};
use crate::workload::{ProxyDefaults, Workload, WorkloadKind};
use tracing::{debug, info, warn};

/// Result of a guarded write
#[derive(Debug)]
pub enum WriteOutcome {
    /// The plan asked for no change
    Unchanged(Workload),
    /// The workload was replaced; holds the stored object
    Written(Workload),
    /// The workload disappeared while retrying
    Gone,
}

/// Plan and write `workload`, retrying on conflict up to `attempts` times.
///
/// `plan` receives the latest stored object and returns the desired object
/// when a write is needed.
pub async fn write_with_retry<A, F>(
    api: &A,
    workload: Workload,
    attempts: u32,
    mut plan: F,
) -> Result<WriteOutcome, ReconcilerError>
where
    A: WorkloadApi,
    F: FnMut(&Workload) -> Result<Option<Workload>, ReconcilerError>,
{
    let attempts = attempts.max(1);
    let mut current = workload;

    for attempt in 1..=attempts {
        let Some(desired) = plan(&current)? else {
            return Ok(WriteOutcome::Unchanged(current));
        };

        match api.replace(&desired).await {
            Ok(stored) => {
                info!(
                    workload.kind = %stored.kind(),
                    workload.namespace = stored.namespace(),
                    workload.name = stored.name(),
                    attempt,
                    "workload.updated"
                );
                metrics::increment_workload_updates(stored.kind().as_str());
                return Ok(WriteOutcome::Written(stored));
            }
            Err(e) if client::is_conflict(&e) => {
                metrics::increment_update_conflicts();
                warn!(
                    workload.kind = %current.kind(),
                    workload.namespace = current.namespace(),
                    workload.name = current.name(),
                    attempt,
                    attempts,
                    "workload.update_conflict, re-fetching"
                );
                if attempt == attempts {
                    break;
                }
                let fresh = api
                    .get(current.kind(), current.namespace(), current.name())
                    .await?;
                match fresh {
                    Some(fresh) => current = fresh,
                    None => {
                        debug!(workload.name = current.name(), "workload.gone");
                        return Ok(WriteOutcome::Gone);
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(ReconcilerError::ConflictRetriesExhausted {
        kind: current.kind(),
        namespace: current.namespace().to_string(),
        name: current.name().to_string(),
        attempts,
    })
}

/// Strip the artifacts of `resource` from every template workload in its namespace.
///
/// `remaining` holds the other live resources of the namespace; their
/// proxies stay in place. Returns how many workloads were rewritten.
pub async fn prune_resource<A: WorkloadApi>(
    api: &A,
    resource: &AuthProxyWorkload,
    remaining: &[AuthProxyWorkload],
    defaults: &ProxyDefaults,
    attempts: u32,
) -> Result<usize, ReconcilerError> {
    let mut pruned = 0;
    for kind in WorkloadKind::ALL
        .into_iter()
        .filter(|k| k.supports_template_update())
    {
        for workload in api.list(kind, resource.namespace()).await? {
            if plan::relation(resource, &workload) == Relation::Unrelated {
                continue;
            }
            let outcome = write_with_retry(api, workload, attempts, |current| {
                Ok(plan::plan_prune(remaining, current, defaults)?)
            })
            .await?;
            if let WriteOutcome::Written(w) = outcome {
                info!(
                    workload.kind = %w.kind(),
                    workload.name = w.name(),
                    "reconcile.cleanup.pruned"
                );
                pruned += 1;
            }
        }
    }
    Ok(pruned)
}
