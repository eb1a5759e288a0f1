//! # Reconcile
//!
//! Entry point for one `AuthProxyWorkload` reconcile event. The finalizer
//! splits events into `Apply` (match, mark, roll out, report) and `Cleanup`
//! (strip the resource's artifacts from every workload before the object is
//! released for deletion).

use super::plan::{self, Relation};
use super::rollout::{prune_resource, write_with_retry, WriteOutcome};
use super::status::{compute_status, invalid_status, patch_status, ObservedWorkload};
use super::types::{Reconciler, ReconcilerError};
use super::validation;
use crate::constants::FINALIZER_NAME;
use crate::crd::AuthProxyWorkload;
use crate::observability::metrics;
use crate::workload::{client, ProxyDefaults, WorkloadKind};
use anyhow::anyhow;
use kube::Api;
use kube_runtime::controller::Action;
use kube_runtime::finalizer::{finalizer, Event as Finalizer};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Snapshot of the configuration values one reconcile needs
struct Settings {
    defaults: ProxyDefaults,
    conflict_retry_attempts: u32,
    pending_requeue: std::time::Duration,
}

async fn settings(ctx: &Reconciler) -> Settings {
    let config = ctx.config.read().await;
    Settings {
        defaults: ProxyDefaults {
            image: config.default_proxy_image.clone(),
        },
        conflict_retry_attempts: config.conflict_retry_attempts,
        pending_requeue: config.pending_requeue_duration(),
    }
}

/// Reconcile one resource
pub async fn reconcile(
    resource: Arc<AuthProxyWorkload>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = resource.name().to_string();
    let namespace = resource.namespace().to_string();
    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.reconcile",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        resource.generation = resource.generation(),
    );

    async move {
        let start = Instant::now();
        metrics::increment_reconciliations();

        let api: Api<AuthProxyWorkload> = Api::namespaced(ctx.client.clone(), &namespace);
        let result = finalizer(&api, FINALIZER_NAME, resource, |event| async {
            match event {
                Finalizer::Apply(r) => apply(r, ctx.clone()).await,
                Finalizer::Cleanup(r) => cleanup(r, ctx.clone()).await,
            }
        })
        .await
        .map_err(|e| ReconcilerError::Finalizer(Box::new(e)));

        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
        if result.is_ok() {
            ctx.reset_backoff(&backoff_key(&namespace, &name));
        }
        result
    }
    .instrument(span)
    .await
}

async fn apply(
    resource: Arc<AuthProxyWorkload>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let settings = settings(&ctx).await;
    let now = chrono::Utc::now().to_rfc3339();

    if let Err(e) = validation::validate(&resource) {
        warn!(error = %e, "reconcile.invalid_spec");
        let status = invalid_status(&resource, &e.to_string(), &now);
        patch_status(&ctx.client, &resource, &status).await?;
        return Ok(Action::await_change());
    }

    let kind: WorkloadKind = resource
        .spec
        .workload_selector
        .kind
        .parse()
        .map_err(|e| anyhow!("workload selector kind: {e}"))?;
    let resources = ctx.resources_with(&resource);
    let workloads = client::list(ctx.client.clone(), kind, resource.namespace()).await?;

    let mut observed = Vec::new();
    for workload in workloads {
        match plan::relation(&resource, &workload) {
            Relation::Matched => {
                let mut generation = None;
                let attempts = settings.conflict_retry_attempts;
                let outcome = write_with_retry(&ctx.client, workload, attempts, |current| {
                    let plan =
                        plan::plan_matched(&resource, &resources, current, &settings.defaults)?;
                    generation = Some(plan.generation);
                    Ok(plan.write.then_some(plan.workload))
                })
                .await?;
                if let (WriteOutcome::Written(w) | WriteOutcome::Unchanged(w), Some(g)) =
                    (outcome, generation)
                {
                    observed.push(ObservedWorkload::new(&w, g));
                }
            }
            Relation::Stale => {
                debug!(workload.name = workload.name(), "reconcile.prune_stale_workload");
                let attempts = settings.conflict_retry_attempts;
                write_with_retry(&ctx.client, workload, attempts, |current| {
                    Ok(plan::plan_prune(&resources, current, &settings.defaults)?)
                })
                .await?;
            }
            Relation::Unrelated => {}
        }
    }

    metrics::set_matched_workloads(observed.len());
    let status = compute_status(&resource, &observed, &now);
    let pending = status.up_to_date().is_some_and(|c| !c.is_true());
    if patch_status(&ctx.client, &resource, &status).await? {
        info!(
            matched = observed.len(),
            up_to_date = !pending,
            "reconcile.status_updated"
        );
    }

    if pending {
        metrics::increment_requeues_total("pending-rollout");
        Ok(Action::requeue(settings.pending_requeue))
    } else {
        Ok(Action::await_change())
    }
}

async fn cleanup(
    resource: Arc<AuthProxyWorkload>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let settings = settings(&ctx).await;
    let remaining = ctx.resources_without(resource.namespace(), resource.name());
    info!(remaining = remaining.len(), "reconcile.cleanup");

    let pruned = prune_resource(
        &ctx.client,
        &resource,
        &remaining,
        &settings.defaults,
        settings.conflict_retry_attempts,
    )
    .await?;
    debug!(pruned, "reconcile.cleanup.finished");

    ctx.forget_backoff(&backoff_key(resource.namespace(), resource.name()));
    Ok(Action::await_change())
}

fn backoff_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}
