//! # Watch Loop
//!
//! Controller watch loop over `AuthProxyWorkload` resources. Changes to any of
//! the six workload kinds are mapped back to the cached resources that select
//! or still track the workload, so new and relabelled workloads converge
//! without waiting for the resource itself to change.

use crate::config::SharedControllerConfig;
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::AuthProxyWorkload;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use crate::workload::annotations::is_tracked;
use crate::workload::{try_matches, Workload};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::Client;
use kube_runtime::reflector::{ObjectRef, Store};
use kube_runtime::{controller, watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Resources that select `workload` or still carry artifacts on it
#[must_use]
pub fn resources_for_workload(
    resources: &Store<AuthProxyWorkload>,
    workload: &Workload,
) -> Vec<ObjectRef<AuthProxyWorkload>> {
    if workload.has_owner() {
        return Vec::new();
    }
    resources
        .state()
        .iter()
        .filter(|r| r.namespace() == workload.namespace())
        .filter(|r| {
            try_matches(workload, &r.spec.workload_selector, r.namespace()).unwrap_or(false)
                || is_tracked(r.name(), workload)
        })
        .map(|r| ObjectRef::from_obj(r.as_ref()))
        .collect()
}

/// Mapper from a watched object of one kind to the resources to reconcile
fn mapper<K: 'static>(
    resources: &Store<AuthProxyWorkload>,
    wrap: fn(K) -> Workload,
) -> impl Fn(K) -> Vec<ObjectRef<AuthProxyWorkload>> + Send + Sync + 'static {
    let store = resources.clone();
    move |object| resources_for_workload(&store, &wrap(object))
}

fn build_controller(
    resources_api: Api<AuthProxyWorkload>,
    client: &Client,
    resources: &Store<AuthProxyWorkload>,
    concurrency: u16,
) -> Controller<AuthProxyWorkload> {
    let deployments = mapper(resources, Workload::Deployment);
    let stateful_sets = mapper(resources, Workload::StatefulSet);
    let daemon_sets = mapper(resources, Workload::DaemonSet);
    let jobs = mapper(resources, Workload::Job);
    let cron_jobs = mapper(resources, Workload::CronJob);
    let pods = mapper(resources, Workload::Pod);
    let watch_config = watcher::Config::default;

    Controller::new(resources_api, watcher::Config::default().any_semantic())
        .with_config(controller::Config::default().concurrency(concurrency))
        .watches(Api::<Deployment>::all(client.clone()), watch_config(), deployments)
        .watches(Api::<StatefulSet>::all(client.clone()), watch_config(), stateful_sets)
        .watches(Api::<DaemonSet>::all(client.clone()), watch_config(), daemon_sets)
        .watches(Api::<Job>::all(client.clone()), watch_config(), jobs)
        .watches(Api::<CronJob>::all(client.clone()), watch_config(), cron_jobs)
        .watches(Api::<Pod>::all(client.clone()), watch_config(), pods)
        .shutdown_on_signal()
}

/// Resolve on SIGINT or SIGTERM.
///
/// A handler that cannot be installed never resolves, so the other one still
/// triggers the shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

/// Run the controller watch loop
///
/// Sets up the controller, restarts it when the watch stream ends or fails
/// and exits once shutdown has been requested.
pub async fn run_watch_loop(
    resources_api: Api<AuthProxyWorkload>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    controller_config: SharedControllerConfig,
) -> Result<(), anyhow::Error> {
    let config = controller_config.read().await;
    let backoff_start_ms = config.backoff_start_ms;
    drop(config);

    let backoff_duration_ms = Arc::new(AtomicU64::new(backoff_start_ms));

    let shutdown_server_state = server_state.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_server_state.is_ready.store(false, Ordering::Relaxed);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    loop {
        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let concurrency = controller_config.read().await.max_concurrent_reconciliations;
        let backoff_clone = backoff_duration_ms.clone();
        let config_for_filter = controller_config.clone();
        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop",
            concurrency
        );
        let _watch_guard = watch_span.enter();

        info!("Starting controller watch loop...");
        let controller_future = build_controller(
            resources_api.clone(),
            &reconciler.client,
            &reconciler.resources,
            concurrency,
        )
        .run(reconcile, handle_reconciliation_error, reconciler.clone())
        .filter_map(move |x| {
            let backoff = backoff_clone.clone();
            let config_clone = config_for_filter.clone();
            async move {
                match &x {
                    Ok((object, _)) => {
                        let backoff_start = config_clone.read().await.backoff_start_ms;
                        backoff.store(backoff_start, Ordering::Relaxed);
                        debug!(resource = %object, "watch.event.reconciled");
                        Some(x)
                    }
                    Err(e) => {
                        let error_string = format!("{e:?}");
                        let config = config_clone.read().await;
                        let max_backoff = config.backoff_max_ms;
                        let restart_delay = config.watch_restart_delay_duration();
                        drop(config);
                        handle_watch_stream_error(
                            &error_string,
                            &backoff,
                            max_backoff,
                            restart_delay,
                        )
                        .await
                        .map(|()| x)
                    }
                }
            }
        })
        .for_each(|_| futures::future::ready(()));

        controller_future.await;

        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let delay = controller_config.read().await.watch_restart_delay_after_end_duration();
        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}
