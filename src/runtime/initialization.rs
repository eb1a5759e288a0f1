//! # Initialization
//!
//! Operator startup: rustls setup, tracing, metrics, the probe server, the
//! Kubernetes client, the shared `AuthProxyWorkload` cache and the webhook.

use crate::config::{create_shared_config, SharedControllerConfig, SharedServerConfig};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::AuthProxyWorkload;
use crate::observability;
use crate::webhook::{self, WebhookState};
use crate::workload::ProxyDefaults;
use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use kube::{api::Api, Client};
use kube_runtime::reflector::{self, Store};
use kube_runtime::{watcher, WatchStreamExt};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Everything the watch loop needs after startup
pub struct InitializationResult {
    pub client: Client,
    /// API for the AuthProxyWorkload CRD across all namespaces
    pub resources_api: Api<AuthProxyWorkload>,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
    pub controller_config: SharedControllerConfig,
    pub server_config: SharedServerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Initialize the operator runtime
pub async fn initialize() -> Result<InitializationResult> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let (controller_config, server_config) = create_shared_config();
    let log_format = controller_config.read().await.log_format.clone();
    observability::logging::init_tracing(&log_format);

    info!("Starting Cloud SQL Proxy Operator");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());
    let metrics_port = server_config.read().await.metrics_port;
    let server_state_clone = server_state.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(metrics_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, server_config.clone()).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let resources_api: Api<AuthProxyWorkload> = Api::all(client.clone());

    let resources = start_resource_cache(resources_api.clone());
    let startup_timeout = Duration::from_secs(server_config.read().await.startup_timeout_secs);
    match tokio::time::timeout(startup_timeout, resources.wait_until_ready()).await {
        Ok(Ok(())) => info!(
            "AuthProxyWorkload cache synced with {} resources",
            resources.state().len()
        ),
        Ok(Err(e)) => return Err(anyhow!("AuthProxyWorkload cache writer dropped: {e}")),
        Err(_) => warn!(
            "AuthProxyWorkload cache not synced within {}s, continuing (is the CRD installed?)",
            startup_timeout.as_secs()
        ),
    }

    let reconciler = Arc::new(Reconciler::new(
        client.clone(),
        resources.clone(),
        controller_config.clone(),
    ));

    start_webhook(&server_config, &controller_config, resources).await;

    info!("Operator initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        resources_api,
        reconciler,
        server_state,
        controller_config,
        server_config,
    })
}

/// Spawn the reflector feeding the shared `AuthProxyWorkload` cache
fn start_resource_cache(api: Api<AuthProxyWorkload>) -> Store<AuthProxyWorkload> {
    let (reader, writer) = reflector::store();
    let stream = reflector::reflector(writer, watcher(api, watcher::Config::default()))
        .default_backoff()
        .applied_objects();
    tokio::spawn(stream.for_each(|event| {
        if let Err(e) = event {
            warn!(error = %e, "resource_cache.watch_error");
        }
        futures::future::ready(())
    }));
    reader
}

/// Start the admission webhook when enabled and its certificate is mounted
async fn start_webhook(
    server_config: &SharedServerConfig,
    controller_config: &SharedControllerConfig,
    resources: Store<AuthProxyWorkload>,
) {
    let config = server_config.read().await.clone();
    if !config.webhook_enabled {
        info!("Admission webhook disabled (WEBHOOK_ENABLED=false)");
        return;
    }
    let cert = config.webhook_cert_path();
    let key = config.webhook_key_path();
    if !cert.exists() || !key.exists() {
        warn!(
            cert = %cert.display(),
            key = %key.display(),
            "Webhook certificate not found, admission webhook not started"
        );
        return;
    }

    let state = Arc::new(WebhookState {
        resources,
        defaults: ProxyDefaults {
            image: controller_config.read().await.default_proxy_image.clone(),
        },
    });
    tokio::spawn(async move {
        let served = webhook::start_webhook_server(config.webhook_port, &cert, &key, state).await;
        if let Err(e) = served {
            error!("Webhook server error: {:#}", e);
        }
    });
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: SharedServerConfig,
) -> Result<()> {
    let config = server_config.read().await;
    let startup_timeout = Duration::from_secs(config.startup_timeout_secs);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    drop(config);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow!("HTTP server failed to start"));
        }
        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}
