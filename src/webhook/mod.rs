//! # Admission Webhook
//!
//! HTTPS endpoints called by the API server:
//!
//! - `POST /mutate/workloads` - injects proxy containers into new workloads
//! - `POST /validate/authproxyworkloads` - rejects invalid `AuthProxyWorkload`s
//!
//! Both handlers are synchronous with respect to the cluster: the mutating
//! one reads resources from the shared reflector cache and never writes.

mod mutate;
mod validate;

pub use mutate::{mutate_handler, mutate_review};
pub use validate::{validate_handler, validate_review};

use crate::crd::AuthProxyWorkload;
use crate::workload::{MutationError, ProxyDefaults, SelectorError, WorkloadError};
use anyhow::Context;
use axum::{routing::post, Router};
use axum_server::tls_rustls::RustlsConfig;
use kube_runtime::reflector::Store;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state of the webhook handlers
#[derive(Clone, Debug)]
pub struct WebhookState {
    pub resources: Store<AuthProxyWorkload>,
    pub defaults: ProxyDefaults,
}

/// Reasons an admission request is denied
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("invalid admission review: {0}")]
    InvalidReview(String),

    #[error(transparent)]
    Workload(#[from] WorkloadError),

    #[error("AuthProxyWorkload {resource} cannot be evaluated: {source}")]
    Selector {
        resource: String,
        #[source]
        source: SelectorError,
    },

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error("failed to build patch: {0}")]
    Patch(String),
}

/// Router serving both admission endpoints
pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate/workloads", post(mutate_handler))
        .route("/validate/authproxyworkloads", post(validate_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the webhook over TLS until the server fails
pub async fn start_webhook_server(
    port: u16,
    cert: &Path,
    key: &Path,
    state: Arc<WebhookState>,
) -> Result<(), anyhow::Error> {
    let tls_config = RustlsConfig::from_pem_file(cert, key)
        .await
        .with_context(|| format!("Failed to load webhook certificate from {}", cert.display()))?;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Admission webhook listening on https://{}", addr);
    axum_server::bind_rustls(addr, tls_config)
        .serve(router(state).into_make_service())
        .await
        .context("Webhook server failed")?;
    Ok(())
}
