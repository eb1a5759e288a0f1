//! # Cloud SQL Proxy Operator
//!
//! Kubernetes operator that attaches Cloud SQL Auth Proxy sidecars to
//! workloads.
//!
//! - **Controller**: reconciles `AuthProxyWorkload` resources, rolls out
//!   Deployments, StatefulSets, DaemonSets and CronJobs whose proxy
//!   configuration is stale and reports progress in the resource status
//! - **Admission webhook**: mutates new workloads before they are stored and
//!   validates `AuthProxyWorkload` resources
//! - **Probes and metrics**: `/healthz`, `/readyz` and `/metrics` on `METRICS_PORT`

use anyhow::Result;
use cloudsql_proxy_operator::runtime::{initialization::initialize, watch_loop::run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    run_watch_loop(
        init.resources_api,
        init.reconciler,
        init.server_state,
        init.controller_config,
    )
    .await
}
