//! Typed list/get/replace for each workload kind.
//!
//! One generic helper per operation, dispatched by kind, so callers only ever
//! see [`Workload`]. [`WorkloadApi`] bundles the three operations so the
//! rollout logic can run against something other than a live cluster.

use super::kinds::{Workload, WorkloadKind};
use crate::constants::FIELD_MANAGER;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::future::Future;

trait NamespacedObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
{
}

impl<K> NamespacedObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
{
}

async fn list_typed<K: NamespacedObject>(
    client: Client,
    namespace: &str,
    wrap: fn(K) -> Workload,
) -> Result<Vec<Workload>, kube::Error> {
    let api: Api<K> = Api::namespaced(client, namespace);
    let list = api.list(&ListParams::default()).await?;
    Ok(list.items.into_iter().map(wrap).collect())
}

async fn get_typed<K: NamespacedObject>(
    client: Client,
    namespace: &str,
    name: &str,
    wrap: fn(K) -> Workload,
) -> Result<Option<Workload>, kube::Error> {
    let api: Api<K> = Api::namespaced(client, namespace);
    Ok(api.get_opt(name).await?.map(wrap))
}

async fn replace_typed<K: NamespacedObject>(
    client: Client,
    object: &K,
    wrap: fn(K) -> Workload,
) -> Result<Workload, kube::Error> {
    let meta = object.meta();
    let namespace = meta.namespace.as_deref().unwrap_or_default();
    let name = meta.name.as_deref().unwrap_or_default();
    let api: Api<K> = Api::namespaced(client, namespace);
    let params = PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..PostParams::default()
    };
    Ok(wrap(api.replace(name, &params, object).await?))
}

/// List every workload of `kind` in `namespace`
pub async fn list(
    client: Client,
    kind: WorkloadKind,
    namespace: &str,
) -> Result<Vec<Workload>, kube::Error> {
    match kind {
        WorkloadKind::Deployment => {
            list_typed::<Deployment>(client, namespace, Workload::Deployment).await
        }
        WorkloadKind::StatefulSet => {
            list_typed::<StatefulSet>(client, namespace, Workload::StatefulSet).await
        }
        WorkloadKind::DaemonSet => {
            list_typed::<DaemonSet>(client, namespace, Workload::DaemonSet).await
        }
        WorkloadKind::Job => list_typed::<Job>(client, namespace, Workload::Job).await,
        WorkloadKind::CronJob => list_typed::<CronJob>(client, namespace, Workload::CronJob).await,
        WorkloadKind::Pod => list_typed::<Pod>(client, namespace, Workload::Pod).await,
    }
}

/// Fetch a single workload, `None` when it no longer exists
pub async fn get(
    client: Client,
    kind: WorkloadKind,
    namespace: &str,
    name: &str,
) -> Result<Option<Workload>, kube::Error> {
    match kind {
        WorkloadKind::Deployment => {
            get_typed::<Deployment>(client, namespace, name, Workload::Deployment).await
        }
        WorkloadKind::StatefulSet => {
            get_typed::<StatefulSet>(client, namespace, name, Workload::StatefulSet).await
        }
        WorkloadKind::DaemonSet => {
            get_typed::<DaemonSet>(client, namespace, name, Workload::DaemonSet).await
        }
        WorkloadKind::Job => get_typed::<Job>(client, namespace, name, Workload::Job).await,
        WorkloadKind::CronJob => {
            get_typed::<CronJob>(client, namespace, name, Workload::CronJob).await
        }
        WorkloadKind::Pod => get_typed::<Pod>(client, namespace, name, Workload::Pod).await,
    }
}

/// Replace the stored object.
///
/// The object's `resourceVersion` is sent along, so a concurrent write makes
/// the API server answer 409 Conflict instead of silently overwriting it.
pub async fn replace(client: Client, workload: &Workload) -> Result<Workload, kube::Error> {
    match workload {
        Workload::Deployment(o) => replace_typed(client, o, Workload::Deployment).await,
        Workload::StatefulSet(o) => replace_typed(client, o, Workload::StatefulSet).await,
        Workload::DaemonSet(o) => replace_typed(client, o, Workload::DaemonSet).await,
        Workload::Job(o) => replace_typed(client, o, Workload::Job).await,
        Workload::CronJob(o) => replace_typed(client, o, Workload::CronJob).await,
        Workload::Pod(o) => replace_typed(client, o, Workload::Pod).await,
    }
}

/// Whether a client error is an optimistic-concurrency conflict
#[must_use]
pub fn is_conflict(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 409)
}

/// Workload reads and writes used by a reconcile pass
pub trait WorkloadApi {
    fn list(
        &self,
        kind: WorkloadKind,
        namespace: &str,
    ) -> impl Future<Output = Result<Vec<Workload>, kube::Error>> + Send;

    fn get(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<Workload>, kube::Error>> + Send;

    fn replace(
        &self,
        workload: &Workload,
    ) -> impl Future<Output = Result<Workload, kube::Error>> + Send;
}

impl WorkloadApi for Client {
    async fn list(
        &self,
        kind: WorkloadKind,
        namespace: &str,
    ) -> Result<Vec<Workload>, kube::Error> {
        list(self.clone(), kind, namespace).await
    }

    async fn get(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Workload>, kube::Error> {
        get(self.clone(), kind, namespace, name).await
    }

    async fn replace(&self, workload: &Workload) -> Result<Workload, kube::Error> {
        replace(self.clone(), workload).await
    }
}
