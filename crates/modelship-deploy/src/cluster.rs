//! Control-plane contract and cluster client resolution
//!
//! Reconcilers talk to a cluster only through `ControlPlane`, which keeps
//! them testable without a real API server. `KubeControlPlane` is the
//! kube-rs implementation, and `KubeconfigResolver` turns a cluster's stored
//! kubeconfig into a cached client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use k8s_openapi::api::apps::v1::Deployment as Workload;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{ConfigMap, Event, Namespace, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use modelship_common::types::Cluster;
use modelship_common::{Error, Result};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

/// Connection timeout for clients built from stored kubeconfigs
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout for clients built from stored kubeconfigs
pub(crate) const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Operations the reconcilers and observers need from a cluster.
///
/// `get_*` returns `Ok(None)` for a missing object; `delete_*` treats a
/// missing object as already deleted.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Get a namespace
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;
    /// Create a namespace
    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace>;

    /// Get a workload
    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Option<Workload>>;
    /// Create a workload
    async fn create_workload(&self, namespace: &str, workload: &Workload) -> Result<Workload>;
    /// Replace a workload; `workload` must carry the live resourceVersion
    async fn replace_workload(&self, namespace: &str, workload: &Workload) -> Result<Workload>;
    /// List workloads matching a label selector
    async fn list_workloads(&self, namespace: &str, selector: &str) -> Result<Vec<Workload>>;

    /// Get an autoscaler
    async fn get_autoscaler(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<HorizontalPodAutoscaler>>;
    /// Create an autoscaler
    async fn create_autoscaler(
        &self,
        namespace: &str,
        autoscaler: &HorizontalPodAutoscaler,
    ) -> Result<HorizontalPodAutoscaler>;
    /// Apply a JSON merge patch to an autoscaler
    async fn patch_autoscaler(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<HorizontalPodAutoscaler>;
    /// Delete an autoscaler
    async fn delete_autoscaler(&self, namespace: &str, name: &str) -> Result<()>;

    /// Get a service
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;
    /// Create a service
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service>;
    /// Replace a service; `service` must carry the live resourceVersion
    async fn replace_service(&self, namespace: &str, service: &Service) -> Result<Service>;
    /// Delete a service
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;

    /// Get an ingress
    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>>;
    /// Create an ingress
    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<Ingress>;
    /// Replace an ingress; `ingress` must carry the live resourceVersion
    async fn replace_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<Ingress>;

    /// Get an owner-anchor object
    async fn get_anchor(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;
    /// Create an owner-anchor object
    async fn create_anchor(&self, namespace: &str, anchor: &ConfigMap) -> Result<ConfigMap>;
    /// Delete an owner-anchor object, garbage-collecting everything it owns
    async fn delete_anchor(&self, namespace: &str, name: &str) -> Result<()>;
    /// List owner-anchor objects matching a label selector
    async fn list_anchors(&self, namespace: &str, selector: &str) -> Result<Vec<ConfigMap>>;

    /// List pods matching a label selector
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>>;
    /// List events in a namespace
    async fn list_events(&self, namespace: &str) -> Result<Vec<Event>>;
}

/// `ControlPlane` over a kube-rs client
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    /// Wrap a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn object_name<K: kube::Resource>(object: &K) -> Result<String> {
    object
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::validation("object has no name"))
}

async fn get_opt<K>(api: Api<K>, name: &str) -> Result<Option<K>>
where
    K: kube::Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    match api.get(name).await {
        Ok(object) => Ok(Some(object)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn delete_tolerant<K>(api: Api<K>, name: &str) -> Result<()>
where
    K: kube::Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        get_opt(Api::all(self.client.clone()), name).await
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.create(&PostParams::default(), namespace).await?)
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Option<Workload>> {
        get_opt(self.api(namespace), name).await
    }

    async fn create_workload(&self, namespace: &str, workload: &Workload) -> Result<Workload> {
        let api: Api<Workload> = self.api(namespace);
        Ok(api.create(&PostParams::default(), workload).await?)
    }

    async fn replace_workload(&self, namespace: &str, workload: &Workload) -> Result<Workload> {
        let api: Api<Workload> = self.api(namespace);
        let name = object_name(workload)?;
        Ok(api.replace(&name, &PostParams::default(), workload).await?)
    }

    async fn list_workloads(&self, namespace: &str, selector: &str) -> Result<Vec<Workload>> {
        let api: Api<Workload> = self.api(namespace);
        let list = api.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items)
    }

    async fn get_autoscaler(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<HorizontalPodAutoscaler>> {
        get_opt(self.api(namespace), name).await
    }

    async fn create_autoscaler(
        &self,
        namespace: &str,
        autoscaler: &HorizontalPodAutoscaler,
    ) -> Result<HorizontalPodAutoscaler> {
        let api: Api<HorizontalPodAutoscaler> = self.api(namespace);
        Ok(api.create(&PostParams::default(), autoscaler).await?)
    }

    async fn patch_autoscaler(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<HorizontalPodAutoscaler> {
        let api: Api<HorizontalPodAutoscaler> = self.api(namespace);
        Ok(api
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    async fn delete_autoscaler(&self, namespace: &str, name: &str) -> Result<()> {
        delete_tolerant::<HorizontalPodAutoscaler>(self.api(namespace), name).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        get_opt(self.api(namespace), name).await
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service> {
        let api: Api<Service> = self.api(namespace);
        Ok(api.create(&PostParams::default(), service).await?)
    }

    async fn replace_service(&self, namespace: &str, service: &Service) -> Result<Service> {
        let api: Api<Service> = self.api(namespace);
        let name = object_name(service)?;
        Ok(api.replace(&name, &PostParams::default(), service).await?)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        delete_tolerant::<Service>(self.api(namespace), name).await
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>> {
        get_opt(self.api(namespace), name).await
    }

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<Ingress> {
        let api: Api<Ingress> = self.api(namespace);
        Ok(api.create(&PostParams::default(), ingress).await?)
    }

    async fn replace_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<Ingress> {
        let api: Api<Ingress> = self.api(namespace);
        let name = object_name(ingress)?;
        Ok(api.replace(&name, &PostParams::default(), ingress).await?)
    }

    async fn get_anchor(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        get_opt(self.api(namespace), name).await
    }

    async fn create_anchor(&self, namespace: &str, anchor: &ConfigMap) -> Result<ConfigMap> {
        let api: Api<ConfigMap> = self.api(namespace);
        Ok(api.create(&PostParams::default(), anchor).await?)
    }

    async fn delete_anchor(&self, namespace: &str, name: &str) -> Result<()> {
        delete_tolerant::<ConfigMap>(self.api(namespace), name).await
    }

    async fn list_anchors(&self, namespace: &str, selector: &str) -> Result<Vec<ConfigMap>> {
        let api: Api<ConfigMap> = self.api(namespace);
        let list = api.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items)
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = self.api(namespace);
        let list = api.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items)
    }

    async fn list_events(&self, namespace: &str) -> Result<Vec<Event>> {
        let api: Api<Event> = self.api(namespace);
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }
}

/// Resolves a cluster entity into clients for its control plane
#[async_trait]
pub trait ClusterResolver: Send + Sync {
    /// Raw client, used to start informers
    async fn client(&self, cluster: &Cluster) -> Result<Client>;

    /// Control plane used by the reconcilers
    async fn control_plane(&self, cluster: &Cluster) -> Result<Arc<dyn ControlPlane>>;
}

/// Builds clients from each cluster's stored kubeconfig, cached by cluster id.
///
/// Cached clients live as long as the resolver. Call `forget` after a
/// cluster's credentials change.
#[derive(Default)]
pub struct KubeconfigResolver {
    clients: DashMap<u64, Client>,
}

impl KubeconfigResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the cached client for a cluster
    pub fn forget(&self, cluster_id: u64) {
        if self.clients.remove(&cluster_id).is_some() {
            info!(cluster_id, "dropped cached cluster client");
        }
    }
}

/// Parse a stored kubeconfig into a client config.
pub async fn config_from_kubeconfig(kube_config: &str) -> Result<Config> {
    let kubeconfig = Kubeconfig::from_yaml(kube_config)
        .map_err(|e| Error::config(format!("invalid cluster kubeconfig: {}", e)))?;
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::config(format!("unusable cluster kubeconfig: {}", e)))?;
    config.connect_timeout = Some(CONNECT_TIMEOUT);
    config.read_timeout = Some(READ_TIMEOUT);
    Ok(config)
}

#[async_trait]
impl ClusterResolver for KubeconfigResolver {
    async fn client(&self, cluster: &Cluster) -> Result<Client> {
        if let Some(client) = self.clients.get(&cluster.id) {
            return Ok(client.clone());
        }

        let config = config_from_kubeconfig(&cluster.kube_config).await?;
        let client = Client::try_from(config)?;
        debug!(cluster = %cluster.name, cluster_id = cluster.id, "created cluster client");
        self.clients.insert(cluster.id, client.clone());
        Ok(client)
    }

    async fn control_plane(&self, cluster: &Cluster) -> Result<Arc<dyn ControlPlane>> {
        Ok(Arc::new(KubeControlPlane::new(self.client(cluster).await?)))
    }
}
