//! Informer cache of pod, event and workload state per cluster
//!
//! Each `InformerKey` gets one shared `InformerCache` whose reflectors mirror
//! Pods, Events and Deployments. Caches are created lazily under a single
//! registry lock acquired with a bounded wait, must finish their initial
//! list within a bounded timeout, and are never evicted. All watch tasks
//! stop when the registry's cancellation token fires.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment as Workload;
use k8s_openapi::api::core::v1::{Event, Pod};
use k8s_openapi::NamespaceResourceScope;
use kube::api::Api;
use kube::runtime::reflector::{self, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Resource};
use modelship_common::config::InformerConfig;
use modelship_common::naming::{self, LABEL_DEPLOYMENT};
use modelship_common::types::{Cluster, Deployment};
use modelship_common::{Error, Result};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::ClusterResolver;

/// Identity of a shared informer cache
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InformerKey {
    /// Owning organization
    pub organization_id: u64,
    /// Cluster the cache watches
    pub cluster_id: u64,
    /// Namespace the cache is scoped to; `None` watches every namespace
    pub namespace: Option<String>,
}

impl InformerKey {
    /// Key for a deployment's namespace on its cluster
    pub fn for_deployment(deployment: &Deployment) -> Self {
        Self {
            organization_id: deployment.organization_id,
            cluster_id: deployment.cluster_id,
            namespace: Some(deployment.kube_namespace.clone()),
        }
    }
}

impl fmt::Display for InformerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.organization_id,
            self.cluster_id,
            self.namespace.as_deref().unwrap_or("*")
        )
    }
}

/// Pods, warning events and workloads of one deployment at one instant
#[derive(Clone, Debug, Default)]
pub struct ObservedPods {
    /// Pods carrying the deployment label
    pub pods: Vec<Pod>,
    /// Warning events whose involved object is one of `pods`
    pub warnings: Vec<Event>,
    /// Workloads carrying the deployment label
    pub workloads: Vec<Workload>,
}

impl ObservedPods {
    /// Build a snapshot, keeping only Warning events about `pods`
    pub fn correlate(pods: Vec<Pod>, events: Vec<Event>, workloads: Vec<Workload>) -> Self {
        let names: HashSet<&str> = pods
            .iter()
            .filter_map(|p| p.metadata.name.as_deref())
            .collect();
        let warnings = events
            .into_iter()
            .filter(|e| e.type_.as_deref() == Some("Warning"))
            .filter(|e| e.involved_object.kind.as_deref() == Some("Pod"))
            .filter(|e| {
                e.involved_object
                    .name
                    .as_deref()
                    .is_some_and(|n| names.contains(n))
            })
            .collect();
        Self {
            pods,
            warnings,
            workloads,
        }
    }

    /// Warning events about the named pod
    pub fn warnings_for<'a>(&'a self, pod_name: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.warnings
            .iter()
            .filter(move |e| e.involved_object.name.as_deref() == Some(pod_name))
    }
}

/// Source of observed pod state for the status observer
#[async_trait]
pub trait PodSource: Send + Sync {
    /// Snapshot the pods of `deployment` on `cluster`
    async fn observe(&self, deployment: &Deployment, cluster: &Cluster) -> Result<ObservedPods>;
}

/// Reflector stores for one informer key
#[derive(Clone, Debug)]
pub struct InformerCache {
    pods: Store<Pod>,
    events: Store<Event>,
    workloads: Store<Workload>,
}

impl InformerCache {
    /// Wrap existing stores
    pub fn from_stores(pods: Store<Pod>, events: Store<Event>, workloads: Store<Workload>) -> Self {
        Self {
            pods,
            events,
            workloads,
        }
    }

    /// Start reflectors for `key` on `client`. Watch tasks stop on `cancel`.
    pub fn start(client: Client, key: &InformerKey, cancel: CancellationToken) -> Self {
        let namespace = key.namespace.as_deref();
        Self {
            pods: spawn_reflector::<Pod>(api(&client, namespace), cancel.clone(), "Pod"),
            events: spawn_reflector::<Event>(api(&client, namespace), cancel.clone(), "Event"),
            workloads: spawn_reflector::<Workload>(api(&client, namespace), cancel, "Deployment"),
        }
    }

    /// Wait for every reflector's initial list to complete
    pub async fn wait_until_ready(&self) -> Result<()> {
        let dropped = |kind: &str| {
            Error::internal_with_context("informer", format!("{} reflector stopped", kind))
        };
        self.pods.wait_until_ready().await.map_err(|_| dropped("Pod"))?;
        self.events.wait_until_ready().await.map_err(|_| dropped("Event"))?;
        self.workloads
            .wait_until_ready()
            .await
            .map_err(|_| dropped("Deployment"))?;
        Ok(())
    }

    /// Snapshot the pods, warning events and workloads of a deployment
    pub fn observe(&self, deployment: &Deployment) -> ObservedPods {
        let selector = BTreeMap::from([(LABEL_DEPLOYMENT.to_string(), deployment.name.clone())]);
        let namespace = deployment.kube_namespace.as_str();

        let pods = select(&self.pods, namespace, &selector);
        let events = self
            .events
            .state()
            .iter()
            .filter(|e| e.metadata.namespace.as_deref() == Some(namespace))
            .map(|e| (**e).clone())
            .collect();
        let workloads = select(&self.workloads, namespace, &selector);

        ObservedPods::correlate(pods, events, workloads)
    }
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn select<K>(store: &Store<K>, namespace: &str, selector: &BTreeMap<String, String>) -> Vec<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store
        .state()
        .iter()
        .filter(|o| o.meta().namespace.as_deref() == Some(namespace))
        .filter(|o| {
            let labels = o.meta().labels.as_ref();
            selector
                .iter()
                .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
        })
        .map(|o| (**o).clone())
        .collect()
}

/// Server-side watch timeout, must stay below the client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

fn watcher_config() -> watcher::Config {
    watcher::Config::default().timeout(WATCH_TIMEOUT_SECS)
}

fn spawn_reflector<K>(api: Api<K>, cancel: CancellationToken, kind: &'static str) -> Store<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + fmt::Debug + Send + Sync + 'static,
{
    let (reader, writer) = reflector::store();
    let stream = watcher(api, watcher_config())
        .default_backoff()
        .reflect(writer);

    tokio::spawn(async move {
        let mut stream = std::pin::pin!(stream);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(kind, "informer stopped");
                    break;
                }
                event = stream.next() => match event {
                    Some(Ok(_)) => {}
                    Some(Err(e)) => warn!(kind, error = %e, "informer watch error, backing off"),
                    None => {
                        warn!(kind, "informer stream ended");
                        break;
                    }
                },
            }
        }
    });

    reader
}

/// Registry of shared informer caches
pub struct InformerRegistry {
    clusters: Arc<dyn ClusterResolver>,
    entries: Mutex<HashMap<InformerKey, InformerCache>>,
    lock_wait: Duration,
    sync_timeout: Duration,
    cancel: CancellationToken,
}

impl InformerRegistry {
    /// Create an empty registry
    pub fn new(
        clusters: Arc<dyn ClusterResolver>,
        lock_wait: Duration,
        sync_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            clusters,
            entries: Mutex::new(HashMap::new()),
            lock_wait,
            sync_timeout,
            cancel,
        }
    }

    /// Create an empty registry with bounds from config
    pub fn from_config(
        clusters: Arc<dyn ClusterResolver>,
        config: &InformerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(clusters, config.lock_wait(), config.sync_timeout(), cancel)
    }

    /// Get the cache for `key`, starting it on first use.
    pub async fn get(&self, key: &InformerKey, cluster: &Cluster) -> Result<InformerCache> {
        self.get_or_start(key, || async {
            let client = self.clusters.client(cluster).await?;
            let cancel = self.cancel.child_token();
            let cache = InformerCache::start(client, key, cancel.clone());
            Ok((cache, cancel))
        })
        .await
    }

    /// Lookup-or-create under the registry lock.
    ///
    /// Lock acquisition beyond `lock_wait` is a `LockTimeout`; a new cache
    /// that does not finish its initial sync within `sync_timeout` is a
    /// `SyncTimeout`, its watch tasks are stopped and nothing is cached.
    async fn get_or_start<F, Fut>(&self, key: &InformerKey, start: F) -> Result<InformerCache>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(InformerCache, CancellationToken)>>,
    {
        let mut entries = tokio::time::timeout(self.lock_wait, self.entries.lock())
            .await
            .map_err(|_| Error::LockTimeout {
                key: key.to_string(),
            })?;

        if let Some(cache) = entries.get(key) {
            return Ok(cache.clone());
        }

        info!(key = %key, "starting informer cache");
        let (cache, cancel) = start().await?;
        match tokio::time::timeout(self.sync_timeout, cache.wait_until_ready()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                cancel.cancel();
                return Err(e);
            }
            Err(_) => {
                cancel.cancel();
                return Err(Error::SyncTimeout {
                    key: key.to_string(),
                    message: format!("initial sync exceeded {:?}", self.sync_timeout),
                });
            }
        }

        entries.insert(key.clone(), cache.clone());
        info!(key = %key, caches = entries.len(), "informer cache synced");
        Ok(cache)
    }

    /// Number of live caches
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether no cache has been started
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop every watch task
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl PodSource for InformerRegistry {
    async fn observe(&self, deployment: &Deployment, cluster: &Cluster) -> Result<ObservedPods> {
        let cache = self
            .get(&InformerKey::for_deployment(deployment), cluster)
            .await?;
        Ok(cache.observe(deployment))
    }
}

/// `PodSource` that lists directly from the control plane on every call.
///
/// Costs three list calls per observation, so it suits low-volume callers and
/// clusters where a long-lived watch is unwanted.
pub struct ControlPlanePodSource {
    clusters: Arc<dyn ClusterResolver>,
}

impl ControlPlanePodSource {
    /// Create a source resolving clusters through `clusters`
    pub fn new(clusters: Arc<dyn ClusterResolver>) -> Self {
        Self { clusters }
    }
}

#[async_trait]
impl PodSource for ControlPlanePodSource {
    async fn observe(&self, deployment: &Deployment, cluster: &Cluster) -> Result<ObservedPods> {
        let control_plane = self.clusters.control_plane(cluster).await?;
        let namespace = deployment.kube_namespace.as_str();
        let selector = naming::deployment_pod_selector(deployment);

        let pods = control_plane.list_pods(namespace, &selector).await?;
        let events = control_plane.list_events(namespace).await?;
        let workloads = control_plane.list_workloads(namespace, &selector).await?;
        Ok(ObservedPods::correlate(pods, events, workloads))
    }
}
