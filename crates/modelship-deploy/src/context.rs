//! Shared engine context
//!
//! The context owns everything that outlives a single request: the store
//! handle, the cluster client cache, the informer registry and the
//! background pool. All of them hang off one cancellation token so
//! `shutdown` stops every watch and background task together.

use std::sync::Arc;

use modelship_common::config::CompilerConfig;
use modelship_common::types::Deployment;
use modelship_common::EngineConfig;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cluster::{ClusterResolver, KubeconfigResolver};
use crate::informer::{InformerRegistry, PodSource};
use crate::pool::BackgroundPool;
use crate::store::DeploymentStore;

/// Long-lived state shared by the orchestrator, observer and syncer
pub struct DeployContext {
    /// Persistence layer
    pub store: Arc<dyn DeploymentStore>,
    /// Cluster client resolution
    pub clusters: Arc<dyn ClusterResolver>,
    /// Observed pod state
    pub pods: Arc<dyn PodSource>,
    /// Detached post-deploy work
    pub pool: BackgroundPool,
    /// Engine configuration
    pub config: EngineConfig,
    cancel: CancellationToken,
}

impl DeployContext {
    /// Create a context with the given collaborators
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        clusters: Arc<dyn ClusterResolver>,
        pods: Arc<dyn PodSource>,
        config: EngineConfig,
    ) -> Self {
        Self::with_cancel(store, clusters, pods, config, CancellationToken::new())
    }

    /// Create a context that talks to real clusters.
    ///
    /// Clients are built from each cluster's stored kubeconfig and pod state
    /// comes from shared informer caches.
    pub fn from_store(store: Arc<dyn DeploymentStore>, config: EngineConfig) -> Self {
        let cancel = CancellationToken::new();
        let clusters: Arc<dyn ClusterResolver> = Arc::new(KubeconfigResolver::new());
        let pods = Arc::new(InformerRegistry::from_config(
            clusters.clone(),
            &config.informer,
            cancel.child_token(),
        ));
        Self::with_cancel(store, clusters, pods, config, cancel)
    }

    fn with_cancel(
        store: Arc<dyn DeploymentStore>,
        clusters: Arc<dyn ClusterResolver>,
        pods: Arc<dyn PodSource>,
        config: EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        let pool = BackgroundPool::new(config.background.max_concurrency, cancel.child_token());
        Self {
            store,
            clusters,
            pods,
            pool,
            config,
            cancel,
        }
    }

    /// Compiler defaults
    pub fn compiler_config(&self) -> &CompilerConfig {
        &self.config.compiler
    }

    /// Fill in the default namespace for a deployment that names none
    pub fn resolve_namespace(&self, mut deployment: Deployment) -> Deployment {
        if deployment.kube_namespace.is_empty() {
            deployment.kube_namespace = self.config.default_namespace.clone();
        }
        deployment
    }

    /// Token cancelled on shutdown, for long-running loops owned by callers
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Stop informers, the background pool and every derived loop
    pub fn shutdown(&self) {
        info!("shutting down deploy context");
        self.pool.shutdown();
        self.cancel.cancel();
    }

    /// Whether `shutdown` has been called
    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
