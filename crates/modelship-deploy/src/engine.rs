//! Engine facade: one object owning the context, orchestrator and syncer

use std::sync::Arc;

use modelship_common::types::{
    DeployOption, DeploymentRevision, DeploymentStatus, DeploymentTarget,
};
use modelship_common::{EngineConfig, Result};
use tokio::task::JoinHandle;
use tracing::info;

use crate::context::DeployContext;
use crate::orchestrator::{DeployReport, Orchestrator};
use crate::store::DeploymentStore;
use crate::syncer::PeriodicSyncer;

/// Deployment engine
///
/// ```rust,ignore
/// let engine = Engine::new(store, EngineConfig::from_yaml(&yaml)?);
/// let _syncer = engine.spawn_syncer();
/// engine.deploy(deployment_id, &revision, vec![], DeployOption::default()).await?;
/// ```
pub struct Engine {
    ctx: Arc<DeployContext>,
    orchestrator: Orchestrator,
    syncer: Arc<PeriodicSyncer>,
}

impl Engine {
    /// Create an engine talking to real clusters through `store`
    pub fn new(store: Arc<dyn DeploymentStore>, config: EngineConfig) -> Self {
        Self::with_context(Arc::new(DeployContext::from_store(store, config)))
    }

    /// Create an engine over an existing context
    pub fn with_context(ctx: Arc<DeployContext>) -> Self {
        Self {
            orchestrator: Orchestrator::new(ctx.clone()),
            syncer: Arc::new(PeriodicSyncer::new(ctx.clone())),
            ctx,
        }
    }

    /// Shared context
    pub fn context(&self) -> &Arc<DeployContext> {
        &self.ctx
    }

    /// Roll a revision out; see [`Orchestrator::deploy`]
    pub async fn deploy(
        &self,
        deployment_id: u64,
        revision: &DeploymentRevision,
        targets: Vec<DeploymentTarget>,
        option: DeployOption,
    ) -> Result<DeployReport> {
        self.orchestrator
            .deploy(deployment_id, revision, targets, option)
            .await
    }

    /// Retire a deployment; see [`Orchestrator::terminate`]
    pub async fn terminate(&self, deployment_id: u64) -> Result<()> {
        self.orchestrator.terminate(deployment_id).await
    }

    /// Public URLs of a deployment
    pub async fn urls(&self, deployment_id: u64) -> Result<Vec<String>> {
        self.orchestrator.urls(deployment_id).await
    }

    /// Observe and persist a deployment's status now
    pub async fn sync_status(&self, deployment_id: u64) -> Result<DeploymentStatus> {
        self.orchestrator.observer().sync_status(deployment_id).await
    }

    /// Start the periodic syncer. It stops on [`Engine::shutdown`].
    pub fn spawn_syncer(&self) -> JoinHandle<()> {
        let syncer = self.syncer.clone();
        let cancel = self.ctx.cancellation();
        tokio::spawn(async move { syncer.run(cancel).await })
    }

    /// Stop the syncer, informers and background work
    pub fn shutdown(&self) {
        info!("shutting down deployment engine");
        self.ctx.shutdown();
    }
}
