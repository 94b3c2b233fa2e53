//! Status observer: collapses pod and event state into a deployment status
//!
//! Classification and the state machine are pure functions so every
//! transition can be tested without a cluster. `StatusObserver` wraps them
//! with the staleness stamps the periodic syncer relies on: `syncing_at`
//! before observing, `updated_at` after persisting.

use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use modelship_common::types::DeploymentStatus;
use modelship_common::Result;
use tracing::{debug, info, instrument, warn};

use crate::context::DeployContext;
use crate::informer::ObservedPods;
use crate::store::Loader;

/// Container waiting reasons that mean the pod will not become ready
const CRASH_REASONS: &[&str] = &[
    "CrashLoopBackOff",
    "ImagePullBackOff",
    "ErrImagePull",
    "InvalidImageName",
    "CreateContainerConfigError",
    "CreateContainerError",
    "RunContainerError",
];

/// Coarse pod state used by the status state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodClass {
    /// Scheduled or starting, not ready yet
    Pending,
    /// Running and ready
    Running,
    /// Crashed, failed, or flagged by a warning event
    Failed,
}

/// Classify one pod. Any warning event about the pod marks it Failed.
pub fn classify_pod(pod: &Pod, has_warning: bool) -> PodClass {
    if has_warning {
        return PodClass::Failed;
    }

    let status = pod.status.as_ref();
    match status.and_then(|s| s.phase.as_deref()) {
        Some("Pending") => PodClass::Pending,
        Some("Running") => {
            if is_ready(pod) {
                PodClass::Running
            } else if status
                .and_then(|s| s.container_statuses.as_ref())
                .is_some_and(|cs| cs.iter().any(container_failed))
            {
                PodClass::Failed
            } else {
                PodClass::Pending
            }
        }
        // Failed, Succeeded, Unknown, or no phase reported at all
        _ => PodClass::Failed,
    }
}

fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn container_failed(status: &ContainerStatus) -> bool {
    let Some(state) = status.state.as_ref() else {
        return false;
    };
    let crashing = state
        .waiting
        .as_ref()
        .and_then(|w| w.reason.as_deref())
        .is_some_and(|reason| CRASH_REASONS.contains(&reason));
    let exited_nonzero = state
        .terminated
        .as_ref()
        .is_some_and(|t| t.exit_code != 0);
    crashing || exited_nonzero
}

/// Classify every observed pod
pub fn classify(observed: &ObservedPods) -> Vec<PodClass> {
    observed
        .pods
        .iter()
        .map(|pod| {
            let has_warning = pod
                .metadata
                .name
                .as_deref()
                .is_some_and(|name| observed.warnings_for(name).next().is_some());
            classify_pod(pod, has_warning)
        })
        .collect()
}

/// Next deployment status given the persisted one and the observed pods.
pub fn compute_status(previous: DeploymentStatus, pods: &[PodClass]) -> DeploymentStatus {
    if pods.is_empty() {
        return if previous.is_terminal_path() {
            DeploymentStatus::Terminated
        } else {
            DeploymentStatus::NonDeployed
        };
    }

    let running = pods.contains(&PodClass::Running);
    match previous {
        DeploymentStatus::Terminated => return DeploymentStatus::Terminated,
        DeploymentStatus::Terminating => {
            return if running {
                DeploymentStatus::Terminating
            } else {
                DeploymentStatus::Terminated
            };
        }
        _ => {}
    }

    let failed = pods.contains(&PodClass::Failed);
    let pending = pods.contains(&PodClass::Pending);
    match (failed, running, pending) {
        (true, true, true) => DeploymentStatus::Deploying,
        (true, true, false) => DeploymentStatus::Unhealthy,
        (_, _, true) => DeploymentStatus::Deploying,
        (false, true, false) => DeploymentStatus::Running,
        _ => DeploymentStatus::Failed,
    }
}

/// Derives and persists deployment status
#[derive(Clone)]
pub struct StatusObserver {
    ctx: Arc<DeployContext>,
}

impl StatusObserver {
    /// Create an observer over the shared context
    pub fn new(ctx: Arc<DeployContext>) -> Self {
        Self { ctx }
    }

    /// Observe a deployment and persist its status.
    ///
    /// When observation fails the status is persisted as `Unknown` and the
    /// error is returned.
    #[instrument(skip(self))]
    pub async fn sync_status(&self, deployment_id: u64) -> Result<DeploymentStatus> {
        let store = &self.ctx.store;
        store.mark_status_syncing(deployment_id, Utc::now()).await?;

        match self.observe(deployment_id).await {
            Ok((previous, status)) => {
                store
                    .update_deployment_status(deployment_id, status, Utc::now())
                    .await?;
                if previous != status {
                    info!(%previous, %status, "deployment status changed");
                }
                Ok(status)
            }
            Err(e) => {
                warn!(error = %e, "status observation failed");
                store
                    .update_deployment_status(deployment_id, DeploymentStatus::Unknown, Utc::now())
                    .await?;
                Err(e)
            }
        }
    }

    async fn observe(&self, deployment_id: u64) -> Result<(DeploymentStatus, DeploymentStatus)> {
        let loader = Loader::new(self.ctx.store.clone());
        let deployment = self.ctx.resolve_namespace(loader.deployment(deployment_id).await?);
        let cluster = loader.cluster(deployment.cluster_id).await?;

        let observed = self.ctx.pods.observe(&deployment, &cluster).await?;
        let classes = classify(&observed);
        let status = compute_status(deployment.status, &classes);

        debug!(
            deployment = %deployment.name,
            pods = observed.pods.len(),
            warnings = observed.warnings.len(),
            workloads = observed.workloads.len(),
            %status,
            "observed deployment"
        );
        Ok((deployment.status, status))
    }
}
