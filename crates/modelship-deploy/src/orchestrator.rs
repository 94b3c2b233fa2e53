//! Revision orchestrator
//!
//! Drives a deployment from one revision to the next. Storage changes are
//! registered with a compensation scope as they commit, so a failed rollout
//! puts the revision table and rollout token back the way it found them.
//! Cluster changes are not rolled back: objects stay owned by the new
//! revision's anchor and converge on the next successful deploy.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use modelship_common::kube_utils::generate_deploy_token;
use modelship_common::naming::{target_resource_name, validate_generated_names};
use modelship_common::types::{
    Artifact, Cluster, DeployOption, Deployment, DeploymentRevision, DeploymentStatus,
    DeploymentTarget, RevisionStatus, TargetType,
};
use modelship_common::{Error, Result};
use modelship_compiler::{CompiledTarget, TargetCompiler};
use tracing::{debug, info, instrument, warn};

use crate::cluster::ControlPlane;
use crate::context::DeployContext;
use crate::reconcile::{self, anchor, namespace, TargetOutcome};
use crate::status::StatusObserver;
use crate::store::Loader;
use crate::transaction::{run_compensated, Compensations};

/// Result of a successful rollout
#[derive(Clone, Debug, PartialEq)]
pub struct DeployReport {
    /// Revision that is now Active
    pub revision_id: u64,
    /// Token stamped on every generated object
    pub deploy_token: String,
    /// Revisions that were Active before this rollout
    pub superseded: Vec<u64>,
    /// Per-target reconcile outcomes
    pub targets: Vec<TargetOutcome>,
}

impl DeployReport {
    /// Whether any cluster object was mutated
    pub fn changed(&self) -> bool {
        self.targets.iter().any(TargetOutcome::changed)
    }
}

/// Everything a rollout needs, loaded and validated up front
struct Rollout {
    deployment: Deployment,
    revision_id: u64,
    targets: Vec<DeploymentTarget>,
    cluster: Cluster,
    artifacts: HashMap<u64, Artifact>,
    option: DeployOption,
}

/// Orchestrates deploys and terminations of deployments
#[derive(Clone)]
pub struct Orchestrator {
    ctx: Arc<DeployContext>,
    observer: StatusObserver,
}

impl Orchestrator {
    /// Create an orchestrator over the shared context
    pub fn new(ctx: Arc<DeployContext>) -> Self {
        let observer = StatusObserver::new(ctx.clone());
        Self { ctx, observer }
    }

    /// Status observer sharing this orchestrator's context
    pub fn observer(&self) -> &StatusObserver {
        &self.observer
    }

    /// Roll `revision` out to the deployment's cluster.
    ///
    /// `targets` may be empty, in which case the revision's persisted targets
    /// are used. Invalid names or target configs are rejected before any
    /// cluster call. On success the deployment is `Deploying` and a status
    /// resync has been queued; the caller does not wait for it.
    #[instrument(skip(self, revision, targets, option), fields(revision_id = revision.id))]
    pub async fn deploy(
        &self,
        deployment_id: u64,
        revision: &DeploymentRevision,
        targets: Vec<DeploymentTarget>,
        option: DeployOption,
    ) -> Result<DeployReport> {
        let rollout = self.prepare(deployment_id, revision, targets, option).await?;
        info!(
            deployment = %rollout.deployment.name,
            targets = rollout.targets.len(),
            force = rollout.option.force,
            "starting rollout"
        );

        let control_plane = self.ctx.clusters.control_plane(&rollout.cluster).await?;
        let report =
            run_compensated(|comp| self.roll_out(comp, &rollout, control_plane.as_ref())).await?;

        // The rollout is committed; the queued resync corrects a missed write
        if let Err(e) = self
            .ctx
            .store
            .update_deployment_status(deployment_id, DeploymentStatus::Deploying, Utc::now())
            .await
        {
            warn!(error = %e, "failed to record Deploying status after rollout");
        }
        self.resync_in_background(deployment_id);

        if let Err(e) = anchor::retire(
            control_plane.as_ref(),
            &rollout.deployment,
            Some(rollout.revision_id),
        )
        .await
        {
            warn!(error = %e, "failed to retire previous anchors");
        }

        info!(
            deployment = %rollout.deployment.name,
            changed = report.changed(),
            superseded = ?report.superseded,
            "rollout complete"
        );
        Ok(report)
    }

    async fn prepare(
        &self,
        deployment_id: u64,
        revision: &DeploymentRevision,
        targets: Vec<DeploymentTarget>,
        option: DeployOption,
    ) -> Result<Rollout> {
        let loader = Loader::new(self.ctx.store.clone());
        let deployment = self.ctx.resolve_namespace(loader.deployment(deployment_id).await?);

        if revision.deployment_id != deployment_id {
            return Err(Error::validation_for(
                &deployment.name,
                format!(
                    "revision {} belongs to deployment {}",
                    revision.id, revision.deployment_id
                ),
            ));
        }

        let targets = if targets.is_empty() {
            self.ctx.store.list_targets(revision.id).await?
        } else {
            targets
        };
        if targets.is_empty() {
            return Err(Error::validation_for(
                &deployment.name,
                format!("revision {} has no targets", revision.id),
            ));
        }
        validate_generated_names(&deployment, revision.id, &targets)?;
        ensure_unique_names(&deployment, &targets)?;

        let cluster = loader.cluster(deployment.cluster_id).await?;
        loader.organization(deployment.organization_id).await?;
        let mut artifacts = HashMap::new();
        for target in &targets {
            artifacts.insert(target.artifact_id, loader.artifact(target.artifact_id).await?);
        }

        let rollout = Rollout {
            deployment,
            revision_id: revision.id,
            targets,
            cluster,
            artifacts,
            option,
        };

        // Compile once with placeholder rollout inputs so bad quantities and
        // autoscaler bounds fail here rather than half way through.
        let token = rollout.deployment.deploy_token.clone();
        self.compile_all(&rollout, &token, &[])?;
        Ok(rollout)
    }

    async fn roll_out(
        &self,
        comp: Compensations,
        rollout: &Rollout,
        control_plane: &dyn ControlPlane,
    ) -> Result<DeployReport> {
        let store = &self.ctx.store;
        let deployment = &rollout.deployment;
        let revision_id = rollout.revision_id;

        let active: Vec<u64> = store
            .list_active_revisions(deployment.id)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();

        // A redeploy of the Active revision keeps its row on failure
        if !active.contains(&revision_id) {
            let store = store.clone();
            comp.push(format!("delete revision {}", revision_id), move || async move {
                store.delete_revision(revision_id).await
            });
        }

        let superseded: Vec<u64> = active
            .into_iter()
            .filter(|id| *id != revision_id)
            .collect();
        for id in superseded.iter().copied() {
            store
                .update_revision_status(id, RevisionStatus::Inactive)
                .await?;
            let store = store.clone();
            comp.push(format!("restore revision {}", id), move || async move {
                store.update_revision_status(id, RevisionStatus::Active).await
            });
        }
        store
            .update_revision_status(revision_id, RevisionStatus::Active)
            .await?;

        // The anchor lives in the deployment namespace, so it must exist first
        namespace::ensure(control_plane, &deployment.kube_namespace).await?;
        let mut owner_references = rollout.option.owner_references.clone();
        owner_references.push(anchor::ensure(control_plane, deployment, revision_id).await?);

        let token = if rollout.option.force {
            self.rotate_token(&comp, deployment).await?
        } else {
            deployment.deploy_token.clone()
        };

        let compiled = self.compile_all(rollout, &token, &owner_references)?;
        let results = join_all(
            compiled
                .iter()
                .map(|target| reconcile::reconcile_target(control_plane, target)),
        )
        .await;

        let mut targets = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(outcome) => {
                    debug!(object = %outcome.name, changed = outcome.changed(), "target reconciled");
                    targets.push(outcome);
                }
                Err(e) => {
                    warn!(error = %e, "target failed to reconcile");
                    errors.push(e);
                }
            }
        }
        if let Some(e) = Error::aggregate(errors) {
            return Err(e);
        }

        let current = store
            .get_deployment(deployment.id)
            .await?
            .ok_or_else(|| Error::not_found("deployment", deployment.id))?;
        if current.deploy_token != token {
            return Err(Error::StaleRollout {
                deployment: deployment.name.clone(),
                expected: token,
            });
        }

        Ok(DeployReport {
            revision_id,
            deploy_token: token,
            superseded,
            targets,
        })
    }

    async fn rotate_token(&self, comp: &Compensations, deployment: &Deployment) -> Result<String> {
        let old = deployment.deploy_token.clone();
        let new = generate_deploy_token();
        let rotated = self
            .ctx
            .store
            .rotate_deploy_token(deployment.id, &old, &new)
            .await?;
        if !rotated {
            return Err(Error::Conflict {
                deployment: deployment.name.clone(),
                message: "deploy token was rotated by another rollout".to_string(),
            });
        }
        info!(deployment = %deployment.name, "rotated deploy token");

        let store = self.ctx.store.clone();
        let (id, restore_from) = (deployment.id, new.clone());
        comp.push("restore deploy token", move || async move {
            if !store.rotate_deploy_token(id, &restore_from, &old).await? {
                warn!(deployment_id = id, "deploy token moved on, not restoring");
            }
            Ok(())
        });
        Ok(new)
    }

    fn compile_all(
        &self,
        rollout: &Rollout,
        token: &str,
        owner_references: &[OwnerReference],
    ) -> Result<Vec<CompiledTarget>> {
        rollout
            .targets
            .iter()
            .map(|target| {
                let artifact = rollout
                    .artifacts
                    .get(&target.artifact_id)
                    .ok_or_else(|| Error::not_found("artifact", target.artifact_id))?;
                TargetCompiler::new(
                    &rollout.deployment,
                    target,
                    artifact,
                    &rollout.cluster,
                    self.ctx.compiler_config(),
                )
                .with_deploy_token(token)
                .with_owner_references(owner_references)
                .compile()
            })
            .collect()
    }

    /// Retire every Active revision.
    ///
    /// Deleting every anchor of the deployment lets the cluster garbage
    /// collect the objects they own, including those of failed rollouts. The status moves to `Terminating` and a resync is
    /// queued to observe the pods going away.
    #[instrument(skip(self))]
    pub async fn terminate(&self, deployment_id: u64) -> Result<()> {
        let loader = Loader::new(self.ctx.store.clone());
        let deployment = self.ctx.resolve_namespace(loader.deployment(deployment_id).await?);
        let cluster = loader.cluster(deployment.cluster_id).await?;
        let control_plane = self.ctx.clusters.control_plane(&cluster).await?;
        let store = &self.ctx.store;

        let active = store.list_active_revisions(deployment_id).await?;
        for revision in &active {
            store
                .update_revision_status(revision.id, RevisionStatus::Inactive)
                .await?;
        }
        store
            .update_deployment_status(deployment_id, DeploymentStatus::Terminating, Utc::now())
            .await?;

        let retired = anchor::retire(control_plane.as_ref(), &deployment, None).await;
        self.resync_in_background(deployment_id);

        info!(deployment = %deployment.name, revisions = active.len(), "terminating");
        retired.map(|_| ())
    }

    /// Public URLs of the Active revision, stable target first
    #[instrument(skip(self))]
    pub async fn urls(&self, deployment_id: u64) -> Result<Vec<String>> {
        let loader = Loader::new(self.ctx.store.clone());
        let deployment = self.ctx.resolve_namespace(loader.deployment(deployment_id).await?);
        let cluster = loader.cluster(deployment.cluster_id).await?;
        let control_plane = self.ctx.clusters.control_plane(&cluster).await?;

        let mut targets = Vec::new();
        for revision in self.ctx.store.list_active_revisions(deployment_id).await? {
            targets.extend(self.ctx.store.list_targets(revision.id).await?);
        }
        targets.sort_by_key(|t| (t.type_ != TargetType::Stable, t.id));

        let mut urls = Vec::new();
        let mut seen = HashSet::new();
        for target in &targets {
            let name = target_resource_name(&deployment, target);
            let Some(ingress) = control_plane
                .get_ingress(&deployment.kube_namespace, &name)
                .await?
            else {
                debug!(ingress = %name, "no ingress for target");
                continue;
            };
            let hosts = ingress
                .spec
                .iter()
                .flat_map(|spec| spec.rules.iter().flatten())
                .filter_map(|rule| rule.host.clone());
            for host in hosts {
                if seen.insert(host.clone()) {
                    urls.push(format!("http://{}", host));
                }
            }
        }
        Ok(urls)
    }

    fn resync_in_background(&self, deployment_id: u64) {
        let observer = self.observer.clone();
        self.ctx
            .pool
            .submit(format!("resync deployment {}", deployment_id), async move {
                observer.sync_status(deployment_id).await.map(|_| ())
            });
    }
}

/// Two targets compiling to the same object name would fight over it
fn ensure_unique_names(deployment: &Deployment, targets: &[DeploymentTarget]) -> Result<()> {
    let mut seen = HashSet::new();
    for target in targets {
        let name = target_resource_name(deployment, target);
        if !seen.insert(name.clone()) {
            return Err(Error::validation_for(
                name,
                "more than one target generates this object name",
            ));
        }
    }
    Ok(())
}
