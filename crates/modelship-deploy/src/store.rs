//! Persistence contract and request-scoped loader
//!
//! The relational layer lives outside this crate. The engine only sees the
//! `DeploymentStore` trait, and coordinates concurrent writers through the
//! store's row-level semantics (the rollout token compare-and-swap) rather
//! than in-process locks.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use modelship_common::types::{
    Artifact, Cluster, Deployment, DeploymentRevision, DeploymentStatus, DeploymentTarget,
    Organization, RevisionStatus,
};
use modelship_common::{Error, Result};

#[cfg(test)]
use mockall::automock;

/// Persistence operations the engine depends on
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Get a deployment by id
    async fn get_deployment(&self, id: u64) -> Result<Option<Deployment>>;

    /// Persist a new status and stamp `status_updated_at`
    async fn update_deployment_status(
        &self,
        id: u64,
        status: DeploymentStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Stamp `status_syncing_at` before an observation starts
    async fn mark_status_syncing(&self, id: u64, syncing_at: DateTime<Utc>) -> Result<()>;

    /// Replace the rollout token only if it still equals `expected`.
    ///
    /// Returns `false` when another writer rotated it first.
    async fn rotate_deploy_token(&self, id: u64, expected: &str, new_token: &str)
        -> Result<bool>;

    /// List a deployment's Active revisions
    async fn list_active_revisions(&self, deployment_id: u64) -> Result<Vec<DeploymentRevision>>;

    /// Set a revision's status
    async fn update_revision_status(&self, id: u64, status: RevisionStatus) -> Result<()>;

    /// Delete a revision row
    async fn delete_revision(&self, id: u64) -> Result<()>;

    /// List a revision's targets
    async fn list_targets(&self, revision_id: u64) -> Result<Vec<DeploymentTarget>>;

    /// Get an artifact by id
    async fn get_artifact(&self, id: u64) -> Result<Option<Artifact>>;

    /// Get a cluster by id
    async fn get_cluster(&self, id: u64) -> Result<Option<Cluster>>;

    /// Get an organization by id
    async fn get_organization(&self, id: u64) -> Result<Option<Organization>>;

    /// List deployments due for a status resync.
    ///
    /// A deployment is due when it is not Terminated and neither its last
    /// status update nor its last sync attempt is newer than `older_than`.
    async fn list_stale_deployments(&self, older_than: DateTime<Utc>) -> Result<Vec<Deployment>>;
}

/// Request-scoped memoizing reader over a `DeploymentStore`.
///
/// Each entity is fetched at most once per loader; a missing entity is a
/// `NotFound` error. Create one per operation and drop it at the end so
/// cached rows never outlive the request.
pub struct Loader {
    store: Arc<dyn DeploymentStore>,
    deployments: DashMap<u64, Deployment>,
    clusters: DashMap<u64, Cluster>,
    artifacts: DashMap<u64, Artifact>,
    organizations: DashMap<u64, Organization>,
}

impl Loader {
    /// Create an empty loader
    pub fn new(store: Arc<dyn DeploymentStore>) -> Self {
        Self {
            store,
            deployments: DashMap::new(),
            clusters: DashMap::new(),
            artifacts: DashMap::new(),
            organizations: DashMap::new(),
        }
    }

    /// Load a deployment
    pub async fn deployment(&self, id: u64) -> Result<Deployment> {
        if let Some(found) = self.deployments.get(&id) {
            return Ok(found.clone());
        }
        let deployment = self
            .store
            .get_deployment(id)
            .await?
            .ok_or_else(|| Error::not_found("deployment", id))?;
        self.deployments.insert(id, deployment.clone());
        Ok(deployment)
    }

    /// Load a cluster
    pub async fn cluster(&self, id: u64) -> Result<Cluster> {
        if let Some(found) = self.clusters.get(&id) {
            return Ok(found.clone());
        }
        let cluster = self
            .store
            .get_cluster(id)
            .await?
            .ok_or_else(|| Error::not_found("cluster", id))?;
        self.clusters.insert(id, cluster.clone());
        Ok(cluster)
    }

    /// Load an artifact
    pub async fn artifact(&self, id: u64) -> Result<Artifact> {
        if let Some(found) = self.artifacts.get(&id) {
            return Ok(found.clone());
        }
        let artifact = self
            .store
            .get_artifact(id)
            .await?
            .ok_or_else(|| Error::not_found("artifact", id))?;
        self.artifacts.insert(id, artifact.clone());
        Ok(artifact)
    }

    /// Load an organization
    pub async fn organization(&self, id: u64) -> Result<Organization> {
        if let Some(found) = self.organizations.get(&id) {
            return Ok(found.clone());
        }
        let organization = self
            .store
            .get_organization(id)
            .await?
            .ok_or_else(|| Error::not_found("organization", id))?;
        self.organizations.insert(id, organization.clone());
        Ok(organization)
    }
}
