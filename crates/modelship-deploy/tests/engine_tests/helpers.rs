//! Shared fixtures: a seeded store, a fake cluster and an engine over both

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use modelship_common::naming::LABEL_DEPLOYMENT;
use modelship_common::types::{
    Artifact, CanaryRule, Cluster, Deployment, DeploymentRevision, DeploymentStatus,
    DeploymentTarget, HpaConf, Organization, RevisionStatus, TargetConfig, TargetType,
};
use modelship_common::EngineConfig;
use modelship_deploy::{ControlPlanePodSource, DeployContext, Engine};

use super::fakes::{FakeControlPlane, FakeResolver, InMemoryStore, Journal};

pub const DEPLOYMENT_ID: u64 = 1;
pub const NAMESPACE: &str = "models";
pub const STABLE: &str = "modelship-iris-stb";
pub const INITIAL_TOKEN: &str = "tok-1";

/// An engine wired to in-memory fakes
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub cluster: Arc<FakeControlPlane>,
    pub journal: Journal,
    pub engine: Engine,
}

impl Harness {
    /// One organization, cluster, artifact and never-deployed deployment
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let journal = Journal::default();
        let store = Arc::new(InMemoryStore::new(journal.clone()));
        let cluster = Arc::new(FakeControlPlane::new(journal.clone()));

        {
            let mut state = store.state();
            state.organizations.insert(
                1,
                Organization {
                    id: 1,
                    name: "acme".to_string(),
                },
            );
            state.clusters.insert(
                1,
                Cluster {
                    id: 1,
                    organization_id: 1,
                    name: "edge".to_string(),
                    kube_config: String::new(),
                    ingress_address: "10.0.0.5".to_string(),
                    ingress_class: None,
                },
            );
            state.artifacts.insert(
                3,
                Artifact {
                    id: 3,
                    name: "iris-classifier".to_string(),
                    version: "v1".to_string(),
                    image: "registry.local/iris:v1".to_string(),
                },
            );
            state.deployments.insert(DEPLOYMENT_ID, deployment("iris"));
        }

        let resolver = Arc::new(FakeResolver(cluster.clone()));
        let ctx = DeployContext::new(
            store.clone(),
            resolver.clone(),
            Arc::new(ControlPlanePodSource::new(resolver)),
            config,
        );

        Self {
            store,
            cluster,
            journal,
            engine: Engine::with_context(Arc::new(ctx)),
        }
    }

    /// Persist a new, not yet Active revision with its targets
    pub fn add_revision(&self, id: u64, targets: &[DeploymentTarget]) -> DeploymentRevision {
        let revision = DeploymentRevision {
            id,
            deployment_id: DEPLOYMENT_ID,
            status: RevisionStatus::Inactive,
        };
        let mut state = self.store.state();
        state.revisions.insert(id, revision.clone());
        state.targets.extend(targets.iter().cloned());
        revision
    }

    pub fn status(&self) -> DeploymentStatus {
        self.store.deployment(DEPLOYMENT_ID).status
    }

    pub fn token(&self) -> String {
        self.store.deployment(DEPLOYMENT_ID).deploy_token
    }

    /// Poll until the persisted status equals `want`
    pub async fn wait_for_status(&self, want: DeploymentStatus) {
        let polled = tokio::time::timeout(Duration::from_secs(5), async {
            while self.status() != want {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(
            polled.is_ok(),
            "status never became {}, still {}",
            want,
            self.status()
        );
    }
}

pub fn deployment(name: &str) -> Deployment {
    Deployment {
        id: DEPLOYMENT_ID,
        organization_id: 1,
        cluster_id: 1,
        name: name.to_string(),
        kube_namespace: NAMESPACE.to_string(),
        status: DeploymentStatus::NonDeployed,
        status_syncing_at: None,
        status_updated_at: None,
        deploy_token: INITIAL_TOKEN.to_string(),
    }
}

pub fn stable(id: u64, revision_id: u64) -> DeploymentTarget {
    DeploymentTarget {
        id,
        revision_id,
        type_: TargetType::Stable,
        artifact_id: 3,
        canary_rules: vec![],
        config: TargetConfig::default(),
    }
}

pub fn autoscaled(id: u64, revision_id: u64) -> DeploymentTarget {
    DeploymentTarget {
        config: TargetConfig {
            hpa_conf: Some(HpaConf {
                min_replicas: Some(2),
                max_replicas: Some(6),
                cpu: Some(70),
                ..Default::default()
            }),
            ..Default::default()
        },
        ..stable(id, revision_id)
    }
}

pub fn canary(id: u64, revision_id: u64, weight: u32) -> DeploymentTarget {
    DeploymentTarget {
        type_: TargetType::Canary,
        canary_rules: vec![CanaryRule::Weight { weight }],
        ..stable(id, revision_id)
    }
}

/// A pod of the `iris` deployment
pub fn pod(name: &str, phase: &str, ready: bool) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([(
                LABEL_DEPLOYMENT.to_string(),
                "iris".to_string(),
            )])),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
