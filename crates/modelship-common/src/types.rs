//! Domain model for deployments, revisions and targets
//!
//! These are the persisted entities the engine reads and mutates through the
//! store contract. They carry no lazily-loaded associations; related entities
//! are fetched by id through a loader.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::{Deserialize, Serialize};

/// Observed status of a deployment
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentStatus {
    /// Nothing is running for this deployment
    NonDeployed,
    /// Pods are being rolled out
    Deploying,
    /// All observed pods are running and ready
    Running,
    /// Some pods run while others fail
    Unhealthy,
    /// Pods are failing
    Failed,
    /// Resources are being torn down
    Terminating,
    /// Resources are gone
    Terminated,
    /// Status could not be observed
    #[default]
    Unknown,
}

impl DeploymentStatus {
    /// Whether the deployment is on its way down or already gone
    pub fn is_terminal_path(&self) -> bool {
        matches!(self, Self::Terminating | Self::Terminated)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NonDeployed => "non-deployed",
            Self::Deploying => "deploying",
            Self::Running => "running",
            Self::Unhealthy => "unhealthy",
            Self::Failed => "failed",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A tenant-owned logical serving unit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Identity
    pub id: u64,
    /// Owning organization
    pub organization_id: u64,
    /// Cluster the deployment runs on
    pub cluster_id: u64,
    /// User-facing name, used in generated object names
    pub name: String,
    /// Namespace generated objects live in
    pub kube_namespace: String,
    /// Last persisted status
    pub status: DeploymentStatus,
    /// When a status observation last started
    pub status_syncing_at: Option<DateTime<Utc>>,
    /// When a status observation last completed
    pub status_updated_at: Option<DateTime<Utc>>,
    /// Opaque rollout guard stamped on generated objects
    pub deploy_token: String,
}

/// Lifecycle of a revision
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionStatus {
    /// The revision currently configures its deployment
    Active,
    /// The revision has been superseded or rolled back
    Inactive,
}

/// An immutable, versioned attempt to configure a deployment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRevision {
    /// Identity
    pub id: u64,
    /// Owning deployment
    pub deployment_id: u64,
    /// Active or Inactive
    pub status: RevisionStatus,
}

/// Variant kind of a target within a revision
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    /// Receives all traffic not routed to a canary
    Stable,
    /// Receives traffic selected by canary rules
    Canary,
}

impl TargetType {
    /// Short code appended to generated object names
    pub fn short_code(&self) -> &'static str {
        match self {
            Self::Stable => "stb",
            Self::Canary => "cnr",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => f.write_str("stable"),
            Self::Canary => f.write_str("canary"),
        }
    }
}

/// How a canary rule selects traffic
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CanaryRule {
    /// Route a percentage of traffic
    Weight {
        /// Percentage, 0-100
        weight: u32,
    },
    /// Route requests carrying a header
    Header {
        /// Header name
        header: String,
        /// Optional exact header value
        #[serde(default, skip_serializing_if = "Option::is_none")]
        header_value: Option<String>,
    },
    /// Route requests carrying a cookie
    Cookie {
        /// Cookie name
        cookie: String,
    },
}

/// CPU/memory quantities for one side of a resource requirement
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceItem {
    /// CPU quantity, e.g. "500m"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Memory quantity, e.g. "1Gi"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// Extended resources, e.g. "nvidia.com/gpu" -> "1"
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, String>,
}

/// Container resource requests and limits
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceItem>,
    /// Limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceItem>,
}

/// Autoscaler thresholds
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HpaConf {
    /// Target requests per second per pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qps: Option<u32>,
    /// Target CPU utilization percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    /// Target average memory quantity, e.g. "500Mi"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// Minimum replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<u32>,
    /// Maximum replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<u32>,
}

/// Environment variable for the serving container
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Variable value
    pub value: String,
}

/// Per-target runtime configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Resource requests and limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    /// Autoscaler configuration; no autoscaler is generated without it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hpa_conf: Option<HpaConf>,
    /// Environment for the serving container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<EnvVar>,
}

/// One weighted variant within a revision
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    /// Identity
    pub id: u64,
    /// Owning revision
    pub revision_id: u64,
    /// Stable or canary
    #[serde(rename = "type")]
    pub type_: TargetType,
    /// Bound artifact
    pub artifact_id: u64,
    /// Ordered canary rules (canary targets only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub canary_rules: Vec<CanaryRule>,
    /// Runtime configuration
    #[serde(default)]
    pub config: TargetConfig,
}

/// A deployable model-serving bundle
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Identity
    pub id: u64,
    /// Artifact name
    pub name: String,
    /// Artifact version
    pub version: String,
    /// Container image reference
    pub image: String,
}

/// A cluster the engine deploys onto
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Identity
    pub id: u64,
    /// Owning organization
    pub organization_id: u64,
    /// Cluster name
    pub name: String,
    /// Opaque kubeconfig YAML
    pub kube_config: String,
    /// Ingress controller address: an IP or a wildcard domain suffix
    pub ingress_address: String,
    /// Ingress class to request, if the cluster has several
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class: Option<String>,
}

/// A tenant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    /// Identity
    pub id: u64,
    /// Organization name
    pub name: String,
}

/// Ephemeral options for a single deploy call
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeployOption {
    /// Rotate the rollout token so in-flight rollouts become detectably stale
    pub force: bool,
    /// Owner references stamped on every generated object
    pub owner_references: Vec<OwnerReference>,
}

impl DeployOption {
    /// Options for a forced rollout
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Default::default()
        }
    }
}
