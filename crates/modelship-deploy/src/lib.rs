//! Deployment reconciliation and status synchronization for modelship
//!
//! Rolls revisions of a model deployment out to a Kubernetes cluster and
//! keeps the persisted deployment status in line with what the cluster
//! actually runs:
//!
//! - **Orchestrator**: revision activation, token rotation, concurrent
//!   per-target reconciliation and compensation on failure
//! - **Reconcilers**: get-then-create-or-update per resource kind
//! - **Status observer**: pod and event classification into a deployment status
//! - **Informers**: shared reflector caches keyed by cluster and namespace
//! - **Syncer**: periodic resync of deployments whose status went stale

#![deny(missing_docs)]

pub mod cluster;
pub mod context;
pub mod engine;
pub mod informer;
pub mod orchestrator;
pub mod pool;
pub mod reconcile;
pub mod status;
pub mod store;
pub mod syncer;
pub mod transaction;

pub use cluster::{ClusterResolver, ControlPlane, KubeControlPlane, KubeconfigResolver};
pub use context::DeployContext;
pub use engine::Engine;
pub use informer::{ControlPlanePodSource, InformerRegistry, PodSource};
pub use orchestrator::{DeployReport, Orchestrator};
pub use status::StatusObserver;
pub use store::{DeploymentStore, Loader};
pub use syncer::{PeriodicSyncer, SyncReport};
