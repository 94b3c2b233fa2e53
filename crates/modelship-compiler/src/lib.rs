//! Target spec compilation for modelship
//!
//! Compiles a `DeploymentTarget` and its bound artifact into the Kubernetes
//! objects that serve it:
//!
//! - **Workload**: `apps/v1` Deployment with a rolling-update strategy
//! - **Autoscaler**: `autoscaling/v2` HorizontalPodAutoscaler, only with an HPA conf
//! - **Service**: ClusterIP Service exposing the serving port
//! - **Ingress**: host rule plus canary annotations for canary targets
//!
//! Compilation is pure: identical inputs always produce identical objects,
//! including the spec fingerprint annotation reconcilers diff against.
//!
//! ```rust,ignore
//! let compiled = TargetCompiler::new(&deployment, &target, &artifact, &cluster, &config)
//!     .with_deploy_token(&token)
//!     .with_owner_references(&option.owner_references)
//!     .compile()?;
//! ```

#![deny(missing_docs)]

mod autoscaler;
mod compiled;
mod compiler;
mod ingress;
mod quantity;
mod service;
mod workload;

pub use autoscaler::QPS_METRIC_NAME;
pub use compiled::CompiledTarget;
pub use compiler::TargetCompiler;
pub use ingress::{canary_annotations, CANARY_ANNOTATION_PREFIX};
pub use quantity::parse_quantity;
