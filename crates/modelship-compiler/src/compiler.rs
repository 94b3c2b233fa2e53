//! TargetCompiler: compiles one deployment target into desired objects
//!
//! This is the single entry point for turning a persisted target into the
//! Deployment, HPA, Service and Ingress the reconcilers converge on.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use modelship_common::config::CompilerConfig;
use modelship_common::kube_utils::deterministic_hash;
use modelship_common::naming::{self, ANNOTATION_SPEC_HASH};
use modelship_common::types::{Artifact, Cluster, Deployment, DeploymentTarget};
use modelship_common::{Error, Result};
use serde::Serialize;
use tracing::debug;

use crate::compiled::CompiledTarget;
use crate::{autoscaler, ingress, service, workload};

/// Compiles a `DeploymentTarget` into Kubernetes objects.
///
/// Uses a builder pattern for the rollout-scoped inputs:
///
/// ```rust,ignore
/// let compiled = TargetCompiler::new(&deployment, &target, &artifact, &cluster, &config)
///     .with_deploy_token(&token)
///     .with_owner_references(&owner_references)
///     .compile()?;
/// ```
pub struct TargetCompiler<'a> {
    deployment: &'a Deployment,
    target: &'a DeploymentTarget,
    artifact: &'a Artifact,
    cluster: &'a Cluster,
    config: &'a CompilerConfig,
    deploy_token: Option<&'a str>,
    owner_references: &'a [OwnerReference],
}

impl<'a> TargetCompiler<'a> {
    /// Create a compiler with the required inputs.
    pub fn new(
        deployment: &'a Deployment,
        target: &'a DeploymentTarget,
        artifact: &'a Artifact,
        cluster: &'a Cluster,
        config: &'a CompilerConfig,
    ) -> Self {
        Self {
            deployment,
            target,
            artifact,
            cluster,
            config,
            deploy_token: None,
            owner_references: &[],
        }
    }

    /// Stamp `token` instead of the deployment's persisted token.
    pub fn with_deploy_token(mut self, token: &'a str) -> Self {
        self.deploy_token = Some(token);
        self
    }

    /// Owner references attached to every generated object.
    pub fn with_owner_references(mut self, owner_references: &'a [OwnerReference]) -> Self {
        self.owner_references = owner_references;
        self
    }

    /// Compile the target.
    pub fn compile(self) -> Result<CompiledTarget> {
        let name = naming::target_resource_name(self.deployment, self.target);
        naming::validate_dns_label(&name)?;

        let token = self
            .deploy_token
            .unwrap_or(self.deployment.deploy_token.as_str());

        let ctx = TargetContext {
            name: name.clone(),
            deployment: self.deployment,
            target: self.target,
            artifact: self.artifact,
            cluster: self.cluster,
            config: self.config,
            labels: naming::target_labels(self.deployment, self.target, token),
            selector: naming::target_selector(self.deployment, self.target),
            annotations: naming::artifact_annotations(self.artifact),
            owner_references: self.owner_references,
        };

        let mut workload = workload::compile(&ctx)?;
        stamp_spec_hash(&mut workload.metadata, &workload.spec)?;

        let mut autoscaler = autoscaler::compile(&ctx, &name)?;
        if let Some(hpa) = autoscaler.as_mut() {
            stamp_spec_hash(&mut hpa.metadata, &hpa.spec)?;
        }

        let mut service = service::compile(&ctx);
        stamp_spec_hash(&mut service.metadata, &service.spec)?;

        let mut ingress = ingress::compile(&ctx, &name)?;
        stamp_spec_hash(&mut ingress.metadata, &ingress.spec)?;

        debug!(
            deployment = %self.deployment.name,
            target = self.target.id,
            name = %name,
            autoscaler = autoscaler.is_some(),
            "compiled target"
        );

        Ok(CompiledTarget {
            name,
            namespace: self.deployment.kube_namespace.clone(),
            workload,
            autoscaler,
            service,
            ingress,
        })
    }
}

/// Inputs shared by the per-kind compilers
pub(crate) struct TargetContext<'a> {
    pub name: String,
    pub deployment: &'a Deployment,
    pub target: &'a DeploymentTarget,
    pub artifact: &'a Artifact,
    pub cluster: &'a Cluster,
    pub config: &'a CompilerConfig,
    pub labels: BTreeMap<String, String>,
    pub selector: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub owner_references: &'a [OwnerReference],
}

impl TargetContext<'_> {
    pub fn object_meta(&self) -> ObjectMeta {
        ObjectMeta {
            name: Some(self.name.clone()),
            namespace: Some(self.deployment.kube_namespace.clone()),
            labels: Some(self.labels.clone()),
            annotations: Some(self.annotations.clone()),
            owner_references: if self.owner_references.is_empty() {
                None
            } else {
                Some(self.owner_references.to_vec())
            },
            ..Default::default()
        }
    }

    pub fn int32(&self, field: &str, value: u32) -> Result<i32> {
        int32(&self.name, field, value)
    }
}

/// Narrow a configured count to the API's `int32`
pub(crate) fn int32(subject: &str, field: &str, value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| {
        Error::validation_for(
            subject,
            format!("{} {} exceeds the maximum of {}", field, value, i32::MAX),
        )
    })
}

/// Record a fingerprint of everything a reconciler owns on the object.
fn stamp_spec_hash<S: Serialize>(metadata: &mut ObjectMeta, spec: &S) -> Result<()> {
    let hash = deterministic_hash(&(
        &metadata.labels,
        &metadata.annotations,
        &metadata.owner_references,
        spec,
    ))?;
    metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(ANNOTATION_SPEC_HASH.to_string(), hash);
    Ok(())
}
