//! Naming and labeling for generated cluster objects
//!
//! Every name, label and annotation here is a pure function of persisted
//! fields, so any component (image builder, URL reporting, the status
//! observer) can locate generated objects without extra state.

use std::collections::BTreeMap;

use crate::types::{Artifact, Deployment, DeploymentTarget, TargetType};
use crate::{Error, Result};

/// Prefix for every generated object name
pub const KUBE_NAME_PREFIX: &str = "modelship";

/// Value of the creator label
pub const CREATOR: &str = "modelship";

/// Label: deployment name
pub const LABEL_DEPLOYMENT: &str = "modelship.io/deployment";
/// Label: creator tag
pub const LABEL_CREATOR: &str = "modelship.io/creator";
/// Label: target type (stable/canary)
pub const LABEL_TARGET_TYPE: &str = "modelship.io/deployment-target-type";
/// Label: target id, set on canary objects only
pub const LABEL_TARGET_ID: &str = "modelship.io/deployment-target-id";
/// Label: rollout token the object was stamped with
pub const LABEL_DEPLOY_TOKEN: &str = "modelship.io/deploy-token";
/// Label: revision an owner anchor belongs to
pub const LABEL_REVISION: &str = "modelship.io/deployment-revision";

/// Annotation: bound artifact name
pub const ANNOTATION_ARTIFACT_NAME: &str = "modelship.io/artifact-name";
/// Annotation: bound artifact version
pub const ANNOTATION_ARTIFACT_VERSION: &str = "modelship.io/artifact-version";
/// Annotation: fingerprint of the desired spec last applied
pub const ANNOTATION_SPEC_HASH: &str = "modelship.io/spec-hash";

/// Maximum length of a DNS-1123 label
pub const MAX_NAME_LEN: usize = 63;

/// Validate that `name` is a DNS-1123 label.
pub fn validate_dns_label(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation_for(name, "name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::validation_for(
            name,
            format!("name exceeds {} characters", MAX_NAME_LEN),
        ));
    }
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_chars {
        return Err(Error::validation_for(
            name,
            "name may only contain lowercase alphanumerics and '-'",
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(Error::validation_for(
            name,
            "name must start and end with an alphanumeric character",
        ));
    }
    Ok(())
}

/// `<prefix>-<deployment-name>`
pub fn base_name(deployment: &Deployment) -> String {
    format!("{}-{}", KUBE_NAME_PREFIX, deployment.name)
}

/// Name shared by the workload, autoscaler, service and ingress of a target.
///
/// Canary targets carry their id so concurrent canaries never collide.
pub fn target_resource_name(deployment: &Deployment, target: &DeploymentTarget) -> String {
    let base = base_name(deployment);
    match target.type_ {
        TargetType::Stable => format!("{}-{}", base, TargetType::Stable.short_code()),
        TargetType::Canary => format!(
            "{}-{}-{}",
            base,
            TargetType::Canary.short_code(),
            target.id
        ),
    }
}

/// Name of the owner-anchor object for a revision
pub fn owner_anchor_name(deployment: &Deployment, revision_id: u64) -> String {
    format!("{}-rev-{}", base_name(deployment), revision_id)
}

/// Validate every name a deploy of `targets` would generate.
pub fn validate_generated_names(
    deployment: &Deployment,
    revision_id: u64,
    targets: &[DeploymentTarget],
) -> Result<()> {
    validate_dns_label(&deployment.name)?;
    validate_dns_label(&deployment.kube_namespace)?;
    validate_dns_label(&owner_anchor_name(deployment, revision_id))?;
    for target in targets {
        validate_dns_label(&target_resource_name(deployment, target))?;
    }
    Ok(())
}

/// Labels shared by every object generated for a deployment
pub fn deployment_labels(deployment: &Deployment) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_DEPLOYMENT.to_string(), deployment.name.clone()),
        (LABEL_CREATOR.to_string(), CREATOR.to_string()),
        (
            LABEL_DEPLOY_TOKEN.to_string(),
            deployment.deploy_token.clone(),
        ),
    ])
}

/// Labels for objects generated for one target.
///
/// `deploy_token` is passed explicitly since a forced rollout stamps the
/// rotated token before it is visible on the persisted deployment.
pub fn target_labels(
    deployment: &Deployment,
    target: &DeploymentTarget,
    deploy_token: &str,
) -> BTreeMap<String, String> {
    let mut labels = deployment_labels(deployment);
    labels.insert(LABEL_DEPLOY_TOKEN.to_string(), deploy_token.to_string());
    labels.insert(LABEL_TARGET_TYPE.to_string(), target.type_.to_string());
    if target.type_ == TargetType::Canary {
        labels.insert(LABEL_TARGET_ID.to_string(), target.id.to_string());
    }
    labels
}

/// Labels that select a target's pods. Excludes the rollout token so a
/// token rotation never changes an immutable Deployment selector.
pub fn target_selector(
    deployment: &Deployment,
    target: &DeploymentTarget,
) -> BTreeMap<String, String> {
    let mut selector = BTreeMap::from([
        (LABEL_DEPLOYMENT.to_string(), deployment.name.clone()),
        (LABEL_TARGET_TYPE.to_string(), target.type_.to_string()),
    ]);
    if target.type_ == TargetType::Canary {
        selector.insert(LABEL_TARGET_ID.to_string(), target.id.to_string());
    }
    selector
}

/// Label selector string matching every pod of a deployment
pub fn deployment_pod_selector(deployment: &Deployment) -> String {
    format!("{}={}", LABEL_DEPLOYMENT, deployment.name)
}

/// Label selector string matching every owner anchor of a deployment
pub fn anchor_selector(deployment: &Deployment) -> String {
    format!(
        "{}={},{}={},{}",
        LABEL_DEPLOYMENT, deployment.name, LABEL_CREATOR, CREATOR, LABEL_REVISION
    )
}

/// Annotations describing the bound artifact
pub fn artifact_annotations(artifact: &Artifact) -> BTreeMap<String, String> {
    BTreeMap::from([
        (ANNOTATION_ARTIFACT_NAME.to_string(), artifact.name.clone()),
        (
            ANNOTATION_ARTIFACT_VERSION.to_string(),
            artifact.version.clone(),
        ),
    ])
}

/// Public host for a deployment.
///
/// An IP ingress address is expanded through sslip.io so it resolves
/// without DNS setup; anything else is treated as a wildcard domain.
pub fn ingress_host(deployment: &Deployment, ingress_address: &str) -> String {
    let domain = if ingress_address.parse::<std::net::IpAddr>().is_ok() {
        format!("{}.sslip.io", ingress_address)
    } else {
        ingress_address.trim_start_matches("*.").to_string()
    };
    format!("{}-{}.{}", deployment.name, deployment.kube_namespace, domain)
}
