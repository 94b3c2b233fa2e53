//! Per-revision owner anchors
//!
//! Every object generated for a revision carries an owner reference to a
//! small ConfigMap named after the revision. Deleting the anchor lets the
//! cluster garbage collector remove everything the revision owned, so
//! retiring a revision is a single delete. Anchors are found by label, so
//! revisions whose rollout failed midway are retired too.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use modelship_common::kube_utils::owner_reference;
use modelship_common::naming::{
    anchor_selector, owner_anchor_name, CREATOR, LABEL_CREATOR, LABEL_DEPLOYMENT, LABEL_REVISION,
};
use modelship_common::types::Deployment;
use modelship_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::cluster::ControlPlane;

const KIND: &str = "ConfigMap";

fn anchor(deployment: &Deployment, revision_id: u64) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(owner_anchor_name(deployment, revision_id)),
            namespace: Some(deployment.kube_namespace.clone()),
            labels: Some(BTreeMap::from([
                (LABEL_DEPLOYMENT.to_string(), deployment.name.clone()),
                (LABEL_CREATOR.to_string(), CREATOR.to_string()),
                (LABEL_REVISION.to_string(), revision_id.to_string()),
            ])),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Get or create the anchor for a revision and return an owner reference
/// to it.
pub async fn ensure(
    control_plane: &dyn ControlPlane,
    deployment: &Deployment,
    revision_id: u64,
) -> Result<OwnerReference> {
    let desired = anchor(deployment, revision_id);
    let namespace = deployment.kube_namespace.as_str();
    let name = owner_anchor_name(deployment, revision_id);
    let wrap = |e| Error::reconcile(KIND, name.as_str(), e);

    let live = match control_plane
        .get_anchor(namespace, &name)
        .await
        .map_err(wrap)?
    {
        Some(live) => {
            debug!(anchor = %name, "anchor exists");
            live
        }
        None => match control_plane.create_anchor(namespace, &desired).await {
            Ok(created) => {
                info!(anchor = %name, namespace, "created owner anchor");
                created
            }
            // Lost a race with a concurrent deploy of the same revision
            Err(e) if e.is_kube_conflict() => control_plane
                .get_anchor(namespace, &name)
                .await
                .map_err(wrap)?
                .ok_or_else(|| wrap(e))?,
            Err(e) => return Err(wrap(e)),
        },
    };

    owner_reference(&live).ok_or_else(|| {
        Error::internal_with_context(
            "anchor",
            format!("owner anchor {} has no uid", name),
        )
    })
}

/// Delete every anchor of the deployment except the one for `keep`.
///
/// Returns the names of the deleted anchors. Every anchor is attempted;
/// failures are aggregated.
pub async fn retire(
    control_plane: &dyn ControlPlane,
    deployment: &Deployment,
    keep: Option<u64>,
) -> Result<Vec<String>> {
    let namespace = deployment.kube_namespace.as_str();
    let kept = keep.map(|id| owner_anchor_name(deployment, id));
    let anchors = control_plane
        .list_anchors(namespace, &anchor_selector(deployment))
        .await
        .map_err(|e| Error::reconcile(KIND, deployment.name.as_str(), e))?;

    let mut retired = Vec::new();
    let mut errors = Vec::new();
    for name in anchors.into_iter().filter_map(|a| a.metadata.name) {
        if kept.as_deref() == Some(name.as_str()) {
            continue;
        }
        match control_plane.delete_anchor(namespace, &name).await {
            Ok(()) => {
                info!(anchor = %name, "deleted owner anchor");
                retired.push(name);
            }
            Err(e) => {
                warn!(anchor = %name, error = %e, "failed to delete owner anchor");
                errors.push(Error::reconcile(KIND, name.as_str(), e));
            }
        }
    }

    match Error::aggregate(errors) {
        Some(e) => Err(e),
        None => Ok(retired),
    }
}
