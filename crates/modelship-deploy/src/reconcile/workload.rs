//! Workload (apps/v1 Deployment) reconciler

use k8s_openapi::api::apps::v1::Deployment as Workload;
use modelship_common::{Error, Result};
use tracing::{debug, info};

use super::{diff_meta, location, log_foreign_token, Outcome};
use crate::cluster::ControlPlane;

const KIND: &str = "Deployment";

/// Create or update a workload.
///
/// When an autoscaler manages the workload, the live replica count is kept
/// so an update never resets a scaled-out deployment.
pub async fn reconcile(
    control_plane: &dyn ControlPlane,
    desired: &Workload,
    autoscaled: bool,
) -> Result<Outcome> {
    let (namespace, name) = location(KIND, &desired.metadata)?;
    let wrap = |e| Error::reconcile(KIND, name, e);

    let Some(live) = control_plane
        .get_workload(namespace, name)
        .await
        .map_err(wrap)?
    else {
        control_plane
            .create_workload(namespace, desired)
            .await
            .map_err(wrap)?;
        info!(kind = KIND, name, namespace, "created");
        return Ok(Outcome::Created);
    };

    let diff = diff_meta(&live.metadata, &desired.metadata);
    log_foreign_token(KIND, name, &diff);
    if diff.is_empty() {
        debug!(kind = KIND, name, "up to date");
        return Ok(Outcome::Unchanged);
    }

    let mut update = desired.clone();
    update.metadata.resource_version = live.metadata.resource_version.clone();
    if autoscaled {
        let live_replicas = live.spec.as_ref().and_then(|s| s.replicas);
        if let (Some(spec), Some(replicas)) = (update.spec.as_mut(), live_replicas) {
            spec.replicas = Some(replicas);
        }
    }

    control_plane
        .replace_workload(namespace, &update)
        .await
        .map_err(wrap)?;
    info!(
        kind = KIND,
        name,
        namespace,
        labels = ?diff.labels,
        annotations = ?diff.annotations,
        "updated"
    );
    Ok(Outcome::Updated)
}
