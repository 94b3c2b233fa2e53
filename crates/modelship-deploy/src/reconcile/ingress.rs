//! Ingress reconciler

use k8s_openapi::api::networking::v1::Ingress;
use modelship_common::{Error, Result};
use tracing::{debug, info};

use super::{diff_meta, location, log_foreign_token, Outcome};
use crate::cluster::ControlPlane;

const KIND: &str = "Ingress";

/// Create or update an ingress
pub async fn reconcile(control_plane: &dyn ControlPlane, desired: &Ingress) -> Result<Outcome> {
    let (namespace, name) = location(KIND, &desired.metadata)?;
    let wrap = |e| Error::reconcile(KIND, name, e);

    let Some(live) = control_plane
        .get_ingress(namespace, name)
        .await
        .map_err(wrap)?
    else {
        control_plane
            .create_ingress(namespace, desired)
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
    control_plane
        .replace_ingress(namespace, &update)
        .await
        .map_err(wrap)?;
    info!(kind = KIND, name, namespace, "updated");
    Ok(Outcome::Updated)
}
