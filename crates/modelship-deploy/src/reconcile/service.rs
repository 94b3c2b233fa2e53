//! Service reconciler

use k8s_openapi::api::core::v1::{Service, ServiceSpec};
use modelship_common::{Error, Result};
use tracing::{debug, info};

use super::{diff_meta, location, log_foreign_token, Outcome};
use crate::cluster::ControlPlane;

const KIND: &str = "Service";

/// Create or update a service.
///
/// Cluster IP assignments are immutable, so an update carries them over from
/// the live object. Switching between headless, ExternalName and a regular
/// service cannot be done in place and recreates the object instead.
pub async fn reconcile(control_plane: &dyn ControlPlane, desired: &Service) -> Result<Outcome> {
    let (namespace, name) = location(KIND, &desired.metadata)?;
    let wrap = |e| Error::reconcile(KIND, name, e);

    let Some(live) = control_plane
        .get_service(namespace, name)
        .await
        .map_err(wrap)?
    else {
        control_plane
            .create_service(namespace, desired)
            .await
            .map_err(wrap)?;
        info!(kind = KIND, name, namespace, "created");
        return Ok(Outcome::Created);
    };

    let diff = diff_meta(&live.metadata, &desired.metadata);
    log_foreign_token(KIND, name, &diff);

    if shape(live.spec.as_ref()) != shape(desired.spec.as_ref()) {
        control_plane
            .delete_service(namespace, name)
            .await
            .map_err(wrap)?;
        control_plane
            .create_service(namespace, desired)
            .await
            .map_err(wrap)?;
        info!(kind = KIND, name, namespace, "recreated, service type changed");
        return Ok(Outcome::Recreated);
    }

    if diff.is_empty() {
        debug!(kind = KIND, name, "up to date");
        return Ok(Outcome::Unchanged);
    }

    let mut update = desired.clone();
    update.metadata.resource_version = live.metadata.resource_version.clone();
    if let (Some(spec), Some(live_spec)) = (update.spec.as_mut(), live.spec.as_ref()) {
        spec.cluster_ip = live_spec.cluster_ip.clone();
        spec.cluster_ips = live_spec.cluster_ips.clone();
        spec.ip_families = live_spec.ip_families.clone();
    }

    control_plane
        .replace_service(namespace, &update)
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

/// Properties of a service that cannot change in place
#[derive(Debug, PartialEq, Eq)]
struct Shape {
    headless: bool,
    external_name: bool,
}

fn shape(spec: Option<&ServiceSpec>) -> Shape {
    Shape {
        headless: spec.and_then(|s| s.cluster_ip.as_deref()) == Some("None"),
        external_name: spec.and_then(|s| s.type_.as_deref()) == Some("ExternalName"),
    }
}
