//! Namespace creation

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use modelship_common::naming::{validate_dns_label, CREATOR, LABEL_CREATOR};
use modelship_common::{Error, Result};
use tracing::info;

use super::Outcome;
use crate::cluster::ControlPlane;

const KIND: &str = "Namespace";

/// Ensure the namespace exists. A concurrent create is not an error.
pub async fn ensure(control_plane: &dyn ControlPlane, name: &str) -> Result<Outcome> {
    validate_dns_label(name)?;
    let wrap = |e| Error::reconcile(KIND, name, e);

    if control_plane
        .get_namespace(name)
        .await
        .map_err(wrap)?
        .is_some()
    {
        return Ok(Outcome::Unchanged);
    }

    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                LABEL_CREATOR.to_string(),
                CREATOR.to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    };

    match control_plane.create_namespace(&namespace).await {
        Ok(_) => {
            info!(namespace = name, "created namespace");
            Ok(Outcome::Created)
        }
        Err(e) if e.is_kube_conflict() => Ok(Outcome::Unchanged),
        Err(e) => Err(wrap(e)),
    }
}
