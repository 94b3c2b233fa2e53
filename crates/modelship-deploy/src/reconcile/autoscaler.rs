//! Autoscaler reconciler
//!
//! Autoscalers are updated with a two-way JSON merge patch computed from the
//! live object to the desired one, so fields the API server defaults (such as
//! `spec.behavior`) are left alone.

use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use modelship_common::{Error, Result};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{diff_meta, log_foreign_token, Outcome};
use crate::cluster::ControlPlane;

const KIND: &str = "HorizontalPodAutoscaler";

/// Create, patch or delete the autoscaler for one target.
///
/// `desired` is `None` when the target has no autoscaling configured, in
/// which case a live autoscaler of the same name is deleted.
pub async fn reconcile(
    control_plane: &dyn ControlPlane,
    namespace: &str,
    name: &str,
    desired: Option<&HorizontalPodAutoscaler>,
) -> Result<Outcome> {
    let wrap = |e| Error::reconcile(KIND, name, e);
    let live = control_plane
        .get_autoscaler(namespace, name)
        .await
        .map_err(wrap)?;

    let (desired, live) = match (desired, live) {
        (None, None) => return Ok(Outcome::Unchanged),
        (None, Some(_)) => {
            control_plane
                .delete_autoscaler(namespace, name)
                .await
                .map_err(wrap)?;
            info!(kind = KIND, name, namespace, "deleted, autoscaling disabled");
            return Ok(Outcome::Deleted);
        }
        (Some(desired), None) => {
            control_plane
                .create_autoscaler(namespace, desired)
                .await
                .map_err(wrap)?;
            info!(kind = KIND, name, namespace, "created");
            return Ok(Outcome::Created);
        }
        (Some(desired), Some(live)) => {
            log_foreign_token(KIND, name, &diff_meta(&live.metadata, &desired.metadata));
            (desired, live)
        }
    };

    let patch = two_way_merge_patch(&owned_fields(&live)?, &owned_fields(desired)?);
    if is_empty_patch(&patch) {
        debug!(kind = KIND, name, "up to date");
        return Ok(Outcome::Unchanged);
    }

    control_plane
        .patch_autoscaler(namespace, name, &patch)
        .await
        .map_err(wrap)?;
    info!(kind = KIND, name, namespace, "patched");
    Ok(Outcome::Updated)
}

/// The subset of the object this engine owns
fn owned_fields(hpa: &HorizontalPodAutoscaler) -> Result<Value> {
    let meta = &hpa.metadata;
    Ok(json!({
        "metadata": {
            "labels": meta.labels,
            "annotations": meta.annotations,
            "ownerReferences": meta.owner_references,
        },
        "spec": serde_json::to_value(&hpa.spec).map_err(|e| Error::serialization(e.to_string()))?,
    }))
}

/// Compute a JSON merge patch that turns `original` into `modified`.
///
/// Objects are merged key by key; keys only present in `original` are kept
/// as they are. Arrays and scalars are replaced wholesale. A `null` on the
/// modified side means the field is not owned and is skipped.
pub fn two_way_merge_patch(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(orig), Value::Object(modi)) => {
            let mut patch = Map::new();
            for (key, value) in modi {
                if value.is_null() {
                    continue;
                }
                match orig.get(key) {
                    Some(existing @ Value::Object(_)) if value.is_object() => {
                        let nested = two_way_merge_patch(existing, value);
                        if !is_empty_patch(&nested) {
                            patch.insert(key.clone(), nested);
                        }
                    }
                    Some(existing) if existing == value => {}
                    _ => {
                        patch.insert(key.clone(), value.clone());
                    }
                }
            }
            Value::Object(patch)
        }
        _ => modified.clone(),
    }
}

fn is_empty_patch(patch: &Value) -> bool {
    patch.as_object().is_some_and(Map::is_empty)
}
