//! Resource reconcilers
//!
//! Each reconciler drives one kind toward its compiled desired state with
//! get-then-create-or-update semantics: a missing object is created, an
//! existing one is updated only when its structural diff is non-empty. The
//! diff covers the labels, annotations and owner references we own; the
//! spec is covered by the spec-hash annotation stamped at compile time.
//!
//! Reconcilers never retry. Every error is wrapped with the resource kind
//! and name so the orchestrator can aggregate them.

pub mod anchor;
pub mod autoscaler;
pub mod ingress;
pub mod namespace;
pub mod service;
pub mod workload;

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use modelship_common::naming::LABEL_DEPLOY_TOKEN;
use modelship_common::{Error, Result};
use modelship_compiler::CompiledTarget;
use tracing::warn;

use crate::cluster::ControlPlane;

/// What a reconciler did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Object did not exist and was created
    Created,
    /// Object existed and was updated in place
    Updated,
    /// Object was deleted and created again
    Recreated,
    /// Object was no longer desired and was deleted
    Deleted,
    /// Nothing to do
    Unchanged,
}

impl Outcome {
    /// Whether a mutating call was made
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Outcome::Unchanged)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::Recreated => "recreated",
            Outcome::Deleted => "deleted",
            Outcome::Unchanged => "unchanged",
        };
        f.write_str(s)
    }
}

/// Per-kind outcomes for one target
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetOutcome {
    /// Shared object name
    pub name: String,
    /// Workload outcome
    pub workload: Outcome,
    /// Autoscaler outcome
    pub autoscaler: Outcome,
    /// Service outcome
    pub service: Outcome,
    /// Ingress outcome
    pub ingress: Outcome,
}

impl TargetOutcome {
    /// Whether any object was mutated
    pub fn changed(&self) -> bool {
        [self.workload, self.autoscaler, self.service, self.ingress]
            .iter()
            .any(Outcome::is_mutation)
    }
}

/// Difference between a live object's metadata and the desired metadata
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetaDiff {
    /// Desired label keys missing or different on the live object
    pub labels: Vec<String>,
    /// Desired annotation keys missing or different on the live object
    pub annotations: Vec<String>,
    /// Owner references differ
    pub owner_references: bool,
    /// Rollout token found on the live object when it differs from ours
    pub foreign_token: Option<String>,
}

impl MetaDiff {
    /// Whether the live object already matches
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
            && self.annotations.is_empty()
            && !self.owner_references
            && self.foreign_token.is_none()
    }
}

/// Compute the structural diff of the metadata we own.
///
/// Keys present only on the live object are ignored; other controllers
/// are free to add their own labels and annotations.
pub fn diff_meta(live: &ObjectMeta, desired: &ObjectMeta) -> MetaDiff {
    let live_token = live
        .labels
        .as_ref()
        .and_then(|l| l.get(LABEL_DEPLOY_TOKEN));
    let desired_token = desired
        .labels
        .as_ref()
        .and_then(|l| l.get(LABEL_DEPLOY_TOKEN));
    let foreign_token = match (live_token, desired_token) {
        (Some(l), Some(d)) if l != d => Some(l.clone()),
        _ => None,
    };

    MetaDiff {
        labels: changed_keys(&live.labels, &desired.labels),
        annotations: changed_keys(&live.annotations, &desired.annotations),
        owner_references: owner_refs(&live.owner_references)
            != owner_refs(&desired.owner_references),
        foreign_token,
    }
}

fn changed_keys(
    live: &Option<BTreeMap<String, String>>,
    desired: &Option<BTreeMap<String, String>>,
) -> Vec<String> {
    desired
        .iter()
        .flatten()
        .filter(|(k, v)| live.as_ref().and_then(|l| l.get(*k)) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect()
}

fn owner_refs(refs: &Option<Vec<OwnerReference>>) -> &[OwnerReference] {
    refs.as_deref().unwrap_or_default()
}

/// Log a stale or foreign rollout token found on a live object
pub(crate) fn log_foreign_token(kind: &str, name: &str, diff: &MetaDiff) {
    if let Some(token) = &diff.foreign_token {
        warn!(
            kind,
            name,
            live_token = %token,
            "live object carries a different deploy token, treating as stale"
        );
    }
}

/// Namespace and name of a desired object
pub(crate) fn location<'a>(kind: &str, meta: &'a ObjectMeta) -> Result<(&'a str, &'a str)> {
    match (meta.namespace.as_deref(), meta.name.as_deref()) {
        (Some(namespace), Some(name)) => Ok((namespace, name)),
        _ => Err(Error::validation_for(
            kind,
            "desired object has no namespace or name",
        )),
    }
}

/// Reconcile every object of one compiled target, in dependency order.
///
/// The first failing object aborts the target.
pub async fn reconcile_target(
    control_plane: &dyn ControlPlane,
    compiled: &CompiledTarget,
) -> Result<TargetOutcome> {
    let workload =
        workload::reconcile(control_plane, &compiled.workload, compiled.autoscaler.is_some())
            .await?;
    let autoscaler = autoscaler::reconcile(
        control_plane,
        &compiled.namespace,
        &compiled.name,
        compiled.autoscaler.as_ref(),
    )
    .await?;
    let service = service::reconcile(control_plane, &compiled.service).await?;
    let ingress = ingress::reconcile(control_plane, &compiled.ingress).await?;

    Ok(TargetOutcome {
        name: compiled.name.clone(),
        workload,
        autoscaler,
        service,
        ingress,
    })
}
