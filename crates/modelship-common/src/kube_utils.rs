//! Kubernetes helpers shared by the compiler and the reconcilers

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::Resource;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Compute a deterministic hash of any serializable value, as 16 hex chars.
///
/// `serde_json` serializes struct fields in declaration order and BTreeMaps in
/// key order, so identical inputs always hash identically.
pub fn deterministic_hash<T: Serialize>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value).map_err(|e| Error::serialization(e.to_string()))?;
    let digest = Sha256::digest(&bytes);
    Ok(hex::encode(&digest[..8]))
}

/// Build a non-controlling owner reference pointing at `owner`.
///
/// Returns `None` when the owner has not been persisted yet (no UID).
pub fn owner_reference<K>(owner: &K) -> Option<OwnerReference>
where
    K: Resource + k8s_openapi::Metadata<Ty = ObjectMeta>,
{
    let meta = owner.metadata();
    Some(OwnerReference {
        api_version: K::API_VERSION.to_string(),
        kind: K::KIND.to_string(),
        name: meta.name.clone()?,
        uid: meta.uid.clone()?,
        block_owner_deletion: Some(true),
        controller: None,
    })
}

/// Generate a fresh opaque rollout token
pub fn generate_deploy_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
