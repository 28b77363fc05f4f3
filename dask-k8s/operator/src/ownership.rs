use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use thiserror::Error;

/// Controller owner reference pointing at `owner`.
///
/// Fails if the owner was never persisted, as only persisted objects carry a uid.
pub(crate) fn owner_reference<K>(owner: &K) -> Result<OwnerReference, OwnershipError>
where
    K: Resource<DynamicType = ()>,
{
    owner
        .controller_owner_ref(&())
        .ok_or_else(|| OwnershipError::MissingUid {
            kind: K::kind(&()).to_string(),
            name: owner.name_any(),
        })
}

/// Stamp `owner` onto `child` so the garbage collector removes the child
/// together with its owner. Adopting twice by the same owner is a no-op.
pub(crate) fn adopt<K: Resource>(child: &mut K, owner: &OwnerReference, namespace: &str) {
    let meta = child.meta_mut();
    meta.namespace = Some(namespace.to_owned());
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    if !refs.iter().any(|r| r.uid == owner.uid) {
        refs.push(owner.clone());
    }
}

/// True if `child` already names `owner` among its owners
pub(crate) fn is_owned_by<K: Resource>(child: &K, owner: &OwnerReference) -> bool {
    child.owner_references().iter().any(|r| r.uid == owner.uid)
}

#[derive(Debug, Error)]
pub(crate) enum OwnershipError {
    #[error("{kind} '{name}' has no uid and can not own other resources")]
    MissingUid { kind: String, name: String },
}
