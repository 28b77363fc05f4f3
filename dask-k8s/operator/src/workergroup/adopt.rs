use crds::DaskWorkerGroup;
use kube::ResourceExt;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::ownership::{self, is_owned_by, owner_reference, OwnershipError};
use crate::platform::PlatformError;
use crate::Context;

/// Make the cluster named in `group.spec.cluster` the controlling owner of `group`.
///
/// Returns the group as stored after adoption. A group which is already
/// owned by its cluster is returned unchanged without contacting the API.
pub(crate) async fn adopt(
    context: &Context,
    group: &DaskWorkerGroup,
) -> Result<DaskWorkerGroup, AdoptError> {
    let name = group.name_any();
    let namespace = group.namespace().unwrap_or_else(|| "default".to_owned());
    let cluster_name = &group.spec.cluster;

    let cluster = match context.api.get_cluster(&namespace, cluster_name).await {
        Ok(cluster) => cluster,
        Err(e) if e.is_not_found() => {
            return Err(AdoptError::ClusterNotFound {
                cluster: cluster_name.clone(),
                group: name,
            })
        }
        Err(e) => return Err(e.into()),
    };
    let owner = owner_reference(&cluster)?;
    if is_owned_by(group, &owner) {
        debug!("Worker group {name} is already owned by {cluster_name}");
        return Ok(group.clone());
    }

    let mut adopted = group.clone();
    ownership::adopt(&mut adopted, &owner, &namespace);
    let patch = json!({
        "metadata": {"ownerReferences": adopted.owner_references()}
    });
    let stored = context
        .api
        .patch_worker_group(&namespace, &name, &patch)
        .await?;
    info!("Successfully adopted worker group {name} by {cluster_name}");
    Ok(stored)
}

#[derive(Debug, Error)]
pub(crate) enum AdoptError {
    #[error("Worker group {group} names cluster {cluster}, which does not exist")]
    ClusterNotFound { cluster: String, group: String },
    #[error("Error from Kubernetes: {0}")]
    Kubernetes(#[from] PlatformError),
    #[error(transparent)]
    Ownership(#[from] OwnershipError),
}
