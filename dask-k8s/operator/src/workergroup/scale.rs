use std::cmp::Ordering;
use std::collections::BTreeSet;

use crds::{manifests, DaskWorkerGroup, DaskWorkerGroupSpec, DaskWorkerGroupStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::coordinator_api::{self, CoordinatorError};
use crate::ownership::{adopt, owner_reference, OwnershipError};
use crate::platform::{worker_group_selector, PlatformError};
use crate::readiness::{wait_for_service, WaitError};
use crate::Context;

/// Worker attribute the scheduler keys its retirement proposal by
const CLOSE_BY_ATTRIBUTE: &str = "name";

/// What a convergence pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScaleOutcome {
    Unchanged,
    ScaledUp {
        created: Vec<String>,
    },
    ScaledDown {
        deleted: Vec<String>,
        /// Names proposed by the scheduler which were not deleted
        skipped: Vec<String>,
    },
}

/// Bring the number of live worker pods of `group` to the declared replica count.
///
/// The current count is recomputed from the pods labelled with the group
/// name on every call, so calling this repeatedly is safe. Scaling down asks
/// the cluster's scheduler which workers to retire instead of choosing itself.
pub(crate) async fn converge(
    context: &Context,
    group: &DaskWorkerGroup,
    cancel: &CancellationToken,
) -> Result<ScaleOutcome, ScaleError> {
    let name = group.name_any();
    let namespace = group.namespace().unwrap_or_else(|| "default".to_owned());
    let desired = group.spec.worker.replicas;
    if desired < 0 {
        return Err(ScaleError::InvalidReplicas {
            group: name,
            replicas: desired,
        });
    }

    let pods = context
        .api
        .list_pods(&namespace, &worker_group_selector(&name))
        .await?;
    // pods already on their way out are not part of the group anymore
    let live: BTreeSet<String> = pods
        .iter()
        .filter(|p| p.metadata.deletion_timestamp.is_none())
        .map(ResourceExt::name_any)
        .collect();
    let current = live.len();
    let delta = i64::from(desired) - current as i64;
    debug!("Worker group {name} has {current} workers, wants {desired}");

    let outcome = match delta.cmp(&0) {
        Ordering::Equal => ScaleOutcome::Unchanged,
        Ordering::Greater => {
            let owner = owner_reference(group)?;
            let mut created = Vec::new();
            for _ in 0..delta {
                let worker =
                    provision_worker(context, &namespace, &name, &group.spec, &owner, cancel)
                        .await?;
                created.push(worker);
            }
            info!("Scaled worker group {name} up to {desired} workers.");
            ScaleOutcome::ScaledUp { created }
        }
        Ordering::Less => {
            let n = (-delta) as usize;
            let (deleted, skipped) =
                retire_workers(context, &namespace, &name, &group.spec.cluster, live, n, cancel)
                    .await?;
            if skipped.is_empty() {
                info!("Scaled worker group {name} down to {desired} workers.");
            } else {
                warn!(
                    "Scaled worker group {name} towards {desired} workers, skipped {} proposed names",
                    skipped.len()
                );
            }
            ScaleOutcome::ScaledDown { deleted, skipped }
        }
    };

    let observed = match &outcome {
        ScaleOutcome::Unchanged => current,
        ScaleOutcome::ScaledUp { created } => current + created.len(),
        ScaleOutcome::ScaledDown { deleted, .. } => current - deleted.len(),
    };
    context
        .api
        .patch_worker_group_status(
            &namespace,
            &name,
            &DaskWorkerGroupStatus {
                replicas: i32::try_from(observed).unwrap_or(i32::MAX),
            },
        )
        .await?;

    Ok(outcome)
}

/// Random, practically unique name of a new worker in `group`
pub(crate) fn generate_worker_name(group: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    manifests::worker_name(group, &suffix[..10])
}

/// Create identity, service and pod of a single new worker.
///
/// The pod is only created once its service can be read back.
async fn provision_worker(
    context: &Context,
    namespace: &str,
    group: &str,
    spec: &DaskWorkerGroupSpec,
    owner: &OwnerReference,
    cancel: &CancellationToken,
) -> Result<String, ScaleError> {
    let worker = generate_worker_name(group);
    let api = &*context.api;

    let mut account = manifests::worker_service_account(&spec.cluster, group, &worker);
    adopt(&mut account, owner, namespace);
    api.create_service_account(namespace, &account).await?;

    let mut service = manifests::worker_service(&spec.cluster, group, &worker);
    adopt(&mut service, owner, namespace);
    api.create_service(namespace, &service).await?;
    wait_for_service(
        api,
        namespace,
        &service.name_any(),
        &context.config.readiness,
        cancel,
    )
    .await?;

    let mut pod = manifests::worker_pod(group, &spec.cluster, &worker, &spec.worker.spec);
    adopt(&mut pod, owner, namespace);
    api.create_pod(namespace, &pod).await?;

    debug!("Created worker {worker} in {namespace}");
    Ok(worker)
}

/// Ask the scheduler for `n` workers to close and delete their pods.
///
/// Names the scheduler returns are only acted upon if they belong to the
/// live workers of this group.
#[allow(clippy::too_many_arguments)]
async fn retire_workers(
    context: &Context,
    namespace: &str,
    group: &str,
    cluster: &str,
    mut live: BTreeSet<String>,
    n: usize,
    cancel: &CancellationToken,
) -> Result<(Vec<String>, Vec<String>), ScaleError> {
    let coordinator = &context.config.coordinator;
    let service = coordinator_api::coordinator_service_name(group, &coordinator.service_suffix);
    if service != format!("{cluster}{}", coordinator.service_suffix) {
        warn!(
            "Looking up the scheduler of {group} as '{service}', which is not derived from its cluster '{cluster}'"
        );
    }
    let address =
        coordinator_api::resolve_address(&*context.api, namespace, &service, &coordinator.port_name)
            .await?;
    let proposed = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            return Err(ScaleError::Cancelled {
                group: group.to_owned(),
            })
        }
        res = context.coordinator.workers_to_close(&address, n, CLOSE_BY_ATTRIBUTE) => res?,
    };
    info!("Workers to close: {proposed:?}");

    let mut deleted = Vec::new();
    let mut skipped = Vec::new();
    for worker in proposed {
        if deleted.len() == n {
            warn!("Scheduler proposed more than {n} workers, not closing {worker}");
            skipped.push(worker);
            continue;
        }
        if !live.remove(&worker) {
            warn!("Scheduler proposed closing {worker}, which is not a live worker of {group}");
            skipped.push(worker);
            continue;
        }
        match context.api.delete_pod(namespace, &worker).await {
            Ok(()) => deleted.push(worker),
            Err(e) if e.is_not_found() => {
                warn!("Attempted to delete worker pod '{worker}' but it does not exist");
                skipped.push(worker);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok((deleted, skipped))
}

#[derive(Debug, Error)]
pub(crate) enum ScaleError {
    #[error("Worker group {group} requests {replicas} replicas")]
    InvalidReplicas { group: String, replicas: i32 },
    #[error("Error from Kubernetes: {0}")]
    Kubernetes(#[from] PlatformError),
    #[error(transparent)]
    Ownership(#[from] OwnershipError),
    #[error("Error waiting for worker service: {0}")]
    Wait(#[from] WaitError),
    #[error("Error asking the scheduler which workers to close: {0}")]
    Coordinator(#[from] CoordinatorError),
    #[error("Scaling down worker group {group} was cancelled")]
    Cancelled { group: String },
}
