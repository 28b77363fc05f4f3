//! Materialization of a DaskCluster: the scheduler with its identity and
//! service, plus the default worker group.
use crds::{manifests, DaskCluster};
use kube::ResourceExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ownership::{adopt, owner_reference, OwnershipError};
use crate::platform::{Applied, PlatformError};
use crate::readiness::{wait_for_service, WaitError};
use crate::Context;

/// Ensure every child resource of `cluster` exists.
///
/// Children are created in order: scheduler service account, scheduler pod,
/// scheduler service and, once the service is readable, the default worker
/// group. Children which already exist are left untouched, so a repeated
/// call completes a previously interrupted one.
pub(crate) async fn create(
    context: &Context,
    cluster: &DaskCluster,
    cancel: &CancellationToken,
) -> Result<(), CreateClusterError> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_owned());
    let owner = owner_reference(cluster)?;
    let api = &*context.api;
    debug!("Reconciling DaskCluster {name} in {namespace}");

    let mut account = manifests::scheduler_service_account(&name);
    adopt(&mut account, &owner, &namespace);
    let applied = api.create_service_account(&namespace, &account).await?;
    log_applied(applied, "scheduler service account", &account.name_any(), &namespace);

    let mut pod = manifests::scheduler_pod(&name, &cluster.spec.scheduler.spec);
    adopt(&mut pod, &owner, &namespace);
    let applied = api.create_pod(&namespace, &pod).await?;
    log_applied(applied, "scheduler pod", &pod.name_any(), &namespace);

    let mut service = manifests::scheduler_service(&name, &cluster.spec.scheduler.service);
    adopt(&mut service, &owner, &namespace);
    let service_name = service.name_any();
    let applied = api.create_service(&namespace, &service).await?;
    log_applied(applied, "scheduler service", &service_name, &namespace);
    wait_for_service(
        api,
        &namespace,
        &service_name,
        &context.config.readiness,
        cancel,
    )
    .await?;

    let mut group = manifests::worker_group(&name, &cluster.spec.worker);
    adopt(&mut group, &owner, &namespace);
    let applied = api.create_worker_group(&namespace, &group).await?;
    log_applied(applied, "worker group", &group.name_any(), &namespace);

    if applied == Applied::Created {
        info!("A DaskCluster has been created called {name} in {namespace}");
    }
    Ok(())
}

fn log_applied(applied: Applied, what: &str, name: &str, namespace: &str) {
    match applied {
        Applied::Created => info!("Created {what} {name} in {namespace}"),
        Applied::AlreadyExists => debug!("The {what} {name} in {namespace} already exists"),
    }
}

#[derive(Debug, Error)]
pub(crate) enum CreateClusterError {
    #[error("Error from Kubernetes: {0}")]
    Kubernetes(#[from] PlatformError),
    #[error(transparent)]
    Ownership(#[from] OwnershipError),
    #[error("Scheduler service did not come up: {0}")]
    Wait(#[from] WaitError),
}
