use std::sync::Arc;

use crds::{DaskCluster, DaskWorkerGroup};
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use tracing::{debug, info};

use crate::cluster::{self, CreateClusterError};
use crate::workergroup::{self, AdoptError, ScaleError, ScaleOutcome};
use crate::Context;

/// Action to be taken upon a `DaskWorkerGroup` during reconciliation
#[derive(Debug, PartialEq, Eq)]
enum DecisionAction {
    /// Group is not controlled by its cluster yet, adopt it before scaling
    Adopt,
    /// Bring the worker count to the declared replicas
    Converge,
    /// Group is being deleted, the garbage collector removes the workers
    NoOp,
}

pub(crate) async fn reconcile_cluster(
    cluster: Arc<DaskCluster>,
    context: Arc<Context>,
) -> Result<Action, ReconciliationError> {
    if cluster.meta().deletion_timestamp.is_some() {
        debug!("DaskCluster {} is being deleted", cluster.name_any());
        return Ok(Action::await_change());
    }
    let cancel = context.shutdown.child_token();
    cluster::create(&context, &cluster, &cancel).await?;
    Ok(Action::requeue(context.config.requeue()))
}

pub(crate) async fn reconcile_worker_group(
    group: Arc<DaskWorkerGroup>,
    context: Arc<Context>,
) -> Result<Action, ReconciliationError> {
    let cancel = context.shutdown.child_token();
    let outcome = match make_decision(&group) {
        DecisionAction::NoOp => {
            debug!("DaskWorkerGroup {} is being deleted", group.name_any());
            return Ok(Action::await_change());
        }
        DecisionAction::Adopt => {
            let adopted = workergroup::adopt(&context, &group).await?;
            workergroup::converge(&context, &adopted, &cancel).await?
        }
        DecisionAction::Converge => workergroup::converge(&context, &group, &cancel).await?,
    };
    if outcome != ScaleOutcome::Unchanged {
        info!(
            "Worker group {} converged to {} replicas: {outcome:?}",
            group.name_any(),
            group.spec.worker.replicas
        );
    }
    Ok(Action::requeue(context.config.requeue()))
}

/// Decide what to do depending on the current state of the group
fn make_decision(group: &DaskWorkerGroup) -> DecisionAction {
    if group.meta().deletion_timestamp.is_some() {
        DecisionAction::NoOp
    } else if !group
        .owner_references()
        .iter()
        .any(|r| r.kind == "DaskCluster" && r.name == group.spec.cluster)
    {
        DecisionAction::Adopt
    } else {
        DecisionAction::Converge
    }
}

/// All errors possible to occur during reconciliation
#[derive(Debug, thiserror::Error)]
pub(crate) enum ReconciliationError {
    #[error(transparent)]
    CreateCluster(#[from] CreateClusterError),
    #[error(transparent)]
    Adopt(#[from] AdoptError),
    #[error(transparent)]
    Scale(#[from] ScaleError),
}
