//! Dask Kubernetes operator
use std::future::Future;
use std::sync::Arc;

use crds::{DaskCluster, DaskWorkerGroup, COMPONENT_LABEL};
use envconfig::Envconfig;
use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use kube_runtime::controller::Action;
use kube_runtime::watcher::Config;
use kube_runtime::Controller;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::OperatorConfig;
use crate::coordinator_api::{Coordinator, DaskSchedulerRpc};
use crate::platform::{ClusterApi, KubeClusterApi};
use crate::reconciliation::{reconcile_cluster, reconcile_worker_group, ReconciliationError};

mod cluster;
mod config;
mod coordinator_api;
mod ownership;
mod platform;
mod readiness;
mod reconciliation;
#[cfg(test)]
mod testing;
mod workergroup;

/// Main entry point
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let config = OperatorConfig::init_from_env().expect("Expected a valid operator configuration.");
    let kubernetes_client: Client = Client::try_default()
        .await
        .expect("Expected a valid KUBECONFIG environment variable.");

    let (clusters, groups, pods): (Api<DaskCluster>, Api<DaskWorkerGroup>, Api<Pod>) =
        match config.namespace.as_deref() {
            Some(namespace) => {
                info!("Watching namespace {namespace}");
                (
                    Api::namespaced(kubernetes_client.clone(), namespace),
                    Api::namespaced(kubernetes_client.clone(), namespace),
                    Api::namespaced(kubernetes_client.clone(), namespace),
                )
            }
            None => (
                Api::all(kubernetes_client.clone()),
                Api::all(kubernetes_client.clone()),
                Api::all(kubernetes_client.clone()),
            ),
        };

    let shutdown = CancellationToken::new();
    let context: Arc<Context> = Arc::new(Context {
        api: Arc::new(KubeClusterApi::new(
            kubernetes_client,
            config.field_manager.clone(),
        )),
        coordinator: Arc::new(DaskSchedulerRpc::new(
            config.coordinator.connect_timeout(),
            config.coordinator.rpc_timeout(),
        )),
        config,
        shutdown: shutdown.clone(),
    });

    // in-flight readiness waits and scheduler calls give up once the process is asked to stop
    tokio::spawn(cancel_on(shutdown, shutdown_signal()));

    let cluster_controller = Controller::new(clusters, Config::default())
        .shutdown_on_signal()
        .run(reconcile_cluster, on_cluster_error, context.clone())
        .for_each(|res| async move {
            match res {
                Ok(x) => debug!("{x:?}"),
                Err(e) => error!("{e:?}"),
            }
        });

    let worker_group_controller = Controller::new(groups, Config::default())
        .owns(
            pods,
            Config::default().labels(&format!("{COMPONENT_LABEL}=worker")),
        )
        .shutdown_on_signal()
        .run(reconcile_worker_group, on_worker_group_error, context)
        .for_each(|res| async move {
            match res {
                Ok(x) => debug!("{x:?}"),
                Err(e) => error!("{e:?}"),
            }
        });

    info!("Starting DaskCluster and DaskWorkerGroup controllers");
    futures::join!(cluster_controller, worker_group_controller);
    info!("Controllers stopped");
}

/// Context for `Controller`
pub(crate) struct Context {
    /// Kubernetes API used by every reconciler
    pub api: Arc<dyn ClusterApi>,
    /// Scheduler RPC used when scaling down
    pub coordinator: Arc<dyn Coordinator>,
    pub config: OperatorConfig,
    /// Cancelled on shutdown
    pub shutdown: CancellationToken,
}

/// Resolves on SIGINT or SIGTERM, the latter being how Kubernetes stops a pod
async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            error!("Can not listen for SIGTERM: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
}

/// Cancel `shutdown` once `signal` resolves
async fn cancel_on(shutdown: CancellationToken, signal: impl Future<Output = ()>) {
    signal.await;
    info!("Shutdown requested");
    shutdown.cancel();
}

/// Error function to call when the DaskCluster controller receives an error
fn on_cluster_error(
    cluster: Arc<DaskCluster>,
    error: &ReconciliationError,
    context: Arc<Context>,
) -> Action {
    error!(
        "Reconciliation of DaskCluster {:?} failed: {error}",
        cluster.metadata.name
    );
    Action::requeue(context.config.error_requeue())
}

/// Error function to call when the DaskWorkerGroup controller receives an error
fn on_worker_group_error(
    group: Arc<DaskWorkerGroup>,
    error: &ReconciliationError,
    context: Arc<Context>,
) -> Action {
    error!(
        "Reconciliation of DaskWorkerGroup {:?} failed: {error}",
        group.metadata.name
    );
    Action::requeue(context.config.error_requeue())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::platform::fake::FakeCluster;
    use crate::readiness::{wait_for_service, WaitError};

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_waits_of_running_reconciles() {
        let api = FakeCluster::default();
        let shutdown = CancellationToken::new();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(cancel_on(shutdown.clone(), async move {
            let _ = stopped.await;
        }));

        let reconcile_token = shutdown.child_token();
        let config = test_config();
        let wait = wait_for_service(
            &api,
            "dask",
            "never-created",
            &config.readiness,
            &reconcile_token,
        );
        tokio::pin!(wait);

        // still waiting before the signal
        assert!(tokio::time::timeout(std::time::Duration::from_secs(1), &mut wait)
            .await
            .is_err());

        stop.send(()).unwrap();
        let started = tokio::time::Instant::now();
        let err = wait.await.unwrap_err();
        assert!(matches!(err, WaitError::Cancelled { .. }));
        // well before the 120 s deadline
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }
}
