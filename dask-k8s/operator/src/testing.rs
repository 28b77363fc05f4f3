//! Fixtures shared by the reconciler tests
use std::sync::Arc;

use crds::{manifests, DaskWorkerGroup, WorkerSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec};
use tokio_util::sync::CancellationToken;

use crate::config::test_config;
use crate::coordinator_api::MockCoordinator;
use crate::platform::fake::FakeCluster;
use crate::Context;

/// Minimal single container worker template
pub(crate) fn worker_template() -> PodSpec {
    PodSpec {
        containers: vec![Container {
            name: "worker".to_owned(),
            image: Some("ghcr.io/dask/dask:latest".to_owned()),
            args: Some(vec!["dask-worker".to_owned()]),
            ..Container::default()
        }],
        ..PodSpec::default()
    }
}

/// Default worker group of cluster `foo`, not yet persisted
pub(crate) fn group_with_replicas(replicas: i32) -> DaskWorkerGroup {
    manifests::worker_group(
        "foo",
        &WorkerSpec {
            replicas,
            spec: worker_template(),
        },
    )
}

pub(crate) fn test_context(api: Arc<FakeCluster>, coordinator: MockCoordinator) -> Context {
    Context {
        api,
        coordinator: Arc::new(coordinator),
        config: test_config(),
        shutdown: CancellationToken::new(),
    }
}
