//! Builders for the declarative bodies the operator submits.
//!
//! Every function here is pure: given a logical name, the owning cluster
//! and the user supplied template it returns the resource body. Nothing is
//! validated; a malformed template surfaces as an API server rejection when
//! the body is submitted.
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    EnvVar, Pod, PodSpec, Service, ServiceAccount, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

use crate::{
    DaskCluster, DaskClusterSpec, DaskWorkerGroup, DaskWorkerGroupSpec, SchedulerSpec,
    WorkerSpec, CLUSTER_NAME_LABEL, COMPONENT_LABEL, WORKERGROUP_NAME_LABEL, WORKER_NAME_LABEL,
};

/// Port workers use for scheduler and peer communication
pub const WORKER_COMM_PORT: i32 = 8788;
/// Port serving the worker dashboard
pub const WORKER_DASHBOARD_PORT: i32 = 8787;
/// Environment variable telling a worker its own name
pub const WORKER_NAME_ENV: &str = "DASK_WORKER_NAME";

/// Name of the scheduler pod of `cluster`
pub fn scheduler_name(cluster: &str) -> String {
    format!("{cluster}-scheduler")
}

/// Name shared by the scheduler service and the scheduler service account
pub fn scheduler_service_name(cluster: &str) -> String {
    format!("{cluster}-scheduler-service")
}

/// Name of the worker group every cluster gets on creation
pub fn default_worker_group_name(cluster: &str) -> String {
    format!("{cluster}-default-worker-group")
}

/// Name of a worker in `group` given an already randomized suffix
pub fn worker_name(group: &str, suffix: &str) -> String {
    format!("{group}-worker-{suffix}")
}

/// Name shared by the service and service account of a worker
pub fn worker_service_name(worker: &str) -> String {
    format!("{worker}-service")
}

fn labels<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
}

fn service_account(name: String, mut labels: BTreeMap<String, String>) -> ServiceAccount {
    labels.insert("account".to_owned(), name.clone());
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        ..ServiceAccount::default()
    }
}

/// Identity the scheduler pod runs as
pub fn scheduler_service_account(cluster: &str) -> ServiceAccount {
    service_account(
        scheduler_service_name(cluster),
        labels([(CLUSTER_NAME_LABEL, cluster)]),
    )
}

/// Scheduler pod built from the user template with the scheduler identity injected
pub fn scheduler_pod(cluster: &str, spec: &PodSpec) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(scheduler_name(cluster)),
            labels: Some(labels([
                (CLUSTER_NAME_LABEL, cluster),
                (COMPONENT_LABEL, "scheduler"),
                ("app", "scheduler"),
                ("version", "v1"),
            ])),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            service_account_name: Some(scheduler_service_name(cluster)),
            ..spec.clone()
        }),
        ..Pod::default()
    }
}

/// Service exposing the scheduler, taken verbatim from the user template
pub fn scheduler_service(cluster: &str, spec: &ServiceSpec) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(scheduler_service_name(cluster)),
            labels: Some(labels([
                (CLUSTER_NAME_LABEL, cluster),
                ("app", "scheduler"),
                ("service", "scheduler"),
            ])),
            ..ObjectMeta::default()
        },
        spec: Some(spec.clone()),
        ..Service::default()
    }
}

/// Default worker group of `cluster`
pub fn worker_group(cluster: &str, worker: &WorkerSpec) -> DaskWorkerGroup {
    DaskWorkerGroup::new(
        &default_worker_group_name(cluster),
        DaskWorkerGroupSpec {
            cluster: cluster.to_owned(),
            worker: worker.clone(),
        },
    )
}

/// A complete cluster body, as a client would submit it
pub fn cluster(name: &str, worker: WorkerSpec, scheduler: SchedulerSpec) -> DaskCluster {
    DaskCluster::new(name, DaskClusterSpec { scheduler, worker })
}

fn worker_labels(cluster: &str, group: &str, worker: &str) -> BTreeMap<String, String> {
    labels([
        (CLUSTER_NAME_LABEL, cluster),
        (WORKERGROUP_NAME_LABEL, group),
        (WORKER_NAME_LABEL, worker),
    ])
}

/// Identity a single worker pod runs as
pub fn worker_service_account(cluster: &str, group: &str, worker: &str) -> ServiceAccount {
    service_account(
        worker_service_name(worker),
        worker_labels(cluster, group, worker),
    )
}

/// ClusterIP service publishing the comm and dashboard ports of one worker
pub fn worker_service(cluster: &str, group: &str, worker: &str) -> Service {
    let port = |name: &str, port: i32| ServicePort {
        name: Some(name.to_owned()),
        protocol: Some("TCP".to_owned()),
        port,
        target_port: Some(IntOrString::String(name.to_owned())),
        ..ServicePort::default()
    };

    Service {
        metadata: ObjectMeta {
            name: Some(worker_service_name(worker)),
            labels: Some(worker_labels(cluster, group, worker)),
            ..ObjectMeta::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_owned()),
            selector: Some(labels([
                (CLUSTER_NAME_LABEL, cluster),
                (WORKER_NAME_LABEL, worker),
            ])),
            ports: Some(vec![
                port("comm", WORKER_COMM_PORT),
                port("dashboard", WORKER_DASHBOARD_PORT),
            ]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

/// Worker pod built from the group template.
///
/// The worker identity is injected and the first container learns the
/// worker name through [`WORKER_NAME_ENV`]. A template without containers
/// is passed through untouched.
pub fn worker_pod(group: &str, cluster: &str, worker: &str, spec: &PodSpec) -> Pod {
    let mut spec = PodSpec {
        service_account_name: Some(worker_service_name(worker)),
        ..spec.clone()
    };
    if let Some(container) = spec.containers.first_mut() {
        container.env.get_or_insert_with(Vec::new).push(EnvVar {
            name: WORKER_NAME_ENV.to_owned(),
            value: Some(worker.to_owned()),
            ..EnvVar::default()
        });
    }

    let mut labels = worker_labels(cluster, group, worker);
    labels.insert(COMPONENT_LABEL.to_owned(), "worker".to_owned());

    Pod {
        metadata: ObjectMeta {
            name: Some(worker.to_owned()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        spec: Some(spec),
        ..Pod::default()
    }
}
