//! Custom resource definitions for the Dask Kubernetes operator and the
//! builders for every child resource the operator submits.
use k8s_openapi::api::core::v1::{PodSpec, ServiceSpec};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reexport of CustomResourceExt so the build script can use it
pub use kube::CustomResourceExt;

pub mod manifests;

/// API group of both custom resources
pub const GROUP: &str = "kubernetes.dask.org";
/// API version of both custom resources
pub const VERSION: &str = "v1";

/// Label carrying the name of the owning cluster
pub const CLUSTER_NAME_LABEL: &str = "dask.org/cluster-name";
/// Label carrying the name of the owning worker group
pub const WORKERGROUP_NAME_LABEL: &str = "dask.org/workergroup-name";
/// Label distinguishing schedulers from workers
pub const COMPONENT_LABEL: &str = "dask.org/component";
/// Label carrying the generated name of a single worker
pub const WORKER_NAME_LABEL: &str = "dask.org/worker-name";

/// Kubernetes CRD representing one logical Dask cluster: a scheduler
/// and a default group of workers.
#[derive(CustomResource, Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema, Default)]
#[kube(
    group = "kubernetes.dask.org",
    version = "v1",
    kind = "DaskCluster",
    plural = "daskclusters",
    shortname = "daskcluster",
    derive = "PartialEq",
    namespaced
)]
pub struct DaskClusterSpec {
    /// Scheduler pod and service templates
    #[serde(default)]
    pub scheduler: SchedulerSpec,

    /// Template of the default worker group
    #[serde(default)]
    pub worker: WorkerSpec,
}

/// Scheduler section of a [`DaskClusterSpec`]
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema, Default)]
pub struct SchedulerSpec {
    /// Pod template of the scheduler
    #[serde(default)]
    pub spec: PodSpec,

    /// Service template exposing the scheduler
    #[serde(default)]
    pub service: ServiceSpec,
}

/// Worker template shared by clusters and worker groups
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema, Default)]
pub struct WorkerSpec {
    /// Desired worker count. Note: Signed int used to be conformant with Kubernetes API
    #[serde(default)]
    pub replicas: i32,

    /// Pod template every worker of the group is created from
    #[serde(default)]
    pub spec: PodSpec,
}

/// Kubernetes CRD representing an independently scalable pool of workers
/// belonging to a [`DaskCluster`].
#[derive(CustomResource, Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema, Default)]
#[kube(
    group = "kubernetes.dask.org",
    version = "v1",
    kind = "DaskWorkerGroup",
    plural = "daskworkergroups",
    shortname = "daskworkergroup",
    derive = "PartialEq",
    status = "DaskWorkerGroupStatus",
    scale = r#"{"specReplicasPath":".spec.worker.replicas", "statusReplicasPath":".status.replicas"}"#,
    namespaced
)]
pub struct DaskWorkerGroupSpec {
    /// Name of the owning DaskCluster
    pub cluster: String,

    /// Worker template and replica count
    #[serde(default)]
    pub worker: WorkerSpec,
}

/// Observed state of a [`DaskWorkerGroup`], written by the operator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema, Default)]
pub struct DaskWorkerGroupStatus {
    /// Live worker pods observed after the last convergence
    pub replicas: i32,
}
