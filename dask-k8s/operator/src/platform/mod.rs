//! Seam between the reconcilers and the Kubernetes API.
//!
//! The reconcilers only ever talk to a [`ClusterApi`]. In production this is
//! [`KubeClusterApi`], in tests an in-memory store.
use async_trait::async_trait;
use crds::{DaskCluster, DaskWorkerGroup, DaskWorkerGroupStatus};
use k8s_openapi::api::core::v1::{Pod, Service, ServiceAccount};
use serde_json::Value;
use thiserror::Error;

mod kubernetes;
#[cfg(test)]
pub(crate) mod fake;

pub(crate) use self::kubernetes::KubeClusterApi;

/// Result of an idempotent create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Applied {
    Created,
    AlreadyExists,
}

/// Every call the reconcilers make against the orchestration platform.
///
/// Creates are "ensure" operations: an object which already exists under the
/// same name counts as success and is reported as [`Applied::AlreadyExists`].
#[async_trait]
pub(crate) trait ClusterApi: Send + Sync {
    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<Applied, PlatformError>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Applied, PlatformError>;

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Applied, PlatformError>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, PlatformError>;

    /// List pods matching an equality based label selector, e.g. `a=b,c=d`
    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, PlatformError>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), PlatformError>;

    async fn get_cluster(&self, namespace: &str, name: &str)
        -> Result<DaskCluster, PlatformError>;

    async fn create_worker_group(
        &self,
        namespace: &str,
        group: &DaskWorkerGroup,
    ) -> Result<Applied, PlatformError>;

    /// Apply a JSON merge patch to a worker group
    async fn patch_worker_group(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<DaskWorkerGroup, PlatformError>;

    async fn patch_worker_group_status(
        &self,
        namespace: &str,
        name: &str,
        status: &DaskWorkerGroupStatus,
    ) -> Result<(), PlatformError>;
}

#[derive(Debug, Error)]
pub(crate) enum PlatformError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },
    #[error("Error from Kubernetes: {0}")]
    Kubernetes(#[from] kube::Error),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Label selector matching all worker pods of a worker group
pub(crate) fn worker_group_selector(group: &str) -> String {
    format!("{}={group}", crds::WORKERGROUP_NAME_LABEL)
}
