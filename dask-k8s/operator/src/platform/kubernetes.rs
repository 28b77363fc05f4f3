use std::fmt::Debug;

use async_trait::async_trait;
use crds::{DaskCluster, DaskWorkerGroup, DaskWorkerGroupStatus};
use k8s_openapi::api::core::v1::{Pod, Service, ServiceAccount};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{Applied, ClusterApi, PlatformError};

/// [`ClusterApi`] backed by a live Kubernetes API server
pub(crate) struct KubeClusterApi {
    client: Client,
    field_manager: String,
}

impl KubeClusterApi {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            dry_run: false,
            field_manager: Some(self.field_manager.clone()),
        }
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams::apply(&self.field_manager)
    }

    /// Create `obj`, treating a conflict on its name as success
    async fn ensure<K>(&self, namespace: &str, obj: &K) -> Result<Applied, PlatformError>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned,
        <K as Resource>::DynamicType: Default,
    {
        let result = self
            .api::<K>(namespace)
            .create(&self.post_params(), obj)
            .await;
        let applied = create_outcome(result)?;
        if applied == Applied::AlreadyExists {
            debug!(
                "{} '{}' already exists in {namespace}, leaving it as is",
                K::kind(&Default::default()),
                obj.name_any()
            );
        }
        Ok(applied)
    }
}

/// Outcome of a create call, a 409 conflict on the name counts as success
fn create_outcome<K>(result: Result<K, kube::Error>) -> Result<Applied, PlatformError> {
    match result {
        Ok(_) => Ok(Applied::Created),
        Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(Applied::AlreadyExists),
        Err(e) => Err(e.into()),
    }
}

/// Map a 404 from the API server to [`PlatformError::NotFound`]
fn or_not_found(kind: &'static str, name: &str) -> impl FnOnce(kube::Error) -> PlatformError {
    let name = name.to_owned();
    move |e| match e {
        kube::Error::Api(resp) if resp.code == 404 => PlatformError::NotFound { kind, name },
        other => PlatformError::Kubernetes(other),
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<Applied, PlatformError> {
        self.ensure(namespace, account).await
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Applied, PlatformError> {
        self.ensure(namespace, pod).await
    }

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Applied, PlatformError> {
        self.ensure(namespace, service).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, PlatformError> {
        self.api::<Service>(namespace)
            .get(name)
            .await
            .map_err(or_not_found("Service", name))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, PlatformError> {
        let params = ListParams::default().labels(label_selector);
        Ok(self.api::<Pod>(namespace).list(&params).await?.items)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), PlatformError> {
        self.api::<Pod>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(or_not_found("Pod", name))?;
        Ok(())
    }

    async fn get_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DaskCluster, PlatformError> {
        self.api::<DaskCluster>(namespace)
            .get(name)
            .await
            .map_err(or_not_found("DaskCluster", name))
    }

    async fn create_worker_group(
        &self,
        namespace: &str,
        group: &DaskWorkerGroup,
    ) -> Result<Applied, PlatformError> {
        self.ensure(namespace, group).await
    }

    async fn patch_worker_group(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<DaskWorkerGroup, PlatformError> {
        self.api::<DaskWorkerGroup>(namespace)
            .patch(name, &self.patch_params(), &Patch::Merge(patch))
            .await
            .map_err(or_not_found("DaskWorkerGroup", name))
    }

    async fn patch_worker_group_status(
        &self,
        namespace: &str,
        name: &str,
        status: &DaskWorkerGroupStatus,
    ) -> Result<(), PlatformError> {
        let patch = json!({ "status": status });
        self.api::<DaskWorkerGroup>(namespace)
            .patch_status(name, &self.patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(or_not_found("DaskWorkerGroup", name))?;
        Ok(())
    }
}
