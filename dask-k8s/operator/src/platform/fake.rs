//! In-memory [`ClusterApi`] used by the reconciler tests
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use crds::{DaskCluster, DaskWorkerGroup, DaskWorkerGroupStatus};
use k8s_openapi::api::core::v1::{Pod, Service, ServiceAccount};
use kube::{Resource, ResourceExt};
use serde_json::Value;

use super::{Applied, ClusterApi, PlatformError};

type Key = (String, String);

#[derive(Default)]
pub(crate) struct FakeState {
    pub service_accounts: BTreeMap<Key, ServiceAccount>,
    pub pods: BTreeMap<Key, Pod>,
    pub services: BTreeMap<Key, Service>,
    pub clusters: BTreeMap<Key, DaskCluster>,
    pub worker_groups: BTreeMap<Key, DaskWorkerGroup>,
    /// Successful creates of new objects, in order, as `Kind/name`
    pub created: Vec<String>,
    /// Deleted pod names, in order
    pub deleted_pods: Vec<String>,
    /// Merge patches received for worker groups
    pub patches: Vec<Value>,
    /// Number of `get_service` calls served so far
    pub service_reads: usize,
    /// A service only becomes readable after this many failed reads
    pub service_hidden_reads: usize,
    /// Fail every pod creation
    pub reject_pods: bool,
    uid_counter: usize,
}

impl FakeState {
    fn next_uid(&mut self) -> String {
        self.uid_counter += 1;
        format!("uid-{}", self.uid_counter)
    }

    pub fn created_of(&self, kind: &str) -> Vec<String> {
        let prefix = format!("{kind}/");
        self.created
            .iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_owned))
            .collect()
    }
}

#[derive(Default)]
pub(crate) struct FakeCluster {
    state: Mutex<FakeState>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_owned(), name.to_owned())
}

fn matches_selector(pod: &Pod, selector: &str) -> bool {
    let labels = pod.labels();
    selector
        .split(',')
        .filter(|s| !s.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).is_some_and(|l| l == v),
            None => labels.contains_key(term),
        })
}

/// RFC 7386 JSON merge patch
fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (k, v) in patch {
                if v.is_null() {
                    target.remove(k);
                } else {
                    merge(target.entry(k.clone()).or_insert(Value::Null), v);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

impl FakeCluster {
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Store `obj` as if the API server had persisted it, assigning a uid
    fn insert<K: Resource + Clone>(
        state: &mut FakeState,
        map: fn(&mut FakeState) -> &mut BTreeMap<Key, K>,
        kind: &str,
        namespace: &str,
        obj: &K,
    ) -> Applied {
        let k = key(namespace, &obj.name_any());
        if map(state).contains_key(&k) {
            return Applied::AlreadyExists;
        }
        let mut obj = obj.clone();
        obj.meta_mut().namespace = Some(namespace.to_owned());
        obj.meta_mut().uid = Some(state.next_uid());
        state.created.push(format!("{kind}/{}", k.1));
        map(state).insert(k, obj);
        Applied::Created
    }

    pub fn add_cluster(&self, namespace: &str, cluster: &DaskCluster) -> DaskCluster {
        let mut state = self.state();
        Self::insert(&mut state, |s| &mut s.clusters, "DaskCluster", namespace, cluster);
        state.created.pop();
        state.clusters[&key(namespace, &cluster.name_any())].clone()
    }

    pub fn add_worker_group(&self, namespace: &str, group: &DaskWorkerGroup) -> DaskWorkerGroup {
        let mut state = self.state();
        Self::insert(&mut state, |s| &mut s.worker_groups, "DaskWorkerGroup", namespace, group);
        state.created.pop();
        state.worker_groups[&key(namespace, &group.name_any())].clone()
    }

    /// Seed an existing pod without recording it as created
    pub fn add_pod(&self, namespace: &str, pod: &Pod) {
        let mut state = self.state();
        Self::insert(&mut state, |s| &mut s.pods, "Pod", namespace, pod);
        state.created.pop();
    }

    pub fn add_service(&self, namespace: &str, service: &Service) {
        let mut state = self.state();
        Self::insert(&mut state, |s| &mut s.services, "Service", namespace, service);
        state.created.pop();
    }

    pub fn pod_names(&self, namespace: &str) -> Vec<String> {
        self.state()
            .pods
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<Applied, PlatformError> {
        let mut state = self.state();
        Ok(Self::insert(
            &mut state,
            |s| &mut s.service_accounts,
            "ServiceAccount",
            namespace,
            account,
        ))
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Applied, PlatformError> {
        let mut state = self.state();
        if state.reject_pods {
            return Err(PlatformError::NotFound {
                kind: "Namespace",
                name: namespace.to_owned(),
            });
        }
        Ok(Self::insert(&mut state, |s| &mut s.pods, "Pod", namespace, pod))
    }

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Applied, PlatformError> {
        let mut state = self.state();
        Ok(Self::insert(
            &mut state,
            |s| &mut s.services,
            "Service",
            namespace,
            service,
        ))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, PlatformError> {
        let mut state = self.state();
        state.service_reads += 1;
        if state.service_hidden_reads > 0 {
            state.service_hidden_reads -= 1;
        } else if let Some(svc) = state.services.get(&key(namespace, name)) {
            return Ok(svc.clone());
        }
        Err(PlatformError::NotFound {
            kind: "Service",
            name: name.to_owned(),
        })
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, PlatformError> {
        Ok(self
            .state()
            .pods
            .iter()
            .filter(|((ns, _), pod)| ns == namespace && matches_selector(pod, label_selector))
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), PlatformError> {
        let mut state = self.state();
        match state.pods.remove(&key(namespace, name)) {
            Some(_) => {
                state.deleted_pods.push(name.to_owned());
                Ok(())
            }
            None => Err(PlatformError::NotFound {
                kind: "Pod",
                name: name.to_owned(),
            }),
        }
    }

    async fn get_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DaskCluster, PlatformError> {
        self.state()
            .clusters
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| PlatformError::NotFound {
                kind: "DaskCluster",
                name: name.to_owned(),
            })
    }

    async fn create_worker_group(
        &self,
        namespace: &str,
        group: &DaskWorkerGroup,
    ) -> Result<Applied, PlatformError> {
        let mut state = self.state();
        Ok(Self::insert(
            &mut state,
            |s| &mut s.worker_groups,
            "DaskWorkerGroup",
            namespace,
            group,
        ))
    }

    async fn patch_worker_group(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<DaskWorkerGroup, PlatformError> {
        let mut state = self.state();
        state.patches.push(patch.clone());
        let not_found = || PlatformError::NotFound {
            kind: "DaskWorkerGroup",
            name: name.to_owned(),
        };
        let group = state
            .worker_groups
            .get_mut(&key(namespace, name))
            .ok_or_else(not_found)?;
        let mut body = serde_json::to_value(&*group).expect("stored worker group serializes");
        merge(&mut body, patch);
        *group = serde_json::from_value(body)
            .unwrap_or_else(|e| panic!("patch {patch} leaves an invalid worker group: {e}"));
        Ok(group.clone())
    }

    async fn patch_worker_group_status(
        &self,
        namespace: &str,
        name: &str,
        status: &DaskWorkerGroupStatus,
    ) -> Result<(), PlatformError> {
        let mut state = self.state();
        let group = state
            .worker_groups
            .get_mut(&key(namespace, name))
            .ok_or_else(|| PlatformError::NotFound {
                kind: "DaskWorkerGroup",
                name: name.to_owned(),
            })?;
        group.status = Some(status.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    #[should_panic(expected = "invalid worker group")]
    async fn malformed_patch_is_not_reported_as_missing() {
        let fake = FakeCluster::default();
        let group = crds::manifests::worker_group("foo", &Default::default());
        fake.add_worker_group("dask", &group);
        let _ = fake
            .patch_worker_group(
                "dask",
                "foo-default-worker-group",
                &json!({"spec": {"worker": {"replicas": "three"}}}),
            )
            .await;
    }

    #[test]
    fn merge_patch_replaces_and_removes() {
        let mut target = json!({"a": {"b": 1, "c": 2}, "d": [1]});
        merge(&mut target, &json!({"a": {"b": null, "e": 3}, "d": [2, 3]}));
        assert_eq!(target, json!({"a": {"c": 2, "e": 3}, "d": [2, 3]}));
    }
}
