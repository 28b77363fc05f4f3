use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::platform::{ClusterApi, PlatformError};

mod comm;

pub(crate) use comm::CommError;
use comm::Comm;

/// The live scheduler of a cluster, asked which workers can be retired
#[cfg_attr(test, automock)]
#[async_trait]
pub(crate) trait Coordinator: Send + Sync {
    /// Ask the scheduler at `address` for `n` workers that are safe to close,
    /// identified by the worker attribute `attribute`
    async fn workers_to_close(
        &self,
        address: &str,
        n: usize,
        attribute: &str,
    ) -> Result<Vec<String>, CoordinatorError>;
}

/// [`Coordinator`] speaking the Dask comm protocol to a scheduler
pub(crate) struct DaskSchedulerRpc {
    connect_timeout: Duration,
    /// Bound on the whole exchange, a silent scheduler must not stall a reconcile
    rpc_timeout: Duration,
}

impl DaskSchedulerRpc {
    pub fn new(connect_timeout: Duration, rpc_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            rpc_timeout,
        }
    }

    async fn exchange(
        &self,
        address: &str,
        n: usize,
        attribute: &str,
    ) -> Result<Reply, CoordinatorError> {
        let mut comm = Comm::connect(address, self.connect_timeout).await?;
        comm.write(&WorkersToClose {
            op: "workers_to_close",
            n,
            attribute,
            reply: true,
        })
        .await?;
        Ok(comm.read::<Reply>().await?)
    }
}

#[derive(Debug, Serialize)]
struct WorkersToClose<'a> {
    op: &'static str,
    n: usize,
    attribute: &'a str,
    reply: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Reply {
    Workers(Vec<String>),
    Error {
        status: String,
        #[serde(default)]
        text: Option<String>,
    },
}

#[async_trait]
impl Coordinator for DaskSchedulerRpc {
    async fn workers_to_close(
        &self,
        address: &str,
        n: usize,
        attribute: &str,
    ) -> Result<Vec<String>, CoordinatorError> {
        let reply = tokio::time::timeout(self.rpc_timeout, self.exchange(address, n, attribute))
            .await
            .map_err(|_| CoordinatorError::TimedOut {
                address: address.to_owned(),
                timeout: self.rpc_timeout,
            })??;
        match reply {
            Reply::Workers(workers) => {
                debug!("Scheduler at {address} offered {workers:?} for closing");
                Ok(workers)
            }
            Reply::Error { status, text } => Err(CoordinatorError::Remote {
                status,
                text: text.unwrap_or_default(),
            }),
        }
    }
}

/// Name of the scheduler service of the cluster `group` belongs to.
///
/// The cluster is identified by the first dash separated segment of the
/// worker group name. For clusters whose own name contains a dash this does
/// not match `spec.cluster` of the group (`my-cluster` resolves to
/// `my{suffix}`), and the lookup fails with [`CoordinatorError::Lookup`].
pub(crate) fn coordinator_service_name(group: &str, suffix: &str) -> String {
    let short = group.split('-').next().unwrap_or(group);
    format!("{short}{suffix}")
}

/// Resolve the in-cluster `host:port` of the scheduler behind `service_name`
pub(crate) async fn resolve_address(
    api: &dyn ClusterApi,
    namespace: &str,
    service_name: &str,
    port_name: &str,
) -> Result<String, CoordinatorError> {
    let service = api.get_service(namespace, service_name).await?;
    let port = comm_port(&service, port_name).ok_or_else(|| CoordinatorError::NoPort {
        service: service_name.to_owned(),
    })?;
    Ok(format!("{service_name}.{namespace}:{port}"))
}

/// The port called `port_name`, or the first port if none carries that name
fn comm_port(service: &Service, port_name: &str) -> Option<i32> {
    let ports = service.spec.as_ref()?.ports.as_ref()?;
    ports
        .iter()
        .find(|p| p.name.as_deref() == Some(port_name))
        .or_else(|| ports.first())
        .map(|p| p.port)
}

#[derive(Debug, Error)]
pub(crate) enum CoordinatorError {
    #[error("Error looking up the scheduler service: {0}")]
    Lookup(#[from] PlatformError),
    #[error("Scheduler service '{service}' exposes no ports")]
    NoPort { service: String },
    #[error("Error talking to the scheduler: {0}")]
    Comm(#[from] CommError),
    #[error("Scheduler answered with {status}: {text}")]
    Remote { status: String, text: String },
    #[error("Scheduler at {address} did not answer within {timeout:?}")]
    TimedOut { address: String, timeout: Duration },
}
