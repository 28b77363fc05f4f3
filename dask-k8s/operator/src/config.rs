use std::time::Duration;

use envconfig::Envconfig;

/// Operator settings, read once at startup from the environment
#[derive(Envconfig, Debug, Clone)]
pub(crate) struct OperatorConfig {
    /// Field manager recorded on every object the operator writes
    #[envconfig(from = "DASK_OPERATOR_FIELD_MANAGER", default = "dask-kubernetes-operator")]
    pub field_manager: String,

    /// Restrict the operator to a single namespace. Watches all namespaces if unset
    #[envconfig(from = "DASK_OPERATOR_NAMESPACE")]
    pub namespace: Option<String>,

    /// Seconds until a successfully reconciled object is looked at again
    #[envconfig(from = "DASK_OPERATOR_REQUEUE_SECS", default = "10")]
    pub requeue_sec: u64,

    /// Seconds until a failed reconciliation is retried
    #[envconfig(from = "DASK_OPERATOR_ERROR_REQUEUE_SECS", default = "5")]
    pub error_requeue_sec: u64,

    #[envconfig(nested)]
    pub readiness: ReadinessConfig,

    #[envconfig(nested)]
    pub coordinator: CoordinatorConfig,
}

impl OperatorConfig {
    #[inline]
    pub fn requeue(&self) -> Duration {
        Duration::from_secs(self.requeue_sec)
    }

    #[inline]
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_sec)
    }
}

/// How long to wait for a freshly created service to become readable
#[derive(Envconfig, Debug, Clone)]
pub(crate) struct ReadinessConfig {
    /// Pause between two reads of the service
    #[envconfig(from = "DASK_OPERATOR_SERVICE_POLL_MS", default = "100")]
    pub poll_interval_ms: u64,

    /// Give up waiting after this many seconds
    #[envconfig(from = "DASK_OPERATOR_SERVICE_WAIT_TIMEOUT_SECS", default = "120")]
    pub timeout_sec: u64,
}

impl ReadinessConfig {
    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }
}

/// Where and how to reach the scheduler of a cluster when scaling down
#[derive(Envconfig, Debug, Clone)]
pub(crate) struct CoordinatorConfig {
    /// Appended to the short cluster name to find the scheduler service
    #[envconfig(
        from = "DASK_OPERATOR_COORDINATOR_SERVICE_SUFFIX",
        default = "-scheduler-service"
    )]
    pub service_suffix: String,

    /// Name of the scheduler service port speaking the Dask protocol
    #[envconfig(from = "DASK_OPERATOR_COORDINATOR_PORT_NAME", default = "tcp-comm")]
    pub port_name: String,

    /// Timeout for connecting to the scheduler in seconds
    #[envconfig(from = "DASK_OPERATOR_COORDINATOR_CONNECT_TIMEOUT_SECS", default = "20")]
    pub connect_timeout_sec: u64,

    /// Bound on a whole scheduler call: connect, handshake, request and reply
    #[envconfig(from = "DASK_OPERATOR_COORDINATOR_RPC_TIMEOUT_SECS", default = "30")]
    pub rpc_timeout_sec: u64,
}

impl CoordinatorConfig {
    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_sec)
    }

    #[inline]
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_sec)
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> OperatorConfig {
    use std::collections::HashMap;

    OperatorConfig::init_from_hashmap(&HashMap::new()).unwrap()
}
