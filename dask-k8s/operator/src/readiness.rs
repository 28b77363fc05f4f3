use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ReadinessConfig;
use crate::platform::{ClusterApi, PlatformError};

/// Block until the service `name` can be read back from the API server.
///
/// Any read error counts as "not created yet". Reads happen at a fixed
/// interval until the configured deadline passes or `cancel` fires.
pub(crate) async fn wait_for_service(
    api: &dyn ClusterApi,
    namespace: &str,
    name: &str,
    config: &ReadinessConfig,
    cancel: &CancellationToken,
) -> Result<(), WaitError> {
    let interval = config.poll_interval();
    let timeout = config.timeout();

    let read = || api.get_service(namespace, name);
    let poll = read
        .retry(
            ConstantBuilder::default()
                .with_delay(interval)
                .with_max_times(attempt_budget(interval, timeout)),
        )
        .sleep(tokio::time::sleep)
        .notify(|e, _| debug!("Service '{name}' in {namespace} not readable yet: {e}"));

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(WaitError::Cancelled {
            service: name.to_owned(),
        }),
        res = tokio::time::timeout(timeout, poll) => match res {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(WaitError::TimedOut {
                service: name.to_owned(),
                timeout,
                last_error: Some(e),
            }),
            Err(_) => Err(WaitError::TimedOut {
                service: name.to_owned(),
                timeout,
                last_error: None,
            }),
        },
    }
}

/// Retries needed to cover `timeout`. One more than strictly necessary so
/// the deadline, not the retry budget, ends the wait.
fn attempt_budget(interval: Duration, timeout: Duration) -> usize {
    let interval = interval.max(Duration::from_millis(1));
    let budget = timeout.as_millis() / interval.as_millis() + 1;
    usize::try_from(budget).unwrap_or(usize::MAX)
}

#[derive(Debug, Error)]
pub(crate) enum WaitError {
    #[error("Service '{service}' did not become readable within {timeout:?}")]
    TimedOut {
        service: String,
        timeout: Duration,
        #[source]
        last_error: Option<PlatformError>,
    },
    #[error("Waiting for service '{service}' was cancelled")]
    Cancelled { service: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakeCluster;
    use crds::manifests;
    use tokio::time::Instant;

    fn config(timeout_sec: u64) -> ReadinessConfig {
        ReadinessConfig {
            poll_interval_ms: 100,
            timeout_sec,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_once_service_is_readable() {
        let api = FakeCluster::default();
        api.add_service("dask", &manifests::worker_service("c", "g", "w"));
        api.state().service_hidden_reads = 3;

        let started = Instant::now();
        wait_for_service(&api, "dask", "w-service", &config(10), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(api.state().service_reads, 4);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn existing_service_needs_a_single_read() {
        let api = FakeCluster::default();
        api.add_service("dask", &manifests::worker_service("c", "g", "w"));

        wait_for_service(&api, "dask", "w-service", &config(10), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(api.state().service_reads, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_at_deadline() {
        let api = FakeCluster::default();

        let started = Instant::now();
        let err = wait_for_service(&api, "dask", "missing", &config(2), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, WaitError::TimedOut { .. }));
        assert!(started.elapsed() >= Duration::from_secs(2));
        // never faster than the fixed interval
        assert!(api.state().service_reads <= 21);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_wait() {
        let api = FakeCluster::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = wait_for_service(&api, "dask", "missing", &config(60), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Cancelled { .. }));
    }

    #[test]
    fn budget_covers_timeout() {
        assert_eq!(
            attempt_budget(Duration::from_millis(100), Duration::from_secs(2)),
            21
        );
        assert_eq!(attempt_budget(Duration::ZERO, Duration::from_millis(5)), 6);
    }
}
