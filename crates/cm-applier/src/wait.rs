//! Poll-until-predicate with deadline and cancellation
//!
//! Fetch failures are split the same way writes are: a missing object or a
//! transient error keeps the poll going (the object may have just been
//! created), while authorization and schema errors end it immediately.

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use cm_common::kube_utils::ResourceRef;
use cm_common::{Error, Result};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::client::{ApiError, ResourceClient};

/// Poll cadence and deadline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitOptions {
    /// Delay between observations
    pub interval: Duration,
    /// Total time allowed
    pub timeout: Duration,
}

impl WaitOptions {
    /// Options with the given interval and timeout
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Poll every 5 seconds for `minutes`
    pub fn minutes(minutes: u64) -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(minutes * 60))
    }
}

/// Why a wait ended without success
#[derive(Debug, PartialEq)]
pub enum WaitError<S> {
    /// The deadline passed; carries the last observed state
    Timeout {
        /// Last observed state
        last: Option<S>,
    },
    /// The cancellation token fired; carries the last observed state
    Cancelled {
        /// Last observed state
        last: Option<S>,
    },
    /// A non-retriable fetch error
    Fetch(ApiError),
}

impl<S: Debug> WaitError<S> {
    /// Convert into the crate-wide error for `resource`
    pub fn into_error(self, resource: &str, timeout: Duration) -> Error {
        match self {
            Self::Timeout { last } => Error::WaitTimeout {
                resource: resource.to_string(),
                last_observed: last.map(|s| format!("{s:?}")),
                timeout,
            },
            Self::Cancelled { last } => Error::WaitCancelled {
                resource: resource.to_string(),
                last_observed: last.map(|s| format!("{s:?}")),
            },
            Self::Fetch(e) => e.into_error(),
        }
    }
}

/// Observe repeatedly until `is_success` holds, the deadline passes or
/// `cancel` fires.
///
/// `observe` returns `Ok(None)` when there is nothing to look at yet. An
/// observation is only attempted if it can happen no later than `timeout`
/// after the start, so an object that becomes ready after `k` intervals is
/// seen iff `timeout >= k * interval`.
pub async fn poll_until<S, F, Fut, P>(
    opts: &WaitOptions,
    cancel: &CancellationToken,
    mut observe: F,
    mut is_success: P,
) -> std::result::Result<S, WaitError<S>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<Option<S>, ApiError>>,
    P: FnMut(&S) -> bool,
{
    let start = Instant::now();
    let mut last: Option<S> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled { last });
        }

        match observe().await {
            Ok(Some(state)) => {
                if is_success(&state) {
                    return Ok(state);
                }
                last = Some(state);
            }
            Ok(None) => trace!("nothing observed yet"),
            Err(e @ (ApiError::NotFound { .. } | ApiError::Transient { .. })) => {
                debug!(error = %e, "retriable fetch error while waiting");
            }
            Err(e) => return Err(WaitError::Fetch(e)),
        }

        if start.elapsed() + opts.interval > opts.timeout {
            return Err(WaitError::Timeout { last });
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(WaitError::Cancelled { last }),
            _ = tokio::time::sleep(opts.interval) => {}
        }
    }
}

/// Wait for a resource's extracted state to satisfy `is_success`.
///
/// A missing resource or an `extract` returning `None` counts as "not yet".
pub async fn wait_for_resource<S, E, P>(
    client: &dyn ResourceClient,
    target: &ResourceRef,
    extract: E,
    is_success: P,
    opts: &WaitOptions,
    cancel: &CancellationToken,
) -> Result<S>
where
    S: Debug,
    E: Fn(&Value) -> Option<S>,
    P: FnMut(&S) -> bool,
{
    let extract = &extract;
    poll_until(
        opts,
        cancel,
        || async move {
            client
                .get(target)
                .await
                .map(|obj| obj.as_ref().and_then(extract))
        },
        is_success,
    )
    .await
    .map_err(|e| e.into_error(&target.to_string(), opts.timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use rstest::rstest;

    /// Observation `k` (0-based) reports Running once `k >= ready_after`.
    fn phases(
        ready_after: u32,
    ) -> (
        Arc<AtomicU32>,
        impl FnMut() -> std::future::Ready<std::result::Result<Option<&'static str>, ApiError>>,
    ) {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let observe = move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            let phase = if n >= ready_after { "Running" } else { "Pending" };
            std::future::ready(Ok(Some(phase)))
        };
        (calls, observe)
    }

    #[rstest]
    #[case(3, 30, true)]
    #[case(3, 31, true)]
    #[case(3, 29, false)]
    #[case(0, 0, true)]
    #[case(5, 10, false)]
    #[tokio::test(start_paused = true)]
    async fn succeeds_iff_timeout_covers_ticks(
        #[case] ticks: u32,
        #[case] timeout_secs: u64,
        #[case] expect_success: bool,
    ) {
        let opts = WaitOptions::new(Duration::from_secs(10), Duration::from_secs(timeout_secs));
        let (_, observe) = phases(ticks);

        let cancel = CancellationToken::new();
        let result = poll_until(&opts, &cancel, observe, |p| *p == "Running").await;

        if expect_success {
            assert_eq!(result, Ok("Running"));
        } else {
            assert_eq!(result, Err(WaitError::Timeout { last: Some("Pending") }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_reports_last_state() {
        let cancel = CancellationToken::new();
        let opts = WaitOptions::new(Duration::from_secs(1), Duration::from_secs(600));
        let (calls, observe) = phases(u32::MAX);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });

        let result = poll_until(&opts, &cancel, observe, |p| *p == "Running").await;

        assert_eq!(result, Err(WaitError::Cancelled { last: Some("Pending") }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_retried_and_forbidden_is_fatal() {
        let target = ResourceRef::namespaced("v1", "Secret", "default", "t");
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let t = target.clone();
        let observe = move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            let result = match n {
                0 => Err(ApiError::not_found(&t)),
                1 => Err(ApiError::transient(&t, "connection reset")),
                _ => Err(ApiError::forbidden(&t, "denied")),
            };
            std::future::ready(result.map(|()| None::<&str>))
        };

        let opts = WaitOptions::new(Duration::from_secs(1), Duration::from_secs(60));
        let result = poll_until(&opts, &CancellationToken::new(), observe, |_| true).await;

        assert!(matches!(result, Err(WaitError::Fetch(ApiError::Forbidden { .. }))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn timeout_converts_with_last_observed() {
        let err = WaitError::Timeout { last: Some("Hibernating") }
            .into_error("ClusterClaim/pool/a", Duration::from_secs(60));
        match err {
            Error::WaitTimeout { last_observed, .. } => {
                assert_eq!(last_observed.as_deref(), Some("\"Hibernating\""))
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
