//! Bounded device calls
//!
//! Every device call runs under a per-attempt timeout and is retried with
//! exponential backoff while its error is transient, up to the configured
//! number of attempts.

use super::plan::PlannedCall;
use crate::config::RetryConfig;
use crate::domain::ports::{DeviceError, DeviceResult, ManagerDirectory};
use crate::metrics::EngineMetrics;
use backoff::future::retry_notify;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy shared by assembly, disassembly and power actions
pub struct RetryPolicy {
    config: RetryConfig,
    metrics: Arc<EngineMetrics>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig, metrics: Arc<EngineMetrics>) -> Arc<Self> {
        Arc::new(Self { config, metrics })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Longest a single call can take across all of its attempts
    pub fn worst_case(&self) -> Duration {
        (self.config.call_timeout() + self.config.max_interval()) * self.config.max_attempts
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.initial_interval())
            .with_max_interval(self.config.max_interval())
            .with_multiplier(self.config.multiplier)
            .with_randomization_factor(self.config.randomization_factor)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Run `op` until it succeeds, fails permanently or runs out of attempts
    pub async fn call<F, Fut>(&self, what: &str, mut op: F) -> DeviceResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DeviceResult<()>>,
    {
        let attempts = AtomicU32::new(0);
        let max_attempts = self.config.max_attempts;
        let timeout = self.config.call_timeout();
        let metrics = &self.metrics;

        let result = retry_notify(
            self.backoff(),
            || {
                let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                let call = op();
                async move {
                    metrics.record_device_call();
                    let outcome = match tokio::time::timeout(timeout, call).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(DeviceError::Timeout(timeout)),
                    };
                    outcome.map_err(|e| {
                        if e.is_transient() && attempt < max_attempts {
                            backoff::Error::transient(e)
                        } else {
                            backoff::Error::permanent(e)
                        }
                    })
                }
            },
            |e: DeviceError, wait: Duration| {
                metrics.record_device_retry();
                warn!("{} failed: {}, retrying in {:?}", what, e, wait);
            },
        )
        .await;

        if let Err(e) = &result {
            self.metrics.record_device_failure();
            debug!(
                "{} gave up after {} attempts: {}",
                what,
                attempts.load(Ordering::Relaxed),
                e
            );
        }
        result
    }

    /// Send a planned call to the endpoint of its manager
    pub async fn run(&self, directory: &dyn ManagerDirectory, planned: &PlannedCall) -> DeviceResult<()> {
        let actions = directory
            .actions_for(planned.manager)
            .ok_or(DeviceError::NoEndpoint(planned.manager))?;
        let what = planned.call.to_string();
        self.call(&what, || planned.call.dispatch(actions.as_ref())).await
    }
}
