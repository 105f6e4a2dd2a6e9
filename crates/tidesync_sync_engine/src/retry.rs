//! Fixed-delay retries of storage calls.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::shutdown::ShutdownSignal;
use tracing::{debug, error, warn};

/// Logs repeated failures of one operation at decreasing severity.
///
/// The first failure is a warning, later ones are debug messages.
#[derive(Debug, Default)]
pub(crate) struct FailureLog {
    failures: u32,
}

impl FailureLog {
    pub(crate) fn failed(&mut self, operation: &str, err: &SyncError) {
        self.failures += 1;
        if self.failures == 1 {
            warn!(operation, error = %err, "storage operation failed, retrying");
        } else {
            debug!(operation, attempt = self.failures, error = %err, "storage operation failed again");
        }
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }
}

/// Runs `op` until it succeeds, fails permanently, or runs out of attempts.
///
/// Each retry adds one to `retries`. Giving up is logged at error level.
pub(crate) async fn with_retry<T>(
    config: &RetryConfig,
    operation: &str,
    signal: &mut ShutdownSignal,
    retries: &mut u64,
    mut op: impl FnMut() -> SyncResult<T>,
) -> SyncResult<T> {
    let mut log = FailureLog::default();
    loop {
        let err = match op() {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_retryable() || log.failures() + 1 >= config.max_attempts {
            error!(operation, attempts = log.failures() + 1, error = %err, "giving up");
            return Err(err);
        }
        log.failed(operation, &err);
        *retries += 1;
        signal.sleep(config.delay).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::Shutdown;
    use std::time::Duration;
    use tidesync_storage::StorageError;

    fn unavailable() -> SyncError {
        StorageError::Unavailable("503".into()).into()
    }

    fn config(attempts: u32) -> RetryConfig {
        RetryConfig::new(attempts).with_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.signal();
        let mut calls = 0;
        let mut retries = 0;
        let value = with_retry(&config(3), "load", &mut signal, &mut retries, || {
            calls += 1;
            if calls < 3 {
                Err(unavailable())
            } else {
                Ok(calls)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.signal();
        let mut calls = 0;
        let mut retries = 0;
        let result: SyncResult<()> = with_retry(&config(2), "store", &mut signal, &mut retries, || {
            calls += 1;
            Err(unavailable())
        })
        .await;
        assert!(matches!(result, Err(SyncError::Storage(_))));
        assert_eq!(calls, 2);
        assert_eq!(retries, 1);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.signal();
        let mut calls = 0;
        let mut retries = 0;
        let result: SyncResult<()> = with_retry(&config(5), "load", &mut signal, &mut retries, || {
            calls += 1;
            Err(StorageError::NotFound("x".into()).into())
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn cancellation_stops_retrying() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.signal();
        shutdown.trigger();
        let mut retries = 0;
        let result: SyncResult<()> =
            with_retry(&config(5), "list", &mut signal, &mut retries, || Err(unavailable())).await;
        assert!(matches!(result, Err(SyncError::Cancelled)));
    }
}
