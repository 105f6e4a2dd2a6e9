//! Cooperative cancellation.

use crate::error::{SyncError, SyncResult};
use std::time::Duration;
use tokio::sync::watch;

/// Owner side of a cancellation signal.
///
/// Dropping it cancels every [`ShutdownSignal`] derived from it.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    /// Creates a signal that has not fired.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Returns a signal observing this shutdown.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Fires the signal.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// True once the signal fired or its owner was dropped.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Completes when the signal fires.
    pub async fn cancelled(&mut self) {
        // An error means the owner is gone, which counts as shutdown.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    /// Sleeps for `duration` unless the signal fires first.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] if the signal fired.
    pub async fn sleep(&mut self, duration: Duration) -> SyncResult<()> {
        if self.is_triggered() {
            return Err(SyncError::Cancelled);
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(SyncError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_is_interrupted() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.signal();
        assert!(!signal.is_triggered());

        let handle = tokio::spawn(async move { signal.sleep(Duration::from_secs(3600)).await });
        shutdown.trigger();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(SyncError::Cancelled)));
    }

    #[tokio::test]
    async fn dropping_owner_cancels() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.signal();
        drop(shutdown);
        assert!(signal.is_triggered());
        signal.cancelled().await;
    }

    #[tokio::test]
    async fn short_sleep_completes() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.signal();
        signal.sleep(Duration::from_millis(1)).await.unwrap();
    }
}
