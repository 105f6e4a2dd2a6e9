//! Bound on the number of snapshots held in memory.

use crate::error::{SyncError, SyncResult};
use crate::shutdown::ShutdownSignal;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A fixed pool of permits, one per snapshot held in memory.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimit {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl ConcurrencyLimit {
    /// Creates a pool of `size` permits (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Total number of permits.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of permits currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Waits for a permit.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] if `signal` fires first.
    pub async fn acquire(&self, signal: &mut ShutdownSignal) -> SyncResult<Token> {
        if signal.is_triggered() {
            return Err(SyncError::Cancelled);
        }
        tokio::select! {
            permit = self.semaphore.clone().acquire_owned() => {
                let permit = permit.map_err(|_| SyncError::Cancelled)?;
                Ok(Token { permit: Some(permit) })
            }
            _ = signal.cancelled() => Err(SyncError::Cancelled),
        }
    }
}

/// A permit from a [`ConcurrencyLimit`].
///
/// Released on drop or by [`Token::release`], whichever comes first.
#[derive(Debug)]
pub struct Token {
    permit: Option<OwnedSemaphorePermit>,
}

impl Token {
    /// Returns the permit to the pool. Calling it again does nothing.
    pub fn release(&mut self) {
        self.permit.take();
    }

    /// True until the token is released.
    pub fn is_held(&self) -> bool {
        self.permit.is_some()
    }
}
