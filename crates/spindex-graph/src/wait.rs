//! Interruptible sleep
//!
//! Every backoff in the crate (throttling waits, scheduled retries, waiting
//! for the indexing host) sleeps through a [`CancellableWait`]. Clones share
//! one [`CancellationToken`], so a single [`CancellableWait::cancel_all`]
//! unblocks every waiter of a sync run at once.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Shared, cancellable sleep primitive
#[derive(Debug, Clone, Default)]
pub struct CancellableWait {
    token: CancellationToken,
}

impl CancellableWait {
    /// Creates a wait with its own cancellation token
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a wait driven by an existing token (e.g. a process shutdown token)
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Sleeps for `duration`
    ///
    /// # Returns
    /// `true` when the full duration elapsed, `false` when the wait was cut
    /// short (or skipped) because [`cancel_all`](Self::cancel_all) was called.
    pub async fn wait(&self, duration: Duration) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.token.cancelled() => {
                debug!(?duration, "Wait interrupted by cancellation");
                false
            }
        }
    }

    /// Unblocks every current and future waiter. Idempotent.
    pub fn cancel_all(&self) {
        self.token.cancel();
    }

    /// Whether [`cancel_all`](Self::cancel_all) has been called
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The underlying token, for `select!` and `take_until` style checks
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
