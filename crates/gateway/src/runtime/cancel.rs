//! A cancellation token a running turn can be asked to stop through.
//!
//! Each [`crate::runtime::manager::ConversationManager`] keeps one of these
//! for its currently-running agent loop (if any). `cancel()` signals it;
//! the loop observes it at its suspension points (§5): before each store
//! append, during the provider call, during each tool execution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Adapt to the `tokio_util` token the provider adapters expect.
    /// A fresh child is cancelled immediately if `self` already is, and
    /// cancelling the child never reaches back to `self` — the manager
    /// calls `self.cancel()` directly when it wants to stop the loop.
    pub fn as_tokio(&self) -> tokio_util::sync::CancellationToken {
        let token = tokio_util::sync::CancellationToken::new();
        if self.is_cancelled() {
            token.cancel();
        }
        token
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
