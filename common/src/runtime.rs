//! Explicit runtime context for orchestration entry points.
//!
//! Replaces process-wide singletons: anything that would otherwise be a
//! global (the handler-token semaphore bounding in-flight block work) is
//! carried here and threaded through the orchestrators that need it. The
//! codec layer takes nothing from it.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default process-wide cap on in-flight handler tasks.
pub const DEFAULT_HANDLER_TOKENS: usize = 8;

#[derive(Clone)]
pub struct Runtime {
    handler_tokens: Arc<Semaphore>,
}

impl Runtime {
    pub fn new(handler_tokens: usize) -> Self {
        Self {
            handler_tokens: Arc::new(Semaphore::new(handler_tokens)),
        }
    }

    /// Acquires a handler token, waiting while the process-wide cap is
    /// reached. The token is released when the permit drops.
    pub async fn handler_token(&self) -> OwnedSemaphorePermit {
        self.handler_tokens
            .clone()
            .acquire_owned()
            .await
            .expect("handler token semaphore is never closed")
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(DEFAULT_HANDLER_TOKENS)
    }
}
