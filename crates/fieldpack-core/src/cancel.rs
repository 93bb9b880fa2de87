use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::EngineError;

/// Cooperative cancellation flag shared between a request handler and the
/// blocking scan/build/stream work it kicked off. Long-running operations
/// call `checkpoint` between files and between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn checkpoint(&self) -> anyhow::Result<()> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled.into());
        }
        Ok(())
    }
}
