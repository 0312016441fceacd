use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::ClusterError;

/// Cooperative cancellation for the clustering stage.
///
/// Clones share the same flag, so a token handed to the clusterer can be
/// cancelled from another thread. An optional deadline turns into
/// [`ClusterError::DeadlineExceeded`] once it passes.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    /// Token that never fires on its own.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that expires `limit` from now.
    pub fn with_deadline(limit: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + limit),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail if cancelled or past the deadline.
    pub fn check(&self) -> Result<(), ClusterError> {
        if self.is_cancelled() {
            return Err(ClusterError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ClusterError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}
