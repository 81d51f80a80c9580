use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Progress hook for long-running requests. Reporting never blocks the
/// request; cancelling the token aborts it.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, message: &str);

    /// Token for the operation about to start.
    fn cancellation(&self) -> CancellationToken;
}

/// Writes progress to the log. `cancel()` aborts whatever is in flight and
/// arms a fresh token for later operations.
#[derive(Debug, Default)]
pub struct TracingProgress {
    current: Mutex<CancellationToken>,
}

impl TracingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut current = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        current.cancel();
        *current = CancellationToken::new();
    }
}

impl ProgressReporter for TracingProgress {
    fn report(&self, message: &str) {
        info!("{}", message);
    }

    fn cancellation(&self) -> CancellationToken {
        match self.current.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
