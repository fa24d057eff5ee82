//! Execution Timeout Management
//!
//! Wall-clock budget for a single child process. The timeout is the only
//! cancellation mechanism the gate has.

use super::error::GateError;
use std::future::Future;
use std::time::Duration;
use tokio::time;

/// Default execution timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Execution timeout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionTimeout {
    duration: Duration,
}

impl Default for ExecutionTimeout {
    fn default() -> Self {
        Self::from_secs(DEFAULT_TIMEOUT_SECS)
    }
}

impl ExecutionTimeout {
    /// Create a new execution timeout
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use extendipede::gate::ExecutionTimeout;
    ///
    /// let timeout = ExecutionTimeout::new(Duration::from_secs(30));
    /// assert_eq!(timeout.secs(), 30);
    /// ```
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Whole seconds, as reported in timeout messages
    pub fn secs(&self) -> u64 {
        self.duration.as_secs()
    }

    /// Drive a future to completion or fail with `GateError::Timeout`
    ///
    /// The future is dropped on expiry; callers owning a child process must
    /// kill it themselves.
    pub async fn run<F, T>(&self, future: F) -> Result<T, GateError>
    where
        F: Future<Output = T>,
    {
        time::timeout(self.duration, future)
            .await
            .map_err(|_| GateError::Timeout(self.secs()))
    }
}

impl From<Duration> for ExecutionTimeout {
    fn from(duration: Duration) -> Self {
        Self::new(duration)
    }
}
