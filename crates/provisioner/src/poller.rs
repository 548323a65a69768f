//! Fixed-interval readiness polling.

use std::time::Duration;

use tracing::{debug, info};

use crate::error::{ProvisionError, Result};

/// Default attempt budget for readiness waits.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// Default interval between attempts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Bounded-retry poller: no backoff, no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPoller {
    /// Check invocations before giving up.
    pub max_attempts: u32,
    /// Sleep between failed attempts.
    pub interval: Duration,
}

impl Default for ReadinessPoller {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl ReadinessPoller {
    /// Create a poller.
    #[must_use]
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Invoke `check` until it returns `true`, sleeping `interval` between
    /// failures. Returns the number of attempts used.
    ///
    /// The check is called at most `max_attempts` times and there is no sleep
    /// after the final failure.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Timeout`] once the budget is exhausted.
    pub async fn await_ready<F>(&self, what: &str, mut check: F) -> Result<u32>
    where
        F: FnMut() -> bool,
    {
        for attempt in 1..=self.max_attempts {
            if check() {
                info!(what, attempt, "Ready");
                return Ok(attempt);
            }
            debug!(what, attempt, max = self.max_attempts, "Not ready yet");
            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        Err(ProvisionError::Timeout {
            what: what.to_string(),
            attempts: self.max_attempts,
            interval: self.interval,
        })
    }
}
