//! Bounded retry policy for remote operations
//!
//! Local/business errors surface immediately; everything else is replayed up
//! to a fixed attempt budget with a fixed backoff between attempts.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Run `call` until it succeeds, fails locally, or exhausts the budget.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_local() => return Err(err),
                Err(err) => {
                    if attempt >= self.attempts {
                        warn!(operation, attempt, error = %err, "retry budget exhausted");
                        return Err(err);
                    }
                    debug!(operation, attempt, error = %err, "retrying after transient failure");
                    sleep(self.backoff).await;
                }
            }
        }
    }
}
