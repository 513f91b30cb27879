use log::warn;
use std::{fmt::Display, future::Future, time::Duration};

/// A named retry configuration: how many attempts to make and how long to
/// wait between them. Delays grow linearly with the attempt number, so a
/// policy with a 2s base sleeps 2s after the first failure and 4s after the
/// second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

/// Policy for obtaining a platform token before a playlist write.
pub const TOKEN_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 3,
    base_delay: Duration::from_secs(1),
};

/// Policy for pushing a track list to a platform playlist.
pub const TRACK_PUSH_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 3,
    base_delay: Duration::from_secs(2),
};

impl RetryPolicy {
    /// The delay to sleep after the given failed attempt (1-indexed).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Runs `operation` until it succeeds, the error is not retryable, or
    /// attempts are exhausted. The final error is returned unchanged.
    pub async fn run<T, E, F, Fut, P>(&self, mut operation: F, retryable: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && retryable(&err) => {
                    warn!(
                        "attempt {}/{} failed, retrying: {}",
                        attempt, self.max_attempts, err
                    );

                    tokio::time::sleep(self.delay_after(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
