//! Retry helper for transient external calls.
//!
//! Plugin and scheduler RPCs can fail transiently (deadline exceeded,
//! connection refused). Such calls retry up to three times with exponential
//! backoff starting at 200 ms; permanent failures surface immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

/// Maximum number of attempts for a transient external call.
pub const MAX_ATTEMPTS: u32 = 3;

/// Initial backoff delay; doubles after each failed attempt.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(200);

/// Runs `operation` up to [`MAX_ATTEMPTS`] times, backing off exponentially
/// between transient failures.
///
/// Non-transient errors (see [`Error::is_transient`]) are returned on the
/// first occurrence.
///
/// # Errors
/// Returns the last error once attempts are exhausted, or the first
/// permanent error encountered.
pub async fn retry_with_backoff<T, F, Fut>(description: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = INITIAL_BACKOFF;
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                warn!(
                    operation = description,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    "transient failure, retrying: {err}"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
