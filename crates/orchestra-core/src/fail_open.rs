//! Fail-open wrappers for infrastructure side effects
//!
//! A thread's loop must keep going when a checkpoint write or a container
//! teardown fails. These helpers log the failure and hand back `None`
//! instead of an error.
//!
//! Not for oracle calls (nodes turn those into text themselves) and not for
//! loading a checkpoint before a run, where a missing thread is a real error.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::Result;

/// Base delay between attempts; attempt `n` waits `n * RETRY_STEP`
const RETRY_STEP: Duration = Duration::from_millis(100);

/// Run `f` once, logging and discarding its error
pub async fn fail_open<F, Fut, T>(label: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    f().await
        .map_err(|e| warn!("{} failed, continuing without it: {}", label, e))
        .ok()
}

/// Run `f` up to `attempts` times with a linear backoff
///
/// `attempts == 0` never calls `f`.
pub async fn fail_open_with_retries<F, Fut, T>(label: &str, mut f: F, attempts: usize) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    while attempt < attempts {
        attempt += 1;
        let err = match f().await {
            Ok(value) => return Some(value),
            Err(e) => e,
        };
        if attempt == attempts {
            warn!("{} gave up after {} attempts: {}", label, attempts, err);
            break;
        }
        warn!("{} attempt {}/{} failed: {}", label, attempt, attempts, err);
        tokio::time::sleep(RETRY_STEP * attempt as u32).await;
    }
    None
}
