use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY: Duration = Duration::from_millis(500);

/// Run an adapter call, retrying transient failures with exponential backoff.
///
/// Only errors marked retryable (cluster-unavailable) are retried; config
/// errors, not-found and rejected specs surface immediately.
pub async fn with_backoff<T, F, Fut>(operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = BASE_DELAY;
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                warn!(
                    operation,
                    attempt,
                    error = %e,
                    "transient cluster failure, retrying after {:?}", delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
