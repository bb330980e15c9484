use crate::error::ClientError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Base backoff duration for retries.
const BACKOFF_BASE: Duration = Duration::from_millis(200);

/// Maximum backoff duration.
const BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Runs `operation`, retrying up to `max_retries` times while it fails with a
/// transient [`ClientError`]. Permanent errors are returned immediately.
pub async fn retry_transient<T, F, Fut>(
    description: &str,
    max_retries: u32,
    mut operation: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempts = 0;
    let mut backoff = BACKOFF_BASE;

    loop {
        match operation().await {
            Err(err) if err.is_transient() && attempts < max_retries => {
                attempts += 1;
                warn!(
                    "Attempt {} to {} failed, retrying in {:?}: {}",
                    attempts, description, backoff, err
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2).min(BACKOFF_MAX);
            }
            result => return result,
        }
    }
}
