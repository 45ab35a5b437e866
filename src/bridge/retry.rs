//! Bounded polling for values that may not be available yet.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Poll `op` up to `attempts` times, sleeping `delay` between attempts.
///
/// Returns the first `Some` produced, or `None` once the attempts are
/// exhausted. No delay is taken after the final attempt.
pub async fn retry_some<T, F, Fut>(attempts: u32, delay: Duration, mut op: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 1..=attempts {
        if let Some(value) = op().await {
            if attempt > 1 {
                debug!(attempt, "Poll succeeded after retry");
            }
            return Some(value);
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }
    None
}
