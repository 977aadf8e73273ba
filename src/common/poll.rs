use std::time::Duration;
use tracing::{debug, warn};

/// Poll a condition at a fixed interval until it holds or the attempts run out.
///
/// The condition is first checked one interval after the call. Returns the
/// attempt number that observed the condition, or `Err(max_attempts)` once
/// every attempt has been spent.
pub async fn poll_until<F>(
    mut condition: F,
    max_attempts: u32,
    interval: Duration,
    log_context: &str,
) -> Result<u32, u32>
where
    F: FnMut() -> bool,
{
    for attempt in 1..=max_attempts {
        tokio::time::sleep(interval).await;

        if condition() {
            if attempt > 1 {
                debug!("{} satisfied after {} attempts", log_context, attempt);
            }
            return Ok(attempt);
        }

        debug!("{} not satisfied (attempt {}/{})", log_context, attempt, max_attempts);
    }

    warn!(
        "{} not satisfied after {} attempts ({:?} apart)",
        log_context, max_attempts, interval
    );
    Err(max_attempts)
}
