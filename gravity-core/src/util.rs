use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};

use gravity_logging::LOG_CORE;
use tracing::{debug, warn};

/// Milliseconds since the unix epoch, used as transaction timestamps.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock set before the unix epoch")
        .as_millis() as u64
}

pub mod backoff_util {
    use std::time::Duration;

    pub use backon::{Backoff, FibonacciBackoff};
    use backon::{BackoffBuilder, FibonacciBuilder};

    /// Backoff strategy for background tasks.
    ///
    /// Starts at 1s and increases to 60s, never giving up.
    pub fn background_backoff() -> FibonacciBackoff {
        custom_backoff(Duration::from_secs(1), Duration::from_secs(60), None)
    }

    /// A backoff strategy for relatively quick foreground operations.
    ///
    /// Starts at 200ms and increases to 5s, retrying 10 times before giving
    /// up.
    pub fn aggressive_backoff() -> FibonacciBackoff {
        custom_backoff(Duration::from_millis(200), Duration::from_secs(5), Some(10))
    }

    pub fn custom_backoff(
        min_delay: Duration,
        max_delay: Duration,
        max_retries_or: Option<usize>,
    ) -> FibonacciBackoff {
        FibonacciBuilder::default()
            .with_jitter()
            .with_min_delay(min_delay)
            .with_max_delay(max_delay)
            .with_max_times(max_retries_or.unwrap_or(usize::MAX))
            .build()
    }
}

/// Run the supplied closure `op_fn` until it succeeds. Frequency and number
/// of retries is determined by the specified strategy.
///
/// # Returns
///
/// - If the closure runs successfully, the result is immediately returned
/// - If the closure kept failing until the strategy gave up, the last error
///   is returned
pub async fn retry<F, Fut, T>(
    op_name: impl Into<String>,
    strategy: impl backoff_util::Backoff,
    op_fn: F,
) -> Result<T, anyhow::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, anyhow::Error>>,
{
    let mut strategy = strategy;
    let op_name = op_name.into();
    let mut attempts: u64 = 0;
    loop {
        attempts += 1;
        match op_fn().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if let Some(interval) = strategy.next() {
                    debug!(
                        target: LOG_CORE,
                        %error,
                        %attempts,
                        interval_ms = %interval.as_millis(),
                        "{} failed, retrying",
                        op_name,
                    );
                    tokio::time::sleep(interval).await;
                } else {
                    warn!(
                        target: LOG_CORE,
                        %error,
                        %attempts,
                        "{} failed, giving up",
                        op_name,
                    );
                    return Err(error);
                }
            }
        }
    }
}
