//! Retry for transient SQLite lock errors
//!
//! Concurrent palette writers can hit "database is locked" when their
//! transactions overlap. Those errors are retried with exponential backoff
//! (10 ms doubling up to 1 s) until `max_wait` elapses; every other error is
//! returned immediately.

use std::future::Future;
use std::time::{Duration, Instant};
use trk_common::{Error, Result};

/// Default upper bound on time spent retrying one operation
pub const DEFAULT_MAX_LOCK_WAIT: Duration = Duration::from_millis(5000);

pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait: Duration,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let mut attempt = 0u32;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_lock_error(&err) {
            return Err(err);
        }

        let elapsed = start.elapsed();
        if elapsed >= max_wait {
            tracing::error!(
                operation = operation_name,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                "Database still locked, giving up"
            );
            return Err(Error::Internal(format!(
                "Database locked after {} attempts ({} ms)",
                attempt,
                elapsed.as_millis()
            )));
        }

        tracing::warn!(
            operation = operation_name,
            attempt,
            backoff_ms,
            "Database locked, will retry after backoff"
        );
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(1000);
    }
}

fn is_lock_error(err: &Error) -> bool {
    match err {
        Error::Database(db_err) => {
            let msg = db_err.to_string();
            msg.contains("database is locked") || msg.contains("database table is locked")
        }
        _ => false,
    }
}
