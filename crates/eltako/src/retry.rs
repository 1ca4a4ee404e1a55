use std::time::Duration;

use tracing::error;

use crate::error::Result;

// Fixed delay between two attempts. Failures are expected to be
// transient, so neither backoff nor jitter is applied.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Runs `operation` up to `attempts` times.
///
/// The first success is returned immediately. Each failure, except the
/// last one, is followed by a fixed 500 ms pause. Once all attempts
/// are exhausted, the most recent error is returned to the caller.
///
/// # Errors
///
/// The error of the last failed attempt.
pub async fn times<T, F, Fut>(attempts: u32, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut current = 0;
    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        current += 1;
        if current >= attempts {
            error!("Failed to execute after {attempts} attempts: {error}");
            return Err(error);
        }

        error!("Failed to execute, retrying: {error}");
        tokio::time::sleep(RETRY_DELAY).await;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use crate::error::{Error, ErrorKind};

    use super::times;

    #[tokio::test(start_paused = true)]
    async fn success_is_returned_immediately() {
        let calls = Cell::new(0);

        let start = tokio::time::Instant::now();
        let result = times(3, || {
            calls.set(calls.get() + 1);
            async { Ok(7) }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.get(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn two_failures_then_success_sleeps_twice() {
        let calls = Cell::new(0);

        let start = tokio::time::Instant::now();
        let result = times(3, || {
            calls.set(calls.get() + 1);
            let attempt = calls.get();
            async move {
                if attempt < 3 {
                    Err(Error::new(ErrorKind::Transport, "connection reset"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.get(), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_return_the_last_error() {
        let calls = Cell::new(0);

        let result: Result<i32, _> = times(3, || {
            calls.set(calls.get() + 1);
            let attempt = calls.get();
            async move { Err(Error::new(ErrorKind::Device, format!("attempt {attempt}"))) }
        })
        .await;

        assert_eq!(calls.get(), 3);
        assert_eq!(result, Err(Error::new(ErrorKind::Device, "attempt 3")));
    }
}
