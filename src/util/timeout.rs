//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::TurnError;

/// Wrap a future with a timeout. A zero duration waits indefinitely.
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T, TurnError>>,
) -> Result<T, TurnError> {
    if duration.is_zero() {
        return future.await;
    }
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(TurnError::Timeout(duration.as_millis() as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_futures_time_out() {
        let err = with_timeout(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, TurnError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, TurnError::Timeout(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_disables_the_limit() {
        let value = with_timeout(Duration::ZERO, async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, TurnError>(5)
        })
        .await
        .expect("no timeout");
        assert_eq!(value, 5);
    }
}
