use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Duration-based segmentation check for one recording.
///
/// Re-checks the elapsed time every `check_interval` instead of sleeping until the
/// deadline, so a split happens within one check interval after `max_duration`.
/// Cancelled through its token when the owning recording is removed.
#[derive(Debug)]
pub struct SegmentWatchdog {
    started: Instant,
    max_duration: Duration,
    check_interval: Duration,
    cancel: CancellationToken,
}

impl SegmentWatchdog {
    #[must_use]
    pub fn new(started: Instant, max_duration: Duration, check_interval: Duration) -> Self {
        Self {
            started,
            max_duration,
            check_interval,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolves to true once the recording is older than the maximum duration,
    /// or false if the watchdog was cancelled first.
    pub async fn wait_expired(&self) -> bool {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return false,
                () = tokio::time::sleep(self.check_interval) => {}
            }
            if self.started.elapsed() >= self.max_duration {
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_expires_within_one_check_interval() {
        let start = Instant::now();
        let watchdog = SegmentWatchdog::new(
            start,
            Duration::from_secs(50),
            Duration::from_secs(15),
        );

        assert!(watchdog.wait_expired().await);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(50), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(65), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_waiting() {
        let watchdog = SegmentWatchdog::new(
            Instant::now(),
            Duration::from_secs(3600),
            Duration::from_secs(15),
        );
        let token = watchdog.token();

        let handle = tokio::spawn(async move { watchdog.wait_expired().await });
        tokio::time::sleep(Duration::from_secs(100)).await;
        token.cancel();

        assert!(!handle.await.unwrap());
    }
}
