use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum spacing between requests to one host.
///
/// Under sustained load the ledger advances by exactly one period per
/// request, producing a fixed cadence; after an idle gap the next request
/// goes out immediately and restarts the cadence. The lock is held across
/// the sleep so concurrent senders queue up behind each other.
///
/// The wait does not observe cancellation: it is bounded by a single
/// period, which is at most one second for any configured rate.
#[derive(Debug)]
pub(crate) struct Pacer {
    period: Duration,
    next: Mutex<Option<Instant>>,
}

impl Pacer {
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            period,
            next: Mutex::new(None),
        }
    }

    pub(crate) async fn pace(&self) {
        let mut next = self.next.lock().await;
        let now = Instant::now();
        match *next {
            Some(at) if now < at => {
                tokio::time::sleep_until(at).await;
                *next = Some(at + self.period);
            }
            _ => {
                *next = Some(now + self.period);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fixed_cadence_under_load() {
        let pacer = Pacer::new(Duration::from_millis(100));
        let start = Instant::now();

        pacer.pace().await; // immediate
        pacer.pace().await; // +100ms
        pacer.pace().await; // +200ms

        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_cadence_after_idle() {
        let pacer = Pacer::new(Duration::from_millis(100));

        pacer.pace().await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        // well past the ledger: no wait
        let start = Instant::now();
        pacer.pace().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        // but the follow-up request is paced again
        let start = Instant::now();
        pacer.pace().await;
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }
}
