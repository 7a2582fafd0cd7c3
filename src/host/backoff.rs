use std::time::{Duration, Instant};

use crate::types::{ErrorKind, Result};

/// Per-host failure accounting: a counter that grows on failures and a
/// timestamp before which the host should not be contacted.
///
/// Success only decrements the counter by one rather than resetting it,
/// so a stream that eventually completes does not instantly erase a
/// history of transient failures.
#[derive(Debug, Default)]
pub(crate) struct Backoff {
    cur: usize,
    until: Option<Instant>,
}

impl Backoff {
    /// Records a failure and computes the next delay window.
    ///
    /// The delay doubles with the counter (`delay_init << cur`), capped at
    /// `delay_max`. A `Retry-After` duration raises the delay (still
    /// capped). Returns [`ErrorKind::BackoffLimit`] once the counter
    /// reaches `retry_limit`.
    pub(crate) fn set(
        &mut self,
        delay_init: Duration,
        delay_max: Duration,
        retry_limit: usize,
        retry_after: Option<Duration>,
    ) -> Result<()> {
        self.cur += 1;

        let shift = u32::try_from(self.cur).unwrap_or(u32::MAX).min(30);
        let mut sleep = delay_init.saturating_mul(1 << shift).min(delay_max);
        if let Some(after) = retry_after {
            if after > delay_max {
                sleep = delay_max;
            } else if after > sleep {
                sleep = after;
            }
        }
        self.until = Some(Instant::now() + sleep);

        if self.cur >= retry_limit {
            return Err(ErrorKind::BackoffLimit(self.cur));
        }
        Ok(())
    }

    /// Records a success: clamp the counter to `retry_limit`, step it down
    /// by one, and drop the delay window when it reaches zero.
    pub(crate) fn clear(&mut self, retry_limit: usize) {
        if self.cur > retry_limit {
            self.cur = retry_limit;
        }
        if self.cur > 0 {
            self.cur -= 1;
            if self.cur == 0 {
                self.until = None;
            }
        }
    }

    pub(crate) fn until(&self) -> Option<Instant> {
        self.until
    }

    pub(crate) fn current(&self) -> usize {
        self.cur
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INIT: Duration = Duration::from_secs(1);
    const MAX: Duration = Duration::from_secs(30);

    fn window(backoff: &Backoff) -> Duration {
        backoff.until().unwrap() - Instant::now()
    }

    #[test]
    fn test_delay_doubles_per_failure() {
        let mut backoff = Backoff::default();

        backoff.set(INIT, MAX, 10, None).unwrap();
        assert_eq!(backoff.current(), 1);
        // 1s << 1 = 2s
        assert!(window(&backoff) <= Duration::from_secs(2));
        assert!(window(&backoff) > Duration::from_millis(1900));

        backoff.set(INIT, MAX, 10, None).unwrap();
        // 1s << 2 = 4s
        assert!(window(&backoff) <= Duration::from_secs(4));
        assert!(window(&backoff) > Duration::from_millis(3900));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let mut backoff = Backoff::default();
        for _ in 0..8 {
            let _ = backoff.set(INIT, MAX, 100, None);
        }
        assert!(window(&backoff) <= MAX);
        assert!(window(&backoff) > MAX - Duration::from_millis(100));
    }

    #[test]
    fn test_retry_after_raises_delay() {
        let mut backoff = Backoff::default();
        backoff
            .set(INIT, MAX, 10, Some(Duration::from_secs(5)))
            .unwrap();
        // max(1s << 1, 5s) = 5s
        assert!(window(&backoff) <= Duration::from_secs(5));
        assert!(window(&backoff) > Duration::from_millis(4900));
    }

    #[test]
    fn test_retry_after_still_capped() {
        let mut backoff = Backoff::default();
        backoff
            .set(INIT, MAX, 10, Some(Duration::from_secs(120)))
            .unwrap();
        assert!(window(&backoff) <= MAX);
    }

    #[test]
    fn test_limit_reached() {
        let mut backoff = Backoff::default();
        backoff.set(INIT, MAX, 3, None).unwrap();
        backoff.set(INIT, MAX, 3, None).unwrap();
        let err = backoff.set(INIT, MAX, 3, None).unwrap_err();
        assert!(matches!(err, ErrorKind::BackoffLimit(3)));
    }

    #[test]
    fn test_clear_steps_down() {
        let mut backoff = Backoff::default();
        backoff.set(INIT, MAX, 10, None).unwrap();
        backoff.set(INIT, MAX, 10, None).unwrap();
        assert_eq!(backoff.current(), 2);

        backoff.clear(10);
        assert_eq!(backoff.current(), 1);
        assert!(backoff.until().is_some());

        backoff.clear(10);
        assert_eq!(backoff.current(), 0);
        assert!(backoff.until().is_none());

        // already clear: no underflow
        backoff.clear(10);
        assert_eq!(backoff.current(), 0);
    }

    #[test]
    fn test_clear_clamps_to_retry_limit() {
        let mut backoff = Backoff::default();
        for _ in 0..6 {
            let _ = backoff.set(INIT, MAX, 3, None);
        }
        assert_eq!(backoff.current(), 6);

        backoff.clear(3);
        assert_eq!(backoff.current(), 2);
    }
}
