//! Per-host concurrency limiting.
//!
//! Each host admits a bounded number of in-flight requests. The engine
//! acquires a [`ThrottlePermit`] before every attempt and holds it for as
//! long as the response body is alive; dropping the permit releases the
//! slot. Custom [`Throttle`] implementations can use the request metadata
//! to prioritize small or interactive requests over bulk transfers.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::request::RequestKind;
use crate::types::{ErrorKind, Result};

/// Metadata describing a request waiting for a slot, for priority-aware
/// limiter implementations.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleData {
    /// What the request is for
    pub kind: RequestKind,
    /// Approximate size of the transfer (request body plus expected
    /// response plus surrounding transaction)
    pub size: u64,
}

/// Permit for one in-flight request. Dropping the permit releases the
/// slot, so a permit can never be released twice.
pub struct ThrottlePermit {
    _guard: Option<Box<dyn Any + Send>>,
}

impl ThrottlePermit {
    /// Wraps a guard object whose `Drop` releases the underlying slot.
    #[must_use]
    pub fn new(guard: impl Any + Send) -> Self {
        Self {
            _guard: Some(Box::new(guard)),
        }
    }

    /// A permit that does not limit anything.
    #[must_use]
    pub fn unlimited() -> Self {
        Self { _guard: None }
    }
}

impl fmt::Debug for ThrottlePermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottlePermit").finish_non_exhaustive()
    }
}

/// A concurrency limiter scoped to a single host.
#[async_trait]
pub trait Throttle: Send + Sync + fmt::Debug {
    /// Waits until the request may proceed. The returned permit must be
    /// held for the lifetime of the request.
    async fn acquire(&self, data: ThrottleData) -> Result<ThrottlePermit>;
}

/// Default [`Throttle`]: a plain semaphore ignoring request metadata.
#[derive(Debug)]
pub struct SemaphoreThrottle {
    semaphore: Arc<Semaphore>,
}

impl SemaphoreThrottle {
    /// Creates a throttle admitting `permits` concurrent requests.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Current number of free slots.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl Throttle for SemaphoreThrottle {
    async fn acquire(&self, _data: ThrottleData) -> Result<ThrottlePermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| ErrorKind::Throttle(e.to_string()))?;
        Ok(ThrottlePermit::new(permit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permit_released_on_drop() {
        let throttle = SemaphoreThrottle::new(2);
        let data = ThrottleData {
            kind: RequestKind::Unknown,
            size: 0,
        };

        let first = throttle.acquire(data).await.unwrap();
        let second = throttle.acquire(data).await.unwrap();
        assert_eq!(throttle.available_permits(), 0);

        drop(first);
        assert_eq!(throttle.available_permits(), 1);
        drop(second);
        assert_eq!(throttle.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_free_slot() {
        let throttle = Arc::new(SemaphoreThrottle::new(1));
        let data = ThrottleData {
            kind: RequestKind::Blob,
            size: 1024,
        };

        let held = throttle.acquire(data).await.unwrap();
        let waiter = {
            let throttle = Arc::clone(&throttle);
            tokio::spawn(async move { throttle.acquire(data).await })
        };

        // the waiter cannot finish while the permit is held
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        let permit = waiter.await.unwrap();
        assert!(permit.is_ok());
    }
}
