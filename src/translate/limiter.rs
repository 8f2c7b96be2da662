// src/translate/limiter.rs
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use metrics::gauge;
use tokio::sync::{Semaphore, SemaphorePermit};

use super::engine::TranslateError;

/// Process-wide cap on concurrent calls to translation engines.
///
/// Backed by a tokio [`Semaphore`], which hands out permits in FIFO order,
/// so a waiting caller cannot be starved by later arrivals.
#[derive(Debug)]
pub struct RateLimiter {
    sem: Semaphore,
    max: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Held for the duration of one engine call.
pub struct LimiterPermit<'a> {
    _permit: SemaphorePermit<'a>,
    owner: &'a RateLimiter,
}

impl Drop for LimiterPermit<'_> {
    fn drop(&mut self) {
        let now = self.owner.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        gauge!("translate_in_flight").set(now as f64);
    }
}

impl RateLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        let max = max_concurrent.max(1);
        Self {
            sem: Semaphore::new(max),
            max,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn shared(max_concurrent: usize) -> Arc<Self> {
        Arc::new(Self::new(max_concurrent))
    }

    pub async fn acquire(&self) -> Result<LimiterPermit<'_>, TranslateError> {
        let permit = self
            .sem
            .acquire()
            .await
            .map_err(|_| TranslateError::LimiterClosed)?;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        gauge!("translate_in_flight").set(now as f64);
        Ok(LimiterPermit {
            _permit: permit,
            owner: self,
        })
    }

    /// Run `f` while holding one permit.
    pub async fn run<F, Fut, T>(&self, f: F) -> Result<T, TranslateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TranslateError>>,
    {
        let _permit = self.acquire().await?;
        f().await
    }

    pub fn max_concurrent(&self) -> usize {
        self.max
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest concurrent in-flight count observed.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Permits that can be taken without waiting.
    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }

    /// Reject all pending and future acquisitions.
    pub fn close(&self) {
        self.sem.close();
    }
}
