//! Per-domain politeness: concurrency bounds, request spacing and the
//! latency-driven adaptive delay
//!
//! The three pieces are independent so the dispatcher can hold a domain permit
//! while it waits for its pacing slot:
//! - [`DomainLimiter`] bounds in-flight fetches per domain
//! - [`Pacer`] spaces request starts per domain, with optional jitter
//! - [`AdaptiveDelay`] tunes the base delay from observed latencies

use crate::config::{CrawlerConfig, ThrottleConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Bounds the number of in-flight fetches per domain
///
/// One semaphore per domain, created lazily on first use.
#[derive(Debug)]
pub struct DomainLimiter {
    per_domain: usize,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl DomainLimiter {
    /// Creates a limiter allowing `per_domain` concurrent fetches per domain
    pub fn new(per_domain: usize) -> Self {
        Self {
            per_domain: per_domain.max(1),
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    fn semaphore(&self, domain: &str) -> Arc<Semaphore> {
        let mut semaphores = self.semaphores.lock().unwrap_or_else(PoisonError::into_inner);
        semaphores
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_domain)))
            .clone()
    }

    /// Takes a permit for `domain` only if one is free right now
    ///
    /// The slot is released when the permit is dropped.
    pub fn try_acquire(&self, domain: &str) -> Option<OwnedSemaphorePermit> {
        self.semaphore(domain).try_acquire_owned().ok()
    }
}

/// Spaces request starts per domain
///
/// Each call to [`Pacer::reserve`] books the next start slot for a domain and
/// returns how long the caller must wait for it. Bookings are serialized per
/// pacer, so concurrent callers never share a slot.
#[derive(Debug)]
pub struct Pacer {
    randomize: bool,
    jitter: f64,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl Pacer {
    /// Creates a pacer
    ///
    /// # Arguments
    ///
    /// * `randomize` - Whether to scale each delay by a random factor
    /// * `jitter` - Half-width of the random factor window, in [0, 1)
    pub fn new(randomize: bool, jitter: f64) -> Self {
        Self {
            randomize,
            jitter: jitter.clamp(0.0, 0.99),
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a pacer from the crawler configuration
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self::new(config.randomize_delay, config.jitter)
    }

    /// Applies the jitter window to a delay
    ///
    /// The result lies in `[delay * (1 - jitter), delay * (1 + jitter)]`.
    pub fn jittered(&self, delay: Duration) -> Duration {
        if !self.randomize || self.jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = 1.0 - self.jitter + fastrand::f64() * 2.0 * self.jitter;
        delay.mul_f64(factor)
    }

    /// Books the next start slot for `domain`, returning the wait until it
    ///
    /// The first request to a domain starts immediately; every later one
    /// starts at least one (jittered) delay after the previous booking.
    pub fn reserve(&self, domain: &str, delay: Duration) -> Duration {
        let now = Instant::now();
        let spacing = self.jittered(delay);

        let mut slots = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
        let start = match slots.get(domain) {
            Some(&next) if next > now => next,
            _ => now,
        };
        slots.insert(domain.to_string(), start + spacing);

        start.saturating_duration_since(now)
    }

    /// Books a slot and sleeps until it
    pub async fn wait_turn(&self, domain: &str, delay: Duration) {
        let wait = self.reserve(domain, delay);
        if !wait.is_zero() {
            tracing::trace!("Pacing {}: waiting {:?}", domain, wait);
            tokio::time::sleep(wait).await;
        }
    }
}

/// Latency-driven request delay
///
/// After each completed fetch the delay moves towards the observed latency:
/// - latency above the target raises the delay by the overshoot
/// - otherwise a successful response decays it a quarter of the way to the
///   minimum
///
/// The value is always kept within `[min_delay, max_delay]`. When adaptive
/// throttling is disabled the delay stays at its initial value.
#[derive(Debug)]
pub struct AdaptiveDelay {
    enabled: bool,
    current_ms: AtomicU64,
    target_ms: u64,
    min_ms: u64,
    max_ms: u64,
}

impl AdaptiveDelay {
    /// Creates an adaptive delay starting at `initial`, clamped to the bounds
    pub fn new(initial: Duration, target: Duration, min: Duration, max: Duration) -> Self {
        let min_ms = min.as_millis() as u64;
        let max_ms = (max.as_millis() as u64).max(min_ms);
        let initial_ms = (initial.as_millis() as u64).clamp(min_ms, max_ms);
        Self {
            enabled: true,
            current_ms: AtomicU64::new(initial_ms),
            target_ms: target.as_millis() as u64,
            min_ms,
            max_ms,
        }
    }

    /// Creates a delay that never moves
    pub fn fixed(delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            enabled: false,
            current_ms: AtomicU64::new(ms),
            target_ms: 0,
            min_ms: ms,
            max_ms: ms,
        }
    }

    /// Builds the delay for a run
    ///
    /// With throttling enabled the download delay is the starting point;
    /// otherwise the download delay is used as-is.
    pub fn from_config(crawler: &CrawlerConfig, throttle: &ThrottleConfig) -> Self {
        if throttle.enabled {
            Self::new(
                crawler.download_delay(),
                Duration::from_millis(throttle.target_latency),
                Duration::from_millis(throttle.min_delay),
                Duration::from_millis(throttle.max_delay),
            )
        } else {
            Self::fixed(crawler.download_delay())
        }
    }

    /// Returns the current delay
    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms.load(Ordering::Relaxed))
    }

    /// Feeds one completed fetch into the delay
    ///
    /// # Arguments
    ///
    /// * `latency` - Time the fetch took
    /// * `ok` - Whether the response was usable (a 2xx document)
    ///
    /// # Returns
    ///
    /// The delay after the update
    pub fn observe(&self, latency: Duration, ok: bool) -> Duration {
        if !self.enabled {
            return self.current();
        }

        let latency_ms = latency.as_millis() as u64;
        let previous = self
            .current_ms
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(self.next_value(current, latency_ms, ok))
            })
            // The closure always returns Some
            .unwrap_or_else(|current| current);

        let updated = self.next_value(previous, latency_ms, ok);
        if updated != previous {
            tracing::debug!(
                "Adaptive delay {}ms -> {}ms (latency {}ms)",
                previous,
                updated,
                latency_ms
            );
        }
        Duration::from_millis(updated)
    }

    fn next_value(&self, current: u64, latency_ms: u64, ok: bool) -> u64 {
        let next = if latency_ms > self.target_ms {
            current.saturating_add(latency_ms - self.target_ms)
        } else if ok {
            let gap = current.saturating_sub(self.min_ms);
            current - (gap + 3) / 4
        } else {
            current
        };
        next.clamp(self.min_ms, self.max_ms)
    }
}
