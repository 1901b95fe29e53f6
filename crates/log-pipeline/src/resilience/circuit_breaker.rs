// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Failure-ratio circuit breaker.
//!
//! ```text
//! ┌────────┐ ratio >= threshold ┌──────┐  open_timeout  ┌──────────┐
//! │ Closed │ ─────────────────> │ Open │ ─────────────> │ HalfOpen │
//! └────────┘                    └──────┘ <───────────── └──────────┘
//!      ^                                   any failure       │
//!      └──────────── max_half_open_requests successes ───────┘
//! ```
//!
//! Outcomes are tracked per generation. A generation ends whenever the state
//! changes and, while closed, every `count_interval`. Results reported for an
//! older generation are ignored so a slow request cannot flip a breaker that
//! has already moved on.

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Minimum requests in the current generation before the ratio is considered.
    pub min_requests: u32,
    /// Failure ratio (0.0-1.0) at or above which the breaker opens.
    pub failure_ratio: f64,
    /// Trial requests admitted while half-open; the same number of consecutive
    /// successes closes the breaker.
    pub max_half_open_requests: u32,
    /// Cool-down spent open before trial requests are admitted.
    pub open_timeout: Duration,
    /// Closed-state counts are cleared at this cadence. Zero never clears.
    pub count_interval: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            min_requests: 3,
            failure_ratio: 0.6,
            max_half_open_requests: 3,
            open_timeout: Duration::from_secs(60),
            count_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half-open"),
            Self::Open => write!(f, "open"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests += 1;
    }

    fn on_success(&mut self) {
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }
}

/// Why a request was not let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Open,
    TooManyRequests,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let now = Instant::now();
        let expiry = (!config.count_interval.is_zero()).then(|| now + config.count_interval);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.state_at(Instant::now())
    }

    pub fn counts(&self) -> Counts {
        self.lock().counts
    }

    /// Admits a request, returning the generation its outcome belongs to.
    pub fn before_request(&self) -> Result<u64, Rejection> {
        self.before_request_at(Instant::now())
    }

    /// Records the outcome of a request admitted by [`Self::before_request`].
    pub fn after_request(&self, generation: u64, success: bool) {
        self.after_request_at(generation, success, Instant::now());
    }

    pub(crate) fn state_at(&self, now: Instant) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner, now);
        inner.state
    }

    pub(crate) fn before_request_at(&self, now: Instant) -> Result<u64, Rejection> {
        let mut inner = self.lock();
        self.refresh(&mut inner, now);

        match inner.state {
            CircuitState::Open => return Err(Rejection::Open),
            CircuitState::HalfOpen
                if inner.counts.requests >= self.config.max_half_open_requests =>
            {
                return Err(Rejection::TooManyRequests)
            }
            _ => {}
        }

        inner.counts.on_request();
        Ok(inner.generation)
    }

    pub(crate) fn after_request_at(&self, generation: u64, success: bool, now: Instant) {
        let mut inner = self.lock();
        self.refresh(&mut inner, now);
        if inner.generation != generation {
            return;
        }

        match (inner.state, success) {
            (CircuitState::Closed, true) => inner.counts.on_success(),
            (CircuitState::Closed, false) => {
                inner.counts.on_failure();
                if self.ready_to_trip(&inner.counts) {
                    self.set_state(&mut inner, CircuitState::Open, now);
                }
            }
            (CircuitState::HalfOpen, true) => {
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.config.max_half_open_requests {
                    self.set_state(&mut inner, CircuitState::Closed, now);
                }
            }
            (CircuitState::HalfOpen, false) => {
                self.set_state(&mut inner, CircuitState::Open, now);
            }
            (CircuitState::Open, _) => {}
        }
    }

    fn ready_to_trip(&self, counts: &Counts) -> bool {
        if counts.requests < self.config.min_requests || counts.requests == 0 {
            return false;
        }
        let ratio = f64::from(counts.total_failures) / f64::from(counts.requests);
        ratio >= self.config.failure_ratio
    }

    fn refresh(&self, inner: &mut Inner, now: Instant) {
        match inner.state {
            CircuitState::Closed => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.new_generation(inner, now);
                }
            }
            CircuitState::Open => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.set_state(inner, CircuitState::HalfOpen, now);
                }
            }
            CircuitState::HalfOpen => {}
        }
    }

    fn set_state(&self, inner: &mut Inner, state: CircuitState, now: Instant) {
        if inner.state == state {
            return;
        }
        let previous = inner.state;
        inner.state = state;
        self.new_generation(inner, now);
        // Logging only; never waits on anything while the lock is held.
        warn!(
            "Circuit breaker {} state changed from {} to {}",
            self.name, previous, state
        );
    }

    fn new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            CircuitState::Closed => (!self.config.count_interval.is_zero())
                .then(|| now + self.config.count_interval),
            CircuitState::Open => Some(now + self.config.open_timeout),
            CircuitState::HalfOpen => None,
        };
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // The guarded section only does arithmetic, so a poisoned lock still
        // holds consistent counts.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", CircuitBreakerConfig::default())
    }

    fn record(breaker: &CircuitBreaker, now: Instant, success: bool) {
        let generation = breaker.before_request_at(now).unwrap();
        breaker.after_request_at(generation, success, now);
    }

    #[test]
    fn test_starts_closed() {
        let breaker = breaker();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.name(), "test");
    }

    #[test]
    fn test_does_not_trip_below_min_requests() {
        let breaker = breaker();
        let now = Instant::now();
        record(&breaker, now, false);
        record(&breaker, now, false);
        assert_eq!(breaker.state_at(now), CircuitState::Closed);
    }

    #[test]
    fn test_trips_at_sixty_percent_failures() {
        let breaker = breaker();
        let now = Instant::now();
        record(&breaker, now, true);
        record(&breaker, now, true);
        record(&breaker, now, false);
        record(&breaker, now, false);
        assert_eq!(breaker.state_at(now), CircuitState::Closed);
        // 3 failures out of 5 requests
        record(&breaker, now, false);
        assert_eq!(breaker.state_at(now), CircuitState::Open);
    }

    #[test]
    fn test_open_rejects_until_cool_down() {
        let breaker = breaker();
        let now = Instant::now();
        for _ in 0..3 {
            record(&breaker, now, false);
        }
        assert_eq!(breaker.before_request_at(now), Err(Rejection::Open));
        assert_eq!(
            breaker.before_request_at(now + Duration::from_secs(59)),
            Err(Rejection::Open)
        );
        let later = now + Duration::from_secs(61);
        assert_eq!(breaker.state_at(later), CircuitState::HalfOpen);
        assert!(breaker.before_request_at(later).is_ok());
    }

    #[test]
    fn test_half_open_closes_after_consecutive_successes() {
        let breaker = breaker();
        let now = Instant::now();
        for _ in 0..3 {
            record(&breaker, now, false);
        }
        let later = now + Duration::from_secs(61);
        record(&breaker, later, true);
        record(&breaker, later, true);
        assert_eq!(breaker.state_at(later), CircuitState::HalfOpen);
        record(&breaker, later, true);
        assert_eq!(breaker.state_at(later), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = breaker();
        let now = Instant::now();
        for _ in 0..3 {
            record(&breaker, now, false);
        }
        let later = now + Duration::from_secs(61);
        record(&breaker, later, true);
        record(&breaker, later, false);
        assert_eq!(breaker.state_at(later), CircuitState::Open);
    }

    #[test]
    fn test_half_open_limits_trial_requests() {
        let breaker = breaker();
        let now = Instant::now();
        for _ in 0..3 {
            record(&breaker, now, false);
        }
        let later = now + Duration::from_secs(61);
        for _ in 0..3 {
            assert!(breaker.before_request_at(later).is_ok());
        }
        assert_eq!(
            breaker.before_request_at(later),
            Err(Rejection::TooManyRequests)
        );
    }

    #[test]
    fn test_closed_counts_reset_each_interval() {
        let breaker = breaker();
        let now = Instant::now();
        record(&breaker, now, false);
        record(&breaker, now, false);
        assert_eq!(breaker.counts().total_failures, 2);

        let next_interval = now + Duration::from_secs(11);
        record(&breaker, next_interval, false);
        assert_eq!(breaker.state_at(next_interval), CircuitState::Closed);
        assert_eq!(breaker.counts().requests, 1);
    }

    #[test]
    fn test_stale_generation_outcome_is_ignored() {
        let breaker = breaker();
        let now = Instant::now();
        let stale = breaker.before_request_at(now).unwrap();
        // Two failures out of three admitted requests trips the breaker.
        record(&breaker, now, false);
        record(&breaker, now, false);
        assert_eq!(breaker.state_at(now), CircuitState::Open);
        // Breaker is open now; a late success from before the trip changes nothing.
        breaker.after_request_at(stale, true, now);
        assert_eq!(breaker.state_at(now), CircuitState::Open);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
        assert_eq!(CircuitState::Open.to_string(), "open");
    }
}
