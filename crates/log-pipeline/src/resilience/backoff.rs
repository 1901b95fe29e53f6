// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use rand::Rng;
use std::time::{Duration, Instant};

/// Exponential backoff settings.
///
/// The delay before retry `n` is `initial_interval * multiplier^(n-1)`, capped at
/// `max_interval`, then spread by `randomization_factor` (0.5 means the actual
/// delay lands anywhere in `[0.5 * d, 1.5 * d]`). Retrying stops once the next
/// delay would push the total elapsed time past `max_elapsed_time`, or once
/// `max_attempts` calls have been made.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub randomization_factor: f64,
    pub max_elapsed_time: Duration,
    /// Upper bound on calls including the first one. `None` leaves only the
    /// elapsed time budget.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(60),
            multiplier: 2.0,
            randomization_factor: 0.5,
            max_elapsed_time: Duration::from_secs(120),
            max_attempts: None,
        }
    }
}

/// Running state of one retry sequence.
#[derive(Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current_interval: Duration,
    attempts: u32,
    started: Instant,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current_interval: config.initial_interval,
            config,
            attempts: 1,
            started: Instant::now(),
        }
    }

    /// Delay to wait before the next attempt, or `None` when the sequence is
    /// out of budget.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        self.next_backoff_at(Instant::now())
    }

    pub(crate) fn next_backoff_at(&mut self, now: Instant) -> Option<Duration> {
        if let Some(max_attempts) = self.config.max_attempts {
            if self.attempts >= max_attempts {
                return None;
            }
        }

        let delay = randomize(self.current_interval, self.config.randomization_factor);
        self.current_interval = grow(
            self.current_interval,
            self.config.multiplier,
            self.config.max_interval,
        );

        let elapsed = now.saturating_duration_since(self.started);
        if elapsed + delay > self.config.max_elapsed_time {
            return None;
        }

        self.attempts += 1;
        Some(delay)
    }
}

/// Next interval, capped at `max`. A product too large for `Duration`
/// saturates to `max`.
fn grow(interval: Duration, multiplier: f64, max: Duration) -> Duration {
    let secs = interval.as_secs_f64() * multiplier.max(1.0);
    Duration::try_from_secs_f64(secs).unwrap_or(max).min(max)
}

fn randomize(interval: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || interval.is_zero() {
        return interval;
    }
    let secs = interval.as_secs_f64();
    let delta = secs * factor.min(1.0);
    let jittered = rand::thread_rng().gen_range((secs - delta)..=(secs + delta));
    Duration::from_secs_f64(jittered.max(0.0))
}
