// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Retry and circuit-breaking around remote calls.
//!
//! Both remote clients route every request through a [`ResiliencePolicy`].
//! A policy always retries with exponential backoff; it may additionally be
//! guarded by a [`CircuitBreaker`], in which case an open breaker ends the
//! call immediately without touching the network.

pub mod backoff;
pub mod circuit_breaker;

use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ResilienceConfig;
use crate::error::{RequestError, ResilienceError};
pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Rejection};

#[derive(Debug, Clone)]
pub struct ResiliencePolicy {
    name: String,
    backoff: BackoffConfig,
    breaker: Option<Arc<CircuitBreaker>>,
    cancel: CancellationToken,
}

impl ResiliencePolicy {
    /// Backoff retries guarded by a circuit breaker named after the client.
    pub fn with_circuit_breaker(
        name: impl Into<String>,
        backoff: BackoffConfig,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        let name = name.into();
        Self {
            breaker: Some(Arc::new(CircuitBreaker::new(name.clone(), breaker))),
            name,
            backoff,
            cancel: CancellationToken::new(),
        }
    }

    /// Backoff retries only.
    pub fn plain_retry(name: impl Into<String>, backoff: BackoffConfig) -> Self {
        Self {
            name: name.into(),
            backoff,
            breaker: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &ResilienceConfig) -> Self {
        if config.circuit_breaker {
            Self::with_circuit_breaker(name, config.backoff(), config.breaker())
        } else {
            Self::plain_retry(name, config.backoff())
        }
    }

    /// Aborts pending backoff sleeps once `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_deref()
    }

    /// Runs `operation` until it succeeds, the retry budget runs out, the
    /// breaker refuses it, or the policy is cancelled.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let mut backoff = ExponentialBackoff::new(self.backoff.clone());
        let mut attempts = 0;

        loop {
            attempts += 1;
            let result = match &self.breaker {
                Some(breaker) => {
                    let generation = breaker.before_request().map_err(|rejection| {
                        debug!("{} | Request rejected by circuit breaker", self.name);
                        self.rejection_error(rejection)
                    })?;
                    let result = operation().await;
                    breaker.after_request(generation, result.is_ok());
                    result
                }
                None => operation().await,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_retryable() => {
                    return Err(ResilienceError::Permanent(error));
                }
                Err(error) => error,
            };

            let Some(delay) = backoff.next_backoff() else {
                return Err(ResilienceError::RetriesExhausted {
                    attempts,
                    source: error,
                });
            };

            warn!(
                "{} | Retrying after {:?} due to error: {}",
                self.name, delay, error
            );
            tokio::select! {
                () = self.cancel.cancelled() => {
                    return Err(ResilienceError::Cancelled { attempts, source: error });
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn rejection_error(&self, rejection: Rejection) -> ResilienceError {
        let name = self.name.clone();
        match rejection {
            Rejection::Open => ResilienceError::CircuitOpen { name },
            Rejection::TooManyRequests => ResilienceError::TooManyRequests { name },
        }
    }
}
