// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// A single failed attempt against Loki or Victoria.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned status {0}")]
    Status(StatusCode),

    #[error("failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to marshal data: {0}")]
    Encode(#[source] serde_json::Error),
}

impl RequestError {
    /// Encoding failures are a property of the payload, so sending it again
    /// cannot help. Everything else may clear up on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RequestError::Encode(_))
    }
}

/// Outcome of a call made through a [`crate::resilience::ResiliencePolicy`].
///
/// Callers treat `CircuitOpen` and `TooManyRequests` exactly like
/// `RetriesExhausted`: the remote is unavailable for this call.
#[derive(Debug, thiserror::Error)]
pub enum ResilienceError {
    #[error("all retries failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: RequestError,
    },

    #[error("all retries failed: circuit breaker {name} is open")]
    CircuitOpen { name: String },

    #[error("all retries failed: circuit breaker {name} is half-open and at its trial request limit")]
    TooManyRequests { name: String },

    #[error("non-retryable error: {0}")]
    Permanent(#[source] RequestError),

    #[error("retries cancelled after {attempts} attempts: {source}")]
    Cancelled {
        attempts: u32,
        #[source]
        source: RequestError,
    },
}

/// Failure to handle one `[timestamp, payload]` value of a Loki stream.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("malformed stream value: expected [timestamp, payload], got {0} elements")]
    MalformedValue(usize),

    #[error("failed to unmarshal log entry: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to send log {event_record_id} to Victoria: {source}")]
    Delivery {
        event_record_id: i64,
        #[source]
        source: ResilienceError,
    },
}

/// Error returned by one polling cycle.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to query Loki: {0}")]
    Query(#[source] ResilienceError),

    #[error(
        "encountered {} errors while processing logs: [{}]",
        .errors.len(),
        summarize(.errors)
    )]
    Records { errors: Vec<RecordError> },
}

impl PipelineError {
    /// Number of records that failed in this cycle. Zero for a failed query.
    pub fn failed_records(&self) -> usize {
        match self {
            PipelineError::Query(_) => 0,
            PipelineError::Records { errors } => errors.len(),
        }
    }
}

fn summarize(errors: &[RecordError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Startup configuration problems. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("{service} health check failed: {source}")]
    Request {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned non-200 status: {status}")]
    Status {
        service: &'static str,
        status: StatusCode,
    },
}
