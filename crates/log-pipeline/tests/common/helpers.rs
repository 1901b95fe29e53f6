// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use log_pipeline::resilience::{BackoffConfig, CircuitBreakerConfig, ResiliencePolicy};
use serde_json::json;
use std::time::Duration;

/// Backoff that retries quickly and gives up after `max_attempts` calls.
pub fn fast_backoff(max_attempts: u32) -> BackoffConfig {
    BackoffConfig {
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(5),
        multiplier: 2.0,
        randomization_factor: 0.0,
        max_elapsed_time: Duration::from_secs(10),
        max_attempts: Some(max_attempts),
    }
}

pub fn retry_policy(name: &str, max_attempts: u32) -> ResiliencePolicy {
    ResiliencePolicy::plain_retry(name, fast_backoff(max_attempts))
}

pub fn breaker_policy(name: &str, max_attempts: u32) -> ResiliencePolicy {
    ResiliencePolicy::with_circuit_breaker(
        name,
        fast_backoff(max_attempts),
        CircuitBreakerConfig::default(),
    )
}

/// Serialized collector entry as it appears inside a Loki stream value.
pub fn log_entry(event_record_id: i64, computer: &str, data: &str) -> String {
    json!({
        "fields": {
            "Data": data,
            "EventRecordID": event_record_id,
            "Message": "SQL audit event",
            "ProcessName": "sqlservr.exe",
            "UserID": "S-1-5-18",
            "Version": 1
        },
        "name": "win_eventlog",
        "tags": {"Computer": computer},
        "timestamp": 1_700_000_000_000_000_000_i64
    })
    .to_string()
}

/// `query_range` response body wrapping the given payloads in one stream.
pub fn query_response(payloads: &[String]) -> String {
    let values: Vec<_> = payloads
        .iter()
        .map(|payload| json!(["1700000000000000000", payload]))
        .collect();
    json!({
        "status": "success",
        "data": {
            "resultType": "streams",
            "result": [{"stream": {"job": "mssql-audit"}, "values": values}]
        }
    })
    .to_string()
}
