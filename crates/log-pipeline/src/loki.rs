// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::{Duration, SystemTime};
use tracing::debug;

use crate::error::{RequestError, ResilienceError};
use crate::http_utils::{endpoint, get_client};
use crate::models::LogQueryResult;
use crate::resilience::ResiliencePolicy;
use crate::time_window::unix_nanos;

pub const QUERY_RANGE_PATH: &str = "/loki/api/v1/query_range";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a polling cycle reads its records from.
#[async_trait]
pub trait LogSource {
    async fn query_logs(
        &self,
        query: &str,
        start: SystemTime,
        end: SystemTime,
    ) -> Result<LogQueryResult, ResilienceError>;
}

#[derive(Debug, Clone)]
pub struct LokiClient {
    base_url: String,
    client: reqwest::Client,
    policy: ResiliencePolicy,
}

impl LokiClient {
    pub fn new(base_url: impl Into<String>, policy: ResiliencePolicy) -> Self {
        Self {
            base_url: base_url.into(),
            client: get_client(REQUEST_TIMEOUT),
            policy,
        }
    }

    pub fn policy(&self) -> &ResiliencePolicy {
        &self.policy
    }

    async fn query_once(
        &self,
        url: &str,
        params: &[(&str, String); 3],
    ) -> Result<LogQueryResult, RequestError> {
        let response = self.client.get(url).query(params).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(RequestError::Status(status));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(RequestError::Decode)
    }
}

#[async_trait]
impl LogSource for LokiClient {
    async fn query_logs(
        &self,
        query: &str,
        start: SystemTime,
        end: SystemTime,
    ) -> Result<LogQueryResult, ResilienceError> {
        let url = endpoint(&self.base_url, QUERY_RANGE_PATH);
        let params = [
            ("query", query.to_string()),
            ("start", unix_nanos(start).to_string()),
            ("end", unix_nanos(end).to_string()),
        ];

        let result = self
            .policy
            .execute(|| self.query_once(&url, &params))
            .await?;
        debug!(
            "LOKI | Query returned {} streams with {} records",
            result.data.result.len(),
            result.record_count()
        );
        Ok(result)
    }
}
