// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{RequestError, ResilienceError};
use crate::http_utils::{endpoint, get_client};
use crate::models::DeliveryRecord;
use crate::resilience::ResiliencePolicy;

pub const WRITE_PATH: &str = "/write";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where transformed records are delivered.
#[async_trait]
pub trait LogSink {
    async fn send_record(&self, record: &DeliveryRecord) -> Result<(), ResilienceError>;
}

/// Wire form of one record: the flat fields plus the `_schema` tag.
#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "_schema")]
    schema: &'a str,
    #[serde(flatten)]
    record: &'a DeliveryRecord,
}

#[derive(Debug, Clone)]
pub struct VictoriaClient {
    base_url: String,
    schema: String,
    client: reqwest::Client,
    policy: ResiliencePolicy,
}

impl VictoriaClient {
    pub fn new(
        base_url: impl Into<String>,
        schema: impl Into<String>,
        policy: ResiliencePolicy,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            schema: schema.into(),
            client: get_client(REQUEST_TIMEOUT),
            policy,
        }
    }

    pub fn policy(&self) -> &ResiliencePolicy {
        &self.policy
    }

    pub fn encode(&self, record: &DeliveryRecord) -> Result<Bytes, RequestError> {
        let envelope = Envelope {
            schema: &self.schema,
            record,
        };
        serde_json::to_vec(&envelope)
            .map(Bytes::from)
            .map_err(RequestError::Encode)
    }

    async fn write_once(&self, url: &str, payload: Bytes) -> Result<(), RequestError> {
        let response = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(RequestError::Status(status)),
        }
    }
}

#[async_trait]
impl LogSink for VictoriaClient {
    async fn send_record(&self, record: &DeliveryRecord) -> Result<(), ResilienceError> {
        let payload = self.encode(record).map_err(ResilienceError::Permanent)?;
        let url = endpoint(&self.base_url, WRITE_PATH);

        self.policy
            .execute(|| self.write_once(&url, payload.clone()))
            .await?;
        debug!("VICTORIA | Wrote event {}", record.event_record_id);
        Ok(())
    }
}
