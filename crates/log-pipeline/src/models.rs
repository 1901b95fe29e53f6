// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Body of a Loki `query_range` response.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct LogQueryResult {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub data: QueryData,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct QueryData {
    #[serde(default, rename = "resultType")]
    pub result_type: String,
    #[serde(default)]
    pub result: Vec<LogStream>,
}

/// One matching stream: its labels and `[timestamp, payload]` pairs in order.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct LogStream {
    #[serde(default)]
    pub stream: HashMap<String, String>,
    #[serde(default)]
    pub values: Vec<Vec<String>>,
}

impl LogQueryResult {
    pub fn record_count(&self) -> usize {
        self.data.result.iter().map(|s| s.values.len()).sum()
    }
}

/// A log entry as shipped by the collector into Loki. Missing keys and
/// explicit `null`s both decode to the zero value.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawLogRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub fields: RecordFields,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: HashMap<String, String>,
    /// Nanoseconds since the Unix epoch.
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RecordFields {
    /// Multi-line `Key: value` text, see [`crate::transform::parse_embedded_payload`].
    #[serde(default, rename = "Data", deserialize_with = "null_as_default")]
    pub data: String,
    #[serde(default, rename = "EventRecordID", deserialize_with = "null_as_default")]
    pub event_record_id: i64,
    #[serde(default, rename = "Message", deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default, rename = "ProcessName", deserialize_with = "null_as_default")]
    pub process_name: String,
    #[serde(default, rename = "UserID", deserialize_with = "null_as_default")]
    pub user_id: String,
    #[serde(default, rename = "Version", deserialize_with = "null_as_default")]
    pub version: i64,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl RawLogRecord {
    pub fn event_record_id(&self) -> i64 {
        self.fields.event_record_id
    }

    pub fn computer(&self) -> &str {
        self.tags.get("Computer").map_or("", String::as_str)
    }
}

/// Typed view of the embedded `Data` payload. Integer fields that are absent
/// or fail to parse stay at 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPayload {
    pub error: i64,
    pub severity: i64,
    pub state: i64,
    pub start_time: String,
    pub trace_type: String,
    pub event_class_desc: String,
    pub login_name: String,
    pub host_name: String,
    pub text_data: String,
    pub application_name: String,
    pub database_name: String,
    pub object_name: String,
    pub role_name: String,
}

/// Flat record written to Victoria. Field names follow the
/// `database_audit_logs` schema.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub event_record_id: i64,
    pub timestamp: i64,
    pub computer: String,
    pub error_code: i64,
    pub severity: i64,
    pub state: i64,
    pub start_time: String,
    pub trace_type: String,
    pub event_class_desc: String,
    pub login_name: String,
    pub host_name: String,
    pub text_data: String,
    pub application_name: String,
    pub database_name: String,
    pub object_name: String,
    pub role_name: String,
}
