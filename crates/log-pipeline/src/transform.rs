// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::models::{DeliveryRecord, ParsedPayload, RawLogRecord};

/// Extracts the recognized `Key: value` lines of a `Data` payload.
///
/// Lines without a colon and unknown keys are ignored; an integer field whose
/// value does not parse is left at 0. Never fails.
pub fn parse_embedded_payload(data: &str) -> ParsedPayload {
    let mut parsed = ParsedPayload::default();

    for line in data.split('\n') {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim() {
            "Error" => set_int(&mut parsed.error, value),
            "Severity" => set_int(&mut parsed.severity, value),
            "State" => set_int(&mut parsed.state, value),
            "StartTime" => parsed.start_time = value.to_string(),
            "TraceType" => parsed.trace_type = value.to_string(),
            "EventClassDesc" => parsed.event_class_desc = value.to_string(),
            "LoginName" => parsed.login_name = value.to_string(),
            "HostName" => parsed.host_name = value.to_string(),
            "TextData" => parsed.text_data = value.to_string(),
            "ApplicationName" => parsed.application_name = value.to_string(),
            "DatabaseName" => parsed.database_name = value.to_string(),
            "ObjectName" => parsed.object_name = value.to_string(),
            "RoleName" => parsed.role_name = value.to_string(),
            _ => {}
        }
    }

    parsed
}

fn set_int(field: &mut i64, value: &str) {
    if let Ok(parsed) = value.parse::<i64>() {
        *field = parsed;
    }
}

impl DeliveryRecord {
    pub fn from_parts(record: &RawLogRecord, parsed: ParsedPayload) -> Self {
        Self {
            event_record_id: record.event_record_id(),
            timestamp: record.timestamp,
            computer: record.computer().to_string(),
            error_code: parsed.error,
            severity: parsed.severity,
            state: parsed.state,
            start_time: parsed.start_time,
            trace_type: parsed.trace_type,
            event_class_desc: parsed.event_class_desc,
            login_name: parsed.login_name,
            host_name: parsed.host_name,
            text_data: parsed.text_data,
            application_name: parsed.application_name,
            database_name: parsed.database_name,
            object_name: parsed.object_name,
            role_name: parsed.role_name,
        }
    }
}

impl From<&RawLogRecord> for DeliveryRecord {
    fn from(record: &RawLogRecord) -> Self {
        Self::from_parts(record, parse_embedded_payload(&record.fields.data))
    }
}
