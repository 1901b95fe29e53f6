// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int64,
    Int,
    Timestamp,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(skip_serializing_if = "is_false")]
    pub required: bool,
}

/// Layout of the records written to Victoria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Schema {
    pub name: &'static str,
    pub version: u32,
    pub fields: &'static [FieldSpec],
}

const fn field(name: &'static str, field_type: FieldType, required: bool) -> FieldSpec {
    FieldSpec {
        name,
        field_type,
        required,
    }
}

pub const SCHEMA: Schema = Schema {
    name: "database_audit_logs",
    version: 1,
    fields: &[
        field("event_record_id", FieldType::Int64, true),
        field("timestamp", FieldType::Timestamp, true),
        field("computer", FieldType::String, true),
        field("error_code", FieldType::Int, false),
        field("severity", FieldType::Int, false),
        field("state", FieldType::Int, false),
        field("start_time", FieldType::Timestamp, false),
        field("trace_type", FieldType::String, false),
        field("event_class_desc", FieldType::String, false),
        field("login_name", FieldType::String, false),
        field("host_name", FieldType::String, false),
        field("text_data", FieldType::String, false),
        field("application_name", FieldType::String, false),
        field("database_name", FieldType::String, false),
        field("object_name", FieldType::String, false),
        field("role_name", FieldType::String, false),
    ],
};

impl Schema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "version": self.version,
            "fields": self.fields,
        })
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}
