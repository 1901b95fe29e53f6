// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Log Pipeline
//!
//! Polls a Loki instance for Windows audit log records over a sliding time
//! window, drops records whose `EventRecordID` has already been shipped,
//! flattens the embedded `Data` payload into typed fields and writes each
//! record to a VictoriaMetrics `/write` endpoint.
//!
//! ```text
//!   Loki query_range ──> Processor ──> dedup ──> transform ──> Victoria /write
//!          │                                                        │
//!          └──────────── ResiliencePolicy (backoff + breaker) ──────┘
//! ```
//!
//! The driving loop, signal handling and subscriber setup live in the
//! `log-pipeline-agent` binary.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod dedup;
pub mod error;
pub mod health;
pub mod http_utils;
pub mod logger;
pub mod loki;
pub mod models;
pub mod processor;
pub mod resilience;
pub mod schema;
pub mod stats;
pub mod time_window;
pub mod transform;
pub mod victoria;
