// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The `[start, end)` range queried in one polling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: SystemTime,
    pub end: SystemTime,
}

impl TimeWindow {
    pub fn ending_now(length: Duration) -> Self {
        Self::ending_at(SystemTime::now(), length)
    }

    pub fn ending_at(end: SystemTime, length: Duration) -> Self {
        let start = end.checked_sub(length).unwrap_or(UNIX_EPOCH);
        Self { start, end }
    }

    pub fn start_nanos(&self) -> u128 {
        unix_nanos(self.start)
    }

    pub fn end_nanos(&self) -> u128 {
        unix_nanos(self.end)
    }
}

/// Nanoseconds since the Unix epoch; times before the epoch map to 0.
pub fn unix_nanos(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}
