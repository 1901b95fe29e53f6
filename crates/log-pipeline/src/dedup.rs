// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Event record IDs already handled by this process.
///
/// Entries are never evicted, so memory grows with the number of distinct
/// events seen since startup.
#[derive(Debug, Default)]
pub struct SeenEvents {
    ids: Mutex<HashSet<i64>>,
}

impl SeenEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `id` as seen. Returns `true` when it had already been marked.
    pub fn check_and_mark(&self, id: i64) -> bool {
        !self.lock().insert(id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.lock().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<i64>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
