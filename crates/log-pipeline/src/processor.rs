// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One polling cycle: query, deduplicate, transform, deliver.
//!
//! A cycle is best effort. A record that fails to decode or deliver is
//! counted and reported in the cycle's error, but never stops its siblings.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

use crate::dedup::SeenEvents;
use crate::error::{PipelineError, RecordError};
use crate::loki::LogSource;
use crate::models::{DeliveryRecord, RawLogRecord};
use crate::stats::PipelineStats;
use crate::victoria::LogSink;

pub struct Processor {
    source: Arc<dyn LogSource + Send + Sync>,
    sink: Arc<dyn LogSink + Send + Sync>,
    seen: SeenEvents,
    stats: Arc<PipelineStats>,
    delivery_concurrency: usize,
}

impl Processor {
    pub fn new(
        source: Arc<dyn LogSource + Send + Sync>,
        sink: Arc<dyn LogSink + Send + Sync>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            source,
            sink,
            seen: SeenEvents::new(),
            stats,
            delivery_concurrency: 1,
        }
    }

    /// Deliveries kept in flight at once. Values below 1 mean 1.
    #[must_use]
    pub fn with_delivery_concurrency(mut self, concurrency: usize) -> Self {
        self.delivery_concurrency = concurrency.max(1);
        self
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub fn seen_events(&self) -> usize {
        self.seen.len()
    }

    pub async fn process_logs(
        &self,
        query: &str,
        start: SystemTime,
        end: SystemTime,
    ) -> Result<(), PipelineError> {
        self.stats.record_cycle();

        let logs = match self.source.query_logs(query, start, end).await {
            Ok(logs) => logs,
            Err(e) => {
                self.stats.record_error();
                return Err(PipelineError::Query(e));
            }
        };

        let mut errors = Vec::new();
        let mut pending = Vec::new();
        for value in logs.data.result.iter().flat_map(|s| s.values.iter()) {
            match self.admit(value) {
                Ok(Some(record)) => pending.push(record),
                Ok(None) => self.stats.record_skipped(),
                Err(e) => {
                    self.stats.record_error();
                    errors.push(e);
                }
            }
        }

        debug!(
            "PROCESSOR | {} new records to deliver out of {}",
            pending.len(),
            logs.record_count()
        );

        let outcomes: Vec<Result<(), RecordError>> = stream::iter(pending)
            .map(|record| self.deliver(record))
            .buffered(self.delivery_concurrency)
            .collect()
            .await;
        errors.extend(outcomes.into_iter().filter_map(Result::err));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Records { errors })
        }
    }

    /// Decodes one `[timestamp, payload]` pair and claims its event ID.
    /// `None` means the event was already handled.
    fn admit(&self, value: &[String]) -> Result<Option<DeliveryRecord>, RecordError> {
        let [_, payload, ..] = value else {
            return Err(RecordError::MalformedValue(value.len()));
        };
        let raw: RawLogRecord = serde_json::from_str(payload)?;

        if self.seen.check_and_mark(raw.event_record_id()) {
            debug!(
                "PROCESSOR | Skipping duplicate event {}",
                raw.event_record_id()
            );
            return Ok(None);
        }

        Ok(Some(DeliveryRecord::from(&raw)))
    }

    async fn deliver(&self, record: DeliveryRecord) -> Result<(), RecordError> {
        match self.sink.send_record(&record).await {
            Ok(()) => {
                self.stats.record_processed();
                Ok(())
            }
            Err(source) => {
                self.stats.record_error();
                warn!(
                    "PROCESSOR | Failed to deliver event {}: {}",
                    record.event_record_id, source
                );
                Err(RecordError::Delivery {
                    event_record_id: record.event_record_id,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RequestError, ResilienceError};
    use crate::models::{LogQueryResult, LogStream, QueryData};
    use crate::stats::StatsSnapshot;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::UNIX_EPOCH;

    struct StaticSource {
        result: Mutex<Option<LogQueryResult>>,
    }

    impl StaticSource {
        fn returning(payloads: Vec<Vec<String>>) -> Self {
            Self {
                result: Mutex::new(Some(LogQueryResult {
                    status: "success".to_string(),
                    data: QueryData {
                        result_type: "streams".to_string(),
                        result: vec![LogStream {
                            stream: HashMap::new(),
                            values: payloads,
                        }],
                    },
                })),
            }
        }

        fn failing() -> Self {
            Self {
                result: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl LogSource for StaticSource {
        async fn query_logs(
            &self,
            _query: &str,
            _start: SystemTime,
            _end: SystemTime,
        ) -> Result<LogQueryResult, ResilienceError> {
            self.result
                .lock()
                .unwrap()
                .clone()
                .ok_or(ResilienceError::RetriesExhausted {
                    attempts: 3,
                    source: RequestError::Status(StatusCode::BAD_GATEWAY),
                })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<DeliveryRecord>>,
        failing_ids: HashSet<i64>,
    }

    impl RecordingSink {
        fn delivered(&self) -> Vec<DeliveryRecord> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LogSink for RecordingSink {
        async fn send_record(&self, record: &DeliveryRecord) -> Result<(), ResilienceError> {
            if self.failing_ids.contains(&record.event_record_id) {
                return Err(ResilienceError::RetriesExhausted {
                    attempts: 3,
                    source: RequestError::Status(StatusCode::INTERNAL_SERVER_ERROR),
                });
            }
            self.delivered.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn entry(id: i64, data: &str) -> Vec<String> {
        let payload = serde_json::json!({
            "fields": {"EventRecordID": id, "Data": data},
            "timestamp": 1_700_000_000_000_000_000_i64,
            "tags": {"Computer": "host1"}
        });
        vec!["1700000000000000000".to_string(), payload.to_string()]
    }

    fn processor(source: StaticSource, sink: Arc<RecordingSink>) -> Processor {
        Processor::new(Arc::new(source), sink, Arc::new(PipelineStats::new()))
    }

    async fn run(processor: &Processor) -> Result<(), PipelineError> {
        processor
            .process_logs("{job=\"mssql\"}", UNIX_EPOCH, SystemTime::now())
            .await
    }

    #[tokio::test]
    async fn test_delivers_parsed_record() {
        let sink = Arc::new(RecordingSink::default());
        let processor = processor(
            StaticSource::returning(vec![entry(42, "Error: 5\nSeverity: 2")]),
            Arc::clone(&sink),
        );

        run(&processor).await.unwrap();

        let delivered = sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].event_record_id, 42);
        assert_eq!(delivered[0].error_code, 5);
        assert_eq!(delivered[0].severity, 2);
        assert_eq!(delivered[0].computer, "host1");
        assert_eq!(processor.stats().snapshot().processed, 1);
    }

    #[tokio::test]
    async fn test_duplicate_in_later_cycle_is_skipped() {
        let sink = Arc::new(RecordingSink::default());
        let processor = processor(
            StaticSource::returning(vec![entry(42, "Error: 5")]),
            Arc::clone(&sink),
        );

        run(&processor).await.unwrap();
        run(&processor).await.unwrap();

        assert_eq!(sink.delivered().len(), 1);
        assert_eq!(
            processor.stats().snapshot(),
            StatsSnapshot {
                processed: 1,
                errors: 0,
                skipped: 1,
                cycles: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_duplicate_within_one_cycle_is_skipped() {
        let sink = Arc::new(RecordingSink::default());
        let processor = processor(
            StaticSource::returning(vec![entry(7, ""), entry(7, ""), entry(8, "")]),
            Arc::clone(&sink),
        );

        run(&processor).await.unwrap();

        assert_eq!(sink.delivered().len(), 2);
        let stats = processor.stats().snapshot();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(processor.seen_events(), 2);
    }

    #[tokio::test]
    async fn test_decode_failures_do_not_block_other_records() {
        let sink = Arc::new(RecordingSink::default());
        let processor = processor(
            StaticSource::returning(vec![
                vec!["1".to_string(), "{not json".to_string()],
                entry(1, "Severity: 10"),
                vec!["only-a-timestamp".to_string()],
                entry(2, "Severity: 11"),
            ]),
            Arc::clone(&sink),
        );

        let error = run(&processor).await.unwrap_err();

        assert_eq!(error.failed_records(), 2);
        assert!(error
            .to_string()
            .starts_with("encountered 2 errors while processing logs"));
        assert_eq!(sink.delivered().len(), 2);
        let stats = processor.stats().snapshot();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.errors, 2);
    }

    #[tokio::test]
    async fn test_delivery_failure_continues_with_next_record() {
        let sink = Arc::new(RecordingSink {
            failing_ids: HashSet::from([1]),
            ..RecordingSink::default()
        });
        let processor = processor(
            StaticSource::returning(vec![entry(1, ""), entry(2, "")]),
            Arc::clone(&sink),
        );

        let error = run(&processor).await.unwrap_err();

        match &error {
            PipelineError::Records { errors } => {
                assert_eq!(errors.len(), 1);
                assert!(matches!(
                    errors[0],
                    RecordError::Delivery {
                        event_record_id: 1,
                        ..
                    }
                ));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(error.to_string().contains("all retries failed"));
        assert_eq!(sink.delivered()[0].event_record_id, 2);
        let stats = processor.stats().snapshot();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn test_failed_query_aborts_cycle() {
        let sink = Arc::new(RecordingSink::default());
        let processor = processor(StaticSource::failing(), Arc::clone(&sink));

        let error = run(&processor).await.unwrap_err();

        assert!(matches!(error, PipelineError::Query(_)));
        assert!(sink.delivered().is_empty());
        assert_eq!(processor.stats().snapshot().errors, 1);
    }

    #[tokio::test]
    async fn test_concurrent_delivery_handles_every_record() {
        let sink = Arc::new(RecordingSink::default());
        let payloads = (0..20).map(|id| entry(id, "State: 1")).collect();
        let processor = processor(StaticSource::returning(payloads), Arc::clone(&sink))
            .with_delivery_concurrency(4);

        run(&processor).await.unwrap();

        let mut ids: Vec<i64> = sink
            .delivered()
            .iter()
            .map(|r| r.event_record_id)
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..20).collect::<Vec<_>>());
        assert_eq!(processor.stats().snapshot().processed, 20);
    }
}
