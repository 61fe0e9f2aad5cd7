use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::metrics::{BatchStats, ProcessorMetrics};
use crate::openreports::{OpenReportsProcessor, is_open_reports_log};
use crate::types::{LogBatch, LogRecord, ScopeLogs};

/// A record position in a scope that is swapped for `records`. Empty
/// `records` means the record was dropped.
struct Replacement {
    index: usize,
    records: Vec<LogRecord>,
}

/// Rewrites log batches, expanding OpenReports reports into security events.
pub struct SecurityEventProcessor {
    open_reports: Option<OpenReportsProcessor>,
    metrics: Arc<ProcessorMetrics>,
}

impl SecurityEventProcessor {
    pub fn new(config: &Config, metrics: Arc<ProcessorMetrics>) -> Self {
        let open_reports = if config.processors.openreports.enabled {
            info!("OpenReports processor enabled");
            Some(OpenReportsProcessor::new(&config.processors.openreports))
        } else {
            None
        };
        Self {
            open_reports,
            metrics,
        }
    }

    pub fn open_reports_enabled(&self) -> bool {
        self.open_reports.is_some()
    }

    pub fn metrics(&self) -> &ProcessorMetrics {
        &self.metrics
    }

    /// Rewrite `batch` in place. A record that fails to transform is dropped;
    /// the batch itself never fails.
    pub fn process_logs(&self, batch: &mut LogBatch) -> BatchStats {
        let mut stats = BatchStats::default();
        debug!(
            "Processing logs batch with {} resource logs",
            batch.resource_logs.len()
        );

        for resource_logs in &mut batch.resource_logs {
            for (scope_index, scope_logs) in resource_logs.scope_logs.iter_mut().enumerate() {
                debug!(
                    "Processing scope logs {} with {} records",
                    scope_index,
                    scope_logs.log_records.len()
                );
                self.process_scope_logs(scope_logs, &mut stats);
            }
        }

        debug!(
            incoming_logs = stats.incoming,
            outgoing_logs = stats.outgoing,
            dropped_logs = stats.dropped,
            "Batch processing completed"
        );
        self.metrics.record_batch(&stats);
        stats
    }

    fn process_scope_logs(&self, scope_logs: &mut ScopeLogs, stats: &mut BatchStats) {
        let mut replacements = Vec::new();

        // Pass 1: decide what happens to each record without touching the
        // sequence.
        for (index, record) in scope_logs.log_records.iter().enumerate() {
            stats.incoming += 1;

            let Some(open_reports) = &self.open_reports else {
                stats.outgoing += 1;
                continue;
            };

            if !is_open_reports_log(&record.attributes) {
                debug!(
                    record_index = index,
                    trace_id = %record.trace_id,
                    "Log record does not match OpenReports, passing through"
                );
                stats.outgoing += 1;
                continue;
            }

            match open_reports.process_log_record(record) {
                Ok(events) if events.is_empty() => {
                    debug!(
                        record_index = index,
                        trace_id = %record.trace_id,
                        "Report produced no security events, passing through unchanged"
                    );
                    stats.outgoing += 1;
                }
                Ok(events) => {
                    debug!(
                        record_index = index,
                        trace_id = %record.trace_id,
                        expanded_count = events.len(),
                        "Report expanded into security events"
                    );
                    stats.expanded_reports += 1;
                    stats.events_created += events.len() as u64;
                    replacements.push(Replacement {
                        index,
                        records: events,
                    });
                }
                Err(err) => {
                    warn!(
                        record_index = index,
                        trace_id = %record.trace_id,
                        error_type = err.kind(),
                        "Failed to process log record with OpenReports processor: {}",
                        err
                    );
                    self.metrics.record_processing_error();
                    stats.dropped += 1;
                    replacements.push(Replacement {
                        index,
                        records: Vec::new(),
                    });
                }
            }
        }

        if replacements.is_empty() {
            return;
        }

        // Pass 2: rebuild in original order and swap the sequence in.
        let original = std::mem::take(&mut scope_logs.log_records);
        let added: usize = replacements.iter().map(|r| r.records.len()).sum();
        let mut rebuilt = Vec::with_capacity(original.len() - replacements.len() + added);
        let mut pending = replacements.into_iter().peekable();

        for (index, record) in original.into_iter().enumerate() {
            match pending.next_if(|r| r.index == index) {
                Some(replacement) => {
                    stats.outgoing += replacement.records.len() as u64;
                    rebuilt.extend(replacement.records);
                }
                None => rebuilt.push(record),
            }
        }

        debug!("Scope rebuilt with {} records", rebuilt.len());
        scope_logs.log_records = rebuilt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OpenReportsConfig, ProcessorConfig};
    use crate::types::{AnyValue, ResourceLogs, TraceId};

    const PASS: &str = r#"{"source": "kyverno", "timestamp": {"seconds": 1758264662, "nanos": 0}, "message": "Policy check passed", "policy": "policy1", "result": "pass", "rule": "rule1", "scored": true}"#;
    const FAIL: &str = r#"{"source": "kyverno", "timestamp": {"seconds": 1758264663, "nanos": 0}, "message": "Policy violation", "policy": "policy2", "result": "fail", "rule": "rule2", "scored": true}"#;
    const ERROR: &str = r#"{"source": "kyverno", "timestamp": {"seconds": 1758264664, "nanos": 0}, "message": "Policy check error", "policy": "policy3", "result": "error", "rule": "rule3", "scored": true}"#;
    const BAD_TIME: &str = r#"{"timestamp": {"seconds": 9223372036854775807, "nanos": 0}, "result": "fail"}"#;

    fn processor(enabled: bool, filter: &[&str]) -> SecurityEventProcessor {
        let config = Config {
            processors: ProcessorConfig {
                openreports: OpenReportsConfig {
                    enabled,
                    status_filter: filter.iter().map(|s| s.to_string()).collect(),
                },
            },
        };
        SecurityEventProcessor::new(&config, Arc::new(ProcessorMetrics::new().unwrap()))
    }

    fn plain(marker: u8) -> LogRecord {
        let mut record = LogRecord {
            trace_id: TraceId([marker; 16]),
            body: AnyValue::from(format!("plain-{}", marker)),
            ..Default::default()
        };
        record.attributes.insert("kind".to_string(), "Pod".into());
        record.attributes.insert("apiVersion".to_string(), "v1".into());
        record
    }

    fn report(name: &str, results: &[&str]) -> LogRecord {
        let mut record = LogRecord::default();
        let attrs = &mut record.attributes;
        attrs.insert("kind".to_string(), "Report".into());
        attrs.insert("apiVersion".to_string(), "openreports.io/v1alpha1".into());
        attrs.insert("metadata.name".to_string(), name.into());
        attrs.insert("scope.name".to_string(), format!("{}-pod", name).into());
        attrs.insert("scope.namespace".to_string(), "default".into());
        attrs.insert("scope.kind".to_string(), "Pod".into());
        attrs.insert(
            "results".to_string(),
            AnyValue::Array(results.iter().map(|r| AnyValue::from(*r)).collect()),
        );
        record
    }

    fn batch(scopes: Vec<Vec<LogRecord>>) -> LogBatch {
        LogBatch {
            resource_logs: vec![ResourceLogs {
                scope_logs: scopes
                    .into_iter()
                    .map(|records| ScopeLogs {
                        log_records: records,
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }],
        }
    }

    fn records(batch: &LogBatch, scope: usize) -> &[LogRecord] {
        &batch.resource_logs[0].scope_logs[scope].log_records
    }

    fn body(record: &LogRecord) -> String {
        record.body.as_string()
    }

    #[test]
    fn test_empty_batch() {
        let p = processor(true, &[]);
        let mut logs = LogBatch::default();
        let stats = p.process_logs(&mut logs);
        assert_eq!(stats, BatchStats::default());
        assert!(logs.resource_logs.is_empty());
    }

    #[test]
    fn test_non_report_passes_through_unchanged() {
        let p = processor(true, &[]);
        let mut logs = batch(vec![vec![plain(1), plain(2)]]);
        let before = logs.clone();

        let stats = p.process_logs(&mut logs);
        assert_eq!(logs, before);
        assert_eq!(stats.incoming, 2);
        assert_eq!(stats.outgoing, 2);
        assert_eq!(stats.dropped, 0);
    }

    #[test]
    fn test_disabled_passes_reports_through() {
        let p = processor(false, &[]);
        assert!(!p.open_reports_enabled());
        let mut logs = batch(vec![vec![report("r", &[FAIL])]]);
        let before = logs.clone();

        let stats = p.process_logs(&mut logs);
        assert_eq!(logs, before);
        assert_eq!(stats.incoming, 1);
        assert_eq!(stats.outgoing, 1);
    }

    #[test]
    fn test_filtered_report_is_kept() {
        let p = processor(true, &["fail"]);
        let mut logs = batch(vec![vec![report("r", &[PASS])]]);
        let before = logs.clone();

        let stats = p.process_logs(&mut logs);
        assert_eq!(logs, before);
        assert_eq!(stats.incoming, 1);
        assert_eq!(stats.outgoing, 1);
        assert_eq!(stats.expanded_reports, 0);
        assert_eq!(stats.dropped, 0);
    }

    #[test]
    fn test_empty_results_report_is_kept() {
        let p = processor(true, &[]);
        let mut logs = batch(vec![vec![report("r", &[])]]);
        let before = logs.clone();
        p.process_logs(&mut logs);
        assert_eq!(logs, before);
    }

    #[test]
    fn test_expansion_preserves_order() {
        let p = processor(true, &[]);
        let mut logs = batch(vec![vec![
            plain(1),
            report("a", &[PASS, FAIL, ERROR]),
            plain(2),
            report("b", &[FAIL]),
            plain(3),
        ]]);

        let stats = p.process_logs(&mut logs);
        let out = records(&logs, 0);
        let bodies: Vec<String> = out.iter().map(body).collect();
        assert_eq!(
            bodies,
            vec![
                "plain-1",
                "Policy check passed",
                "Policy violation",
                "Policy check error",
                "plain-2",
                "Policy violation",
                "plain-3",
            ]
        );
        assert_eq!(out[1].attributes["k8s.pod.name"], AnyValue::from("a-pod"));
        assert_eq!(out[5].attributes["k8s.pod.name"], AnyValue::from("b-pod"));

        assert_eq!(stats.incoming, 5);
        assert_eq!(stats.outgoing, 7);
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.expanded_reports, 2);
        assert_eq!(stats.events_created, 4);
    }

    #[test]
    fn test_untouched_records_identical_after_rebuild() {
        let p = processor(true, &[]);
        let mut logs = batch(vec![vec![plain(1), report("a", &[FAIL]), plain(2)]]);
        let first = plain(1);
        let last = plain(2);

        p.process_logs(&mut logs);
        let out = records(&logs, 0);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], first);
        assert_eq!(out[2], last);
    }

    #[test]
    fn test_malformed_element_contributes_nothing() {
        let p = processor(true, &[]);
        let mut logs = batch(vec![vec![report("a", &["{invalid json}", PASS, FAIL])]]);

        let stats = p.process_logs(&mut logs);
        assert_eq!(records(&logs, 0).len(), 2);
        assert_eq!(stats.outgoing, 2);
        assert_eq!(stats.dropped, 0);
    }

    #[test]
    fn test_hard_error_drops_only_that_record() {
        let p = processor(true, &[]);
        let mut logs = batch(vec![vec![
            plain(1),
            report("bad", &[PASS, BAD_TIME]),
            report("good", &[FAIL]),
            plain(2),
        ]]);

        let stats = p.process_logs(&mut logs);
        let bodies: Vec<String> = records(&logs, 0).iter().map(body).collect();
        assert_eq!(bodies, vec!["plain-1", "Policy violation", "plain-2"]);

        assert_eq!(stats.incoming, 4);
        assert_eq!(stats.outgoing, 3);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.incoming, stats.outgoing - stats.events_created + stats.expanded_reports + stats.dropped);

        let snap = p.metrics().snapshot();
        assert_eq!(snap.dropped_logs, 1);
        assert_eq!(snap.processing_errors, 1);
    }

    #[test]
    fn test_hard_error_alone_removes_record() {
        let p = processor(true, &[]);
        let mut logs = batch(vec![vec![report("bad", &[BAD_TIME])]]);
        let stats = p.process_logs(&mut logs);
        assert!(records(&logs, 0).is_empty());
        assert_eq!(stats.incoming, 1);
        assert_eq!(stats.outgoing, 0);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn test_scopes_processed_independently() {
        let p = processor(true, &["fail"]);
        let mut logs = batch(vec![
            vec![report("a", &[PASS, FAIL]), plain(1)],
            vec![plain(2)],
            vec![report("b", &[PASS])],
        ]);
        logs.resource_logs.push(ResourceLogs {
            scope_logs: vec![ScopeLogs {
                log_records: vec![report("c", &[FAIL, FAIL])],
                ..Default::default()
            }],
            ..Default::default()
        });

        let stats = p.process_logs(&mut logs);
        assert_eq!(records(&logs, 0).len(), 2);
        assert_eq!(body(&records(&logs, 0)[0]), "Policy violation");
        assert_eq!(records(&logs, 1), &[plain(2)]);
        assert_eq!(records(&logs, 2).len(), 1);
        assert!(is_open_reports_log(&records(&logs, 2)[0].attributes));
        assert_eq!(logs.resource_logs[1].scope_logs[0].log_records.len(), 2);

        assert_eq!(stats.incoming, 5);
        assert_eq!(stats.outgoing, 6);
    }

    #[test]
    fn test_rerun_on_output_is_noop() {
        let p = processor(true, &[]);
        let mut logs = batch(vec![vec![plain(1), report("a", &[PASS, FAIL]), plain(2)]]);
        p.process_logs(&mut logs);
        let once = logs.clone();

        let stats = p.process_logs(&mut logs);
        assert_eq!(logs, once);
        assert_eq!(stats.incoming, stats.outgoing);
        assert_eq!(stats.expanded_reports, 0);
    }

    #[test]
    fn test_metrics_accumulate_across_batches() {
        let p = processor(true, &[]);
        let mut first = batch(vec![vec![report("a", &[PASS, FAIL])]]);
        let mut second = batch(vec![vec![plain(1)]]);
        p.process_logs(&mut first);
        p.process_logs(&mut second);

        let snap = p.metrics().snapshot();
        assert_eq!(snap.incoming_logs, 2);
        assert_eq!(snap.outgoing_logs, 3);
        assert_eq!(snap.dropped_logs, 0);
        assert_eq!(snap.processing_errors, 0);
    }

    #[test]
    fn test_resource_and_scope_metadata_untouched() {
        let p = processor(true, &[]);
        let mut logs = batch(vec![vec![report("a", &[FAIL])]]);
        logs.resource_logs[0]
            .resource
            .attributes
            .insert("k8s.cluster.name".to_string(), "prod".into());
        logs.resource_logs[0].scope_logs[0].scope.name = "k8sobjects".to_string();
        let resource = logs.resource_logs[0].resource.clone();

        p.process_logs(&mut logs);
        assert_eq!(logs.resource_logs[0].resource, resource);
        assert_eq!(logs.resource_logs[0].scope_logs[0].scope.name, "k8sobjects");
    }
}
