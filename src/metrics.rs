//! Prometheus counters for the processor.
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `processor_securityevent_incoming_logs_total` | Counter | Records entering the processor |
//! | `processor_securityevent_outgoing_logs_total` | Counter | Records leaving the processor |
//! | `processor_securityevent_dropped_logs_total` | Counter | Records dropped after a hard error |
//! | `processor_securityevent_processing_errors_total` | Counter | Hard errors while transforming a record |

use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
use thiserror::Error;

const METRIC_PREFIX: &str = "processor_securityevent";

pub const METRIC_INCOMING_LOGS: &str = "incoming_logs_total";
pub const METRIC_OUTGOING_LOGS: &str = "outgoing_logs_total";
pub const METRIC_DROPPED_LOGS: &str = "dropped_logs_total";
pub const METRIC_PROCESSING_ERRORS: &str = "processing_errors_total";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    Encoding(String),
}

/// Counters shared by every invocation of one processor instance.
pub struct ProcessorMetrics {
    registry: Registry,
    incoming_logs: IntCounter,
    outgoing_logs: IntCounter,
    dropped_logs: IntCounter,
    processing_errors: IntCounter,
}

/// Record counts for a single processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub incoming: u64,
    pub outgoing: u64,
    pub dropped: u64,
    /// Reports replaced by one or more security events.
    pub expanded_reports: u64,
    pub events_created: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub incoming_logs: u64,
    pub outgoing_logs: u64,
    pub dropped_logs: u64,
    pub processing_errors: u64,
}

fn register_counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, MetricsError> {
    let counter = IntCounter::with_opts(Opts::new(name, help).namespace(METRIC_PREFIX))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl ProcessorMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let incoming_logs = register_counter(
            &registry,
            METRIC_INCOMING_LOGS,
            "Number of log records entering the processor",
        )?;
        let outgoing_logs = register_counter(
            &registry,
            METRIC_OUTGOING_LOGS,
            "Number of log records leaving the processor",
        )?;
        let dropped_logs = register_counter(
            &registry,
            METRIC_DROPPED_LOGS,
            "Number of log records dropped after a processing error",
        )?;
        let processing_errors = register_counter(
            &registry,
            METRIC_PROCESSING_ERRORS,
            "Number of errors while transforming log records",
        )?;
        Ok(Self {
            registry,
            incoming_logs,
            outgoing_logs,
            dropped_logs,
            processing_errors,
        })
    }

    /// Add a batch's counts. Zero counts are skipped.
    pub fn record_batch(&self, stats: &BatchStats) {
        if stats.incoming > 0 {
            self.incoming_logs.inc_by(stats.incoming);
        }
        if stats.outgoing > 0 {
            self.outgoing_logs.inc_by(stats.outgoing);
        }
        if stats.dropped > 0 {
            self.dropped_logs.inc_by(stats.dropped);
        }
    }

    pub fn record_processing_error(&self) {
        self.processing_errors.inc();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            incoming_logs: self.incoming_logs.get(),
            outgoing_logs: self.outgoing_logs.get(),
            dropped_logs: self.dropped_logs.get(),
            processing_errors: self.processing_errors.get(),
        }
    }

    /// Prometheus text exposition of all counters.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}
