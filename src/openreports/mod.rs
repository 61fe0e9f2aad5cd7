//! Expansion of OpenReports `Report` records into security events.
//!
//! A report carries its policy results as an array of JSON strings in the
//! `results` attribute. Each result that survives the status filter becomes
//! one security event record.

pub mod event;
pub mod workload;

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::OpenReportsConfig;
use crate::types::{AnyValue, AttributeMap, LogRecord};
use crate::utils::{get_str, null_as_default, preview};
use event::ReportContext;

pub const REPORT_KIND: &str = "Report";
pub const REPORT_API_VERSION: &str = "openreports.io/v1alpha1";

pub const ATTR_KIND: &str = "kind";
pub const ATTR_API_VERSION: &str = "apiVersion";
pub const ATTR_RESULTS: &str = "results";
pub const ATTR_OWNER_REFERENCES: &str = "metadata.ownerReferences";

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("result timestamp out of range: seconds={seconds} nanos={nanos}")]
    TimestampOutOfRange { seconds: i64, nanos: i64 },
}

impl ProcessError {
    /// Short label for logs and error counters.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::TimestampOutOfRange { .. } => "timestamp_out_of_range",
        }
    }
}

/// One policy evaluation outcome from a report's `results` array. Missing
/// and `null` fields both read as their zero value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PolicyResult {
    #[serde(deserialize_with = "null_as_default")]
    pub source: String,
    #[serde(deserialize_with = "null_as_default")]
    pub timestamp: ResultTimestamp,
    #[serde(deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(deserialize_with = "null_as_default")]
    pub policy: String,
    #[serde(deserialize_with = "null_as_default")]
    pub properties: BTreeMap<String, serde_json::Value>,
    /// pass, fail, error or skip; not enforced.
    #[serde(deserialize_with = "null_as_default")]
    pub result: String,
    #[serde(deserialize_with = "null_as_default")]
    pub rule: String,
    #[serde(deserialize_with = "null_as_default")]
    pub scored: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub severity: String,
    #[serde(deserialize_with = "null_as_default")]
    pub category: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResultTimestamp {
    #[serde(deserialize_with = "null_as_default")]
    pub seconds: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub nanos: i64,
}

/// Allow-list over result statuses. Empty allows everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusFilter {
    allowed: BTreeSet<String>,
}

impl StatusFilter {
    pub fn new<I, S>(statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: statuses.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.allowed.is_empty()
    }

    /// Exact, case-sensitive match.
    pub fn allows(&self, status: &str) -> bool {
        self.allowed.is_empty() || self.allowed.contains(status)
    }

    pub fn statuses(&self) -> Vec<&str> {
        self.allowed.iter().map(String::as_str).collect()
    }
}

/// Does this record's attribute set mark it as an OpenReports report?
pub fn is_open_reports_log(attrs: &AttributeMap) -> bool {
    get_str(attrs, ATTR_KIND) == Some(REPORT_KIND)
        && get_str(attrs, ATTR_API_VERSION) == Some(REPORT_API_VERSION)
}

/// Decode an attribute holding a list of strings. Native lists yield the
/// string form of each element; a string is tried as a JSON array of
/// strings and otherwise taken as a single element. Other shapes give None.
pub fn decode_string_array(value: &AnyValue) -> Option<Vec<String>> {
    match value {
        AnyValue::Array(items) => Some(items.iter().map(AnyValue::as_string).collect()),
        AnyValue::Str(s) => match serde_json::from_str::<Vec<String>>(s) {
            Ok(items) => Some(items),
            Err(err) => {
                debug!("String is not a JSON array ({}), using it as a single element", err);
                Some(vec![s.clone()])
            }
        },
        _ => None,
    }
}

/// Raw result strings of a report, in order. Absent or unsupported
/// `results` attributes give an empty list.
pub fn extract_results(attrs: &AttributeMap) -> Vec<String> {
    let Some(value) = attrs.get(ATTR_RESULTS) else {
        warn!("OpenReports log has no results field");
        return Vec::new();
    };
    match decode_string_array(value) {
        Some(results) => results,
        None => {
            warn!(
                "OpenReports log results field has unexpected type: {}",
                value.type_name()
            );
            Vec::new()
        }
    }
}

/// Parse one raw result. Malformed input is logged and skipped.
pub fn parse_result(index: usize, raw: &str) -> Option<PolicyResult> {
    match serde_json::from_str::<PolicyResult>(raw) {
        Ok(result) => Some(result),
        Err(err) => {
            warn!(
                result_index = index,
                result_preview = %preview(raw, 200),
                "Failed to parse result JSON: {}",
                err
            );
            None
        }
    }
}

/// Turns a single report record into security event records.
#[derive(Debug, Clone, Default)]
pub struct OpenReportsProcessor {
    filter: StatusFilter,
}

impl OpenReportsProcessor {
    pub fn new(config: &OpenReportsConfig) -> Self {
        Self {
            filter: StatusFilter::new(config.status_filter.iter().cloned()),
        }
    }

    /// Produce one event per allowed, well-formed result. An empty list means
    /// the record should pass through unchanged.
    pub fn process_log_record(&self, record: &LogRecord) -> Result<Vec<LogRecord>, ProcessError> {
        let attrs = &record.attributes;
        if !is_open_reports_log(attrs) {
            debug!(trace_id = %record.trace_id, "Log record is not an OpenReports report");
            return Ok(Vec::new());
        }

        let mut ctx = ReportContext::from_attributes(attrs);
        debug!(
            metadata.name = %ctx.metadata_name,
            metadata.namespace = %ctx.metadata_namespace,
            scope.name = %ctx.scope_name,
            scope.kind = %ctx.scope_kind,
            scope.api_version = %ctx.scope_api_version,
            "OpenReports log identified"
        );

        let raw_results = extract_results(attrs);
        if raw_results.is_empty() {
            debug!("OpenReports log {} has no results", ctx.metadata_name);
            return Ok(Vec::new());
        }

        ctx.workload = workload::extract_workload_info(attrs, &ctx.scope_name, &ctx.scope_namespace);
        if !ctx.workload.name.is_empty() {
            debug!(
                "Workload for {}: {}/{} in {}",
                ctx.scope_name, ctx.workload.kind, ctx.workload.name, ctx.workload.namespace
            );
        }

        if self.filter.is_active() {
            debug!("Status filter active: {:?}", self.filter.statuses());
        }

        let mut events = Vec::new();
        let mut filtered = 0usize;
        for (index, raw) in raw_results.iter().enumerate() {
            let Some(result) = parse_result(index, raw) else {
                continue;
            };
            debug!(
                result_index = index,
                source = %result.source,
                policy = %result.policy,
                rule = %result.rule,
                status = %result.result,
                scored = result.scored,
                properties = ?result.properties,
                "Parsed result"
            );
            if !self.filter.allows(&result.result) {
                debug!(
                    "Skipping result {} with status {:?} (allowed: {:?})",
                    index,
                    result.result,
                    self.filter.statuses()
                );
                filtered += 1;
                continue;
            }
            events.push(event::build_security_event(record, &result, &ctx)?);
        }

        info!(
            metadata.name = %ctx.metadata_name,
            scope.name = %ctx.scope_name,
            total_results = raw_results.len(),
            filtered_results = filtered,
            security_events_created = events.len(),
            "OpenReports log processing completed"
        );
        Ok(events)
    }
}
