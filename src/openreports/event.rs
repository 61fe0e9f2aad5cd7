//! Mapping of one policy result onto a normalized security event record.

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::Resource;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use uuid::Uuid;

use super::workload::WorkloadInfo;
use super::{PolicyResult, ProcessError, ResultTimestamp};
use crate::types::{AnyValue, AttributeMap, LogRecord};
use crate::utils::get_string;

pub const EVENT_VERSION: &str = "1.309";
pub const EVENT_CATEGORY: &str = "COMPLIANCE";
pub const EVENT_NAME: &str = "Compliance finding event";
pub const EVENT_TYPE: &str = "COMPLIANCE_FINDING";
pub const SMARTSCAPE_POD: &str = "K8S_POD";

pub const K8S_PREFIX: &str = "k8s.";

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Metadata of the report a result came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportContext {
    pub metadata_name: String,
    pub metadata_namespace: String,
    pub scope_name: String,
    pub scope_namespace: String,
    pub scope_kind: String,
    pub scope_uid: String,
    pub scope_api_version: String,
    pub workload: WorkloadInfo,
}

impl ReportContext {
    /// Read the report metadata. The workload is resolved separately.
    pub fn from_attributes(attrs: &AttributeMap) -> Self {
        Self {
            metadata_name: get_string(attrs, "metadata.name"),
            metadata_namespace: get_string(attrs, "metadata.namespace"),
            scope_name: get_string(attrs, "scope.name"),
            scope_namespace: get_string(attrs, "scope.namespace"),
            scope_kind: get_string(attrs, "scope.kind"),
            scope_uid: get_string(attrs, "scope.uid"),
            scope_api_version: get_string(attrs, "scope.apiVersion"),
            workload: WorkloadInfo::default(),
        }
    }
}

/// Build a security event for `result`, inheriting timing and trace
/// correlation from the report record.
pub fn build_security_event(
    source: &LogRecord,
    result: &PolicyResult,
    ctx: &ReportContext,
) -> Result<LogRecord, ProcessError> {
    let mut record = LogRecord {
        time_unix_nano: source.time_unix_nano,
        observed_time_unix_nano: source.observed_time_unix_nano,
        severity_number: source.severity_number,
        severity_text: source.severity_text.clone(),
        trace_id: source.trace_id,
        span_id: source.span_id,
        flags: source.flags,
        ..Default::default()
    };
    transform_to_security_event(&mut record, result, ctx, &source.attributes)?;
    Ok(record)
}

pub fn transform_to_security_event(
    record: &mut LogRecord,
    result: &PolicyResult,
    ctx: &ReportContext,
    original_attrs: &AttributeMap,
) -> Result<(), ProcessError> {
    // Resolve the fallible part before touching the record.
    let created = if result.timestamp.seconds > 0 {
        Some(result_time(&result.timestamp)?)
    } else {
        None
    };

    let attrs = &mut record.attributes;
    let mut put = |key: &str, value: AnyValue| {
        attrs.insert(key.to_string(), value);
    };

    put("event.id", Uuid::new_v4().to_string().into());
    put("event.version", EVENT_VERSION.into());
    put("event.category", EVENT_CATEGORY.into());
    put("event.name", EVENT_NAME.into());
    put("event.type", EVENT_TYPE.into());
    put(
        "event.description",
        event_description(&result.result, &ctx.scope_name, &result.rule).into(),
    );

    put("product.name", "".into());
    put("product.vendor", "".into());

    if ctx.scope_kind == Pod::KIND {
        put("smartscape.type", SMARTSCAPE_POD.into());
    }

    let risk_level = map_severity_to_risk_level(&result.severity);
    put("dt.security.risk.level", risk_level.into());
    put("dt.security.risk.score", calculate_risk_score(risk_level).into());

    if !ctx.scope_uid.is_empty() {
        put("object.id", ctx.scope_uid.clone().into());
    }
    if !ctx.scope_kind.is_empty() {
        put("object.type", ctx.scope_kind.clone().into());
    }

    put("finding.description", result.message.clone().into());
    put("finding.id", Uuid::new_v4().to_string().into());
    if !result.severity.is_empty() {
        put("finding.severity", risk_level.into());
    }
    if let Some((time, _)) = &created {
        put(
            "finding.time.created",
            time.to_rfc3339_opts(SecondsFormat::Nanos, true).into(),
        );
    }

    let title = if result.rule.is_empty() {
        result.policy.clone()
    } else {
        format!("{} - {}", result.policy, result.rule)
    };
    put("finding.title", title.into());
    if !result.policy.is_empty() {
        put("finding.type", result.policy.clone().into());
    }
    put("finding.url", "".into());

    if !result.rule.is_empty() {
        put("compliance.control", result.rule.clone().into());
    }
    if !result.policy.is_empty() {
        put("compliance.requirements", result.policy.clone().into());
    }
    if !result.category.is_empty() {
        put("compliance.standards", result.category.clone().into());
    }
    put(
        "compliance.status",
        map_result_to_compliance_status(&result.result).into(),
    );

    copy_k8s_fields(&mut record.attributes, original_attrs, ctx);

    if let Some((_, unix_nanos)) = created {
        record.time_unix_nano = unix_nanos;
    }
    record.body = AnyValue::Str(result.message.clone());
    Ok(())
}

fn event_description(status: &str, scope_name: &str, rule: &str) -> String {
    let rule = if rule.is_empty() { "unknown" } else { rule };
    match status {
        "fail" => format!("Policy violation on {} for rule {}", scope_name, rule),
        "pass" => format!("Policy check passed on {} for rule {}", scope_name, rule),
        "error" => format!("Policy check error on {} for rule {}", scope_name, rule),
        "skip" => format!("Policy check skipped on {} for rule {}", scope_name, rule),
        _ => format!("Policy evaluation on {} for rule {}", scope_name, rule),
    }
}

/// Case-sensitive; anything unrecognised, including empty, is MEDIUM.
pub fn map_severity_to_risk_level(severity: &str) -> &'static str {
    match severity {
        "critical" => "CRITICAL",
        "high" => "HIGH",
        "medium" => "MEDIUM",
        "low" => "LOW",
        _ => "MEDIUM",
    }
}

/// Numeric score for a risk level (not for a raw severity).
pub fn calculate_risk_score(risk_level: &str) -> f64 {
    match risk_level {
        "CRITICAL" => 10.0,
        "HIGH" => 8.9,
        "MEDIUM" => 6.9,
        "LOW" => 3.9,
        _ => 0.0,
    }
}

pub fn map_result_to_compliance_status(result: &str) -> &'static str {
    match result {
        "pass" => "COMPLIANT",
        _ => "NON_COMPLIANT",
    }
}

/// Instant of a result timestamp, also as nanoseconds since the epoch.
fn result_time(ts: &ResultTimestamp) -> Result<(DateTime<Utc>, u64), ProcessError> {
    let out_of_range = || ProcessError::TimestampOutOfRange {
        seconds: ts.seconds,
        nanos: ts.nanos,
    };
    let seconds = ts
        .seconds
        .checked_add(ts.nanos.div_euclid(NANOS_PER_SEC))
        .ok_or_else(out_of_range)?;
    let nanos = ts.nanos.rem_euclid(NANOS_PER_SEC) as u32;

    let time = DateTime::<Utc>::from_timestamp(seconds, nanos).ok_or_else(out_of_range)?;
    let unix_nanos = u64::try_from(seconds)
        .ok()
        .and_then(|s| s.checked_mul(NANOS_PER_SEC as u64))
        .and_then(|n| n.checked_add(u64::from(nanos)))
        .ok_or_else(out_of_range)?;
    Ok((time, unix_nanos))
}

fn kind_specific_name_key(kind: &str) -> Option<&'static str> {
    [
        (Deployment::KIND, "k8s.deployment.name"),
        (StatefulSet::KIND, "k8s.statefulset.name"),
        (DaemonSet::KIND, "k8s.daemonset.name"),
    ]
    .into_iter()
    .find(|(k, _)| *k == kind)
    .map(|(_, key)| key)
}

/// Copy `k8s.*` attributes from the report, then overlay the report scope
/// and workload fields on top.
pub fn copy_k8s_fields(target: &mut AttributeMap, original: &AttributeMap, ctx: &ReportContext) {
    for (key, value) in original {
        if key.len() > K8S_PREFIX.len() && key.starts_with(K8S_PREFIX) {
            target.insert(key.clone(), value.clone());
        }
    }

    let mut put = |key: &str, value: &str| {
        target.insert(key.to_string(), AnyValue::from(value));
    };

    put("k8s.pod.name", &ctx.scope_name);
    put("k8s.namespace.name", &ctx.scope_namespace);
    put("k8s.resource.kind", &ctx.scope_kind);
    put("k8s.resource.uid", &ctx.scope_uid);

    let workload = &ctx.workload;
    if !workload.name.is_empty() {
        if let Some(key) = kind_specific_name_key(&workload.kind) {
            put(key, &workload.name);
        }
        put("k8s.workload.name", &workload.name);
        put("k8s.workload.kind", &workload.kind);
        if !workload.namespace.is_empty() {
            put("k8s.workload.namespace", &workload.namespace);
        }
        if !workload.uid.is_empty() {
            put("k8s.workload.uid", &workload.uid);
        }
    }
}
