use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute set of a record, resource or scope. Keys are unique.
pub type AttributeMap = BTreeMap<String, AnyValue>;

/// A batch of log records grouped by resource and instrumentation scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogBatch {
    pub resource_logs: Vec<ResourceLogs>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceLogs {
    pub resource: Resource,
    pub scope_logs: Vec<ScopeLogs>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub schema_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resource {
    pub attributes: AttributeMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScopeLogs {
    pub scope: InstrumentationScope,
    pub log_records: Vec<LogRecord>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub schema_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentationScope {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: AttributeMap,
}

/// A single log record. Only records are rewritten by the processor; the
/// grouping levels above are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogRecord {
    pub time_unix_nano: u64,
    pub observed_time_unix_nano: u64,
    pub severity_number: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub severity_text: String,
    #[serde(skip_serializing_if = "TraceId::is_empty")]
    pub trace_id: TraceId,
    #[serde(skip_serializing_if = "SpanId::is_empty")]
    pub span_id: SpanId,
    pub flags: u32,
    #[serde(skip_serializing_if = "AnyValue::is_empty")]
    pub body: AnyValue,
    pub attributes: AttributeMap,
}

/// Tagged attribute value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum AnyValue {
    #[default]
    #[serde(rename = "empty")]
    Empty,
    #[serde(rename = "stringValue")]
    Str(String),
    #[serde(rename = "intValue")]
    Int(i64),
    #[serde(rename = "doubleValue")]
    Double(f64),
    #[serde(rename = "boolValue")]
    Bool(bool),
    #[serde(rename = "bytesValue", with = "crate::utils::base64_bytes")]
    Bytes(Vec<u8>),
    #[serde(rename = "arrayValue")]
    Array(Vec<AnyValue>),
    #[serde(rename = "kvlistValue")]
    KvList(AttributeMap),
}

impl AnyValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, AnyValue::Empty)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            AnyValue::Empty => "Empty",
            AnyValue::Str(_) => "Str",
            AnyValue::Int(_) => "Int",
            AnyValue::Double(_) => "Double",
            AnyValue::Bool(_) => "Bool",
            AnyValue::Bytes(_) => "Bytes",
            AnyValue::Array(_) => "Slice",
            AnyValue::KvList(_) => "Map",
        }
    }

    /// Borrow the value only if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AnyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// String form of any value. Lists and maps render as compact JSON,
    /// bytes as standard base64.
    pub fn as_string(&self) -> String {
        match self {
            AnyValue::Empty => String::new(),
            AnyValue::Str(s) => s.clone(),
            AnyValue::Int(i) => i.to_string(),
            AnyValue::Double(d) => serde_json::Number::from_f64(*d)
                .map(|n| n.to_string())
                .unwrap_or_else(|| d.to_string()),
            AnyValue::Bool(b) => b.to_string(),
            AnyValue::Bytes(b) => crate::utils::encode_base64(b),
            AnyValue::Array(_) | AnyValue::KvList(_) => self.to_json().to_string(),
        }
    }

    /// Plain JSON rendering without the type tags.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            AnyValue::Empty => Value::Null,
            AnyValue::Str(s) => Value::String(s.clone()),
            AnyValue::Int(i) => Value::from(*i),
            AnyValue::Double(d) => serde_json::Number::from_f64(*d)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            AnyValue::Bool(b) => Value::Bool(*b),
            AnyValue::Bytes(b) => Value::String(crate::utils::encode_base64(b)),
            AnyValue::Array(items) => Value::Array(items.iter().map(AnyValue::to_json).collect()),
            AnyValue::KvList(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for AnyValue {
    fn from(s: &str) -> Self {
        AnyValue::Str(s.to_string())
    }
}

impl From<String> for AnyValue {
    fn from(s: String) -> Self {
        AnyValue::Str(s)
    }
}

impl From<f64> for AnyValue {
    fn from(d: f64) -> Self {
        AnyValue::Double(d)
    }
}

macro_rules! hex_id {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub fn is_empty(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_empty() {
                    Ok(())
                } else {
                    f.write_str(&hex::encode(self.0))
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                let mut bytes = [0u8; $len];
                if !s.is_empty() {
                    hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
                }
                Ok($name(bytes))
            }
        }
    };
}

hex_id!(TraceId, 16);
hex_id!(SpanId, 8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_form_of_values() {
        assert_eq!(AnyValue::from("x").as_string(), "x");
        assert_eq!(AnyValue::Int(42).as_string(), "42");
        assert_eq!(AnyValue::Bool(true).as_string(), "true");
        assert_eq!(AnyValue::Double(6.9).as_string(), "6.9");
        assert_eq!(AnyValue::Bytes(b"hi".to_vec()).as_string(), "aGk=");
        assert_eq!(AnyValue::Empty.as_string(), "");

        let mut map = AttributeMap::new();
        map.insert("kind".to_string(), AnyValue::from("Deployment"));
        map.insert("replicas".to_string(), AnyValue::Int(3));
        assert_eq!(
            AnyValue::KvList(map).as_string(),
            r#"{"kind":"Deployment","replicas":3}"#
        );
        assert_eq!(
            AnyValue::Array(vec![AnyValue::from("a"), AnyValue::Bool(false)]).as_string(),
            r#"["a",false]"#
        );
    }

    #[test]
    fn test_double_string_form_is_shortest() {
        assert_eq!(AnyValue::Double(1e300).as_string(), "1e300");
        assert_eq!(AnyValue::Double(1e-7).as_string(), "1e-7");
        assert_eq!(AnyValue::Double(0.5).as_string(), "0.5");
        assert_eq!(AnyValue::Double(f64::NAN).as_string(), "NaN");
    }

    #[test]
    fn test_as_str_only_for_strings() {
        assert_eq!(AnyValue::from("Report").as_str(), Some("Report"));
        assert_eq!(AnyValue::Int(1).as_str(), None);
    }

    #[test]
    fn test_batch_json_shape() {
        let json = r#"{
            "resourceLogs": [{
                "resource": {"attributes": {"k8s.cluster.name": {"stringValue": "prod"}}},
                "scopeLogs": [{
                    "scope": {"name": "k8sobjects"},
                    "logRecords": [{
                        "timeUnixNano": 1758264665000000000,
                        "severityNumber": 9,
                        "severityText": "INFO",
                        "traceId": "0102030405060708090a0b0c0d0e0f10",
                        "spanId": "0102030405060708",
                        "body": {"stringValue": "hello"},
                        "attributes": {
                            "count": {"intValue": 2},
                            "ratio": {"doubleValue": 0.5},
                            "raw": {"bytesValue": "aGk="},
                            "list": {"arrayValue": [{"stringValue": "a"}]},
                            "nested": {"kvlistValue": {"ok": {"boolValue": true}}}
                        }
                    }]
                }]
            }]
        }"#;
        let batch: LogBatch = serde_json::from_str(json).unwrap();
        let record = &batch.resource_logs[0].scope_logs[0].log_records[0];
        assert_eq!(record.time_unix_nano, 1_758_264_665_000_000_000);
        assert_eq!(record.trace_id.to_string(), "0102030405060708090a0b0c0d0e0f10");
        assert_eq!(record.span_id.0, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(record.body, AnyValue::from("hello"));
        assert_eq!(record.attributes["raw"], AnyValue::Bytes(b"hi".to_vec()));
        assert_eq!(record.attributes["ratio"], AnyValue::Double(0.5));

        let encoded = serde_json::to_string(&batch).unwrap();
        let decoded: LogBatch = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn test_empty_ids_are_omitted() {
        let record = LogRecord::default();
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("traceId").is_none());
        assert!(json.get("body").is_none());
    }

    #[test]
    fn test_bad_trace_id_rejected() {
        let json = r#"{"traceId": "zz"}"#;
        assert!(serde_json::from_str::<LogRecord>(json).is_err());
    }
}
