//! Structured log events as they arrive from the input queue.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unparseable timestamp {value:?}")]
    Timestamp { value: String },

    #[error("empty record")]
    Empty,
}

/// Severity reported by the emitting service.
///
/// Known levels are normalised to upper case; anything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    Other(String),
}

impl LogLevel {
    /// ERROR and CRITICAL count towards a window's error total.
    pub fn is_error(&self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Critical)
    }

    pub fn as_str(&self) -> &str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
            LogLevel::Other(raw) => raw,
        }
    }
}

impl From<String> for LogLevel {
    fn from(raw: String) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "DEBUG" => LogLevel::Debug,
            "INFO" => LogLevel::Info,
            "WARNING" | "WARN" => LogLevel::Warning,
            "ERROR" => LogLevel::Error,
            "CRITICAL" => LogLevel::Critical,
            _ => LogLevel::Other(raw),
        }
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Other(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ground-truth labels attached by the log generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyLabels {
    #[serde(default)]
    pub is_anomaly: bool,
    #[serde(default = "default_anomaly_type")]
    pub anomaly_type: String,
    #[serde(default)]
    pub anomaly_score: f64,
}

fn default_anomaly_type() -> String {
    "none".to_string()
}

impl Default for AnomalyLabels {
    fn default() -> Self {
        Self {
            is_anomaly: false,
            anomaly_type: default_anomaly_type(),
            anomaly_score: 0.0,
        }
    }
}

/// Wire shape of an input record. Validated once into [`RawEvent`].
#[derive(Debug, Deserialize)]
struct EventRecord {
    timestamp: String,
    level: LogLevel,
    source: String,
    service: String,
    message: String,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    ip_address: Option<String>,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    status_code: Option<u16>,
    #[serde(default)]
    response_time_ms: Option<f64>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    stack_trace: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
    #[serde(default, rename = "_labels")]
    labels: Option<AnomalyLabels>,
}

/// A single decoded log event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub source: String,
    pub service: String,
    pub message: String,
    pub request_id: Option<String>,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub endpoint: Option<String>,
    pub method: Option<String>,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<f64>,
    pub error_code: Option<String>,
    pub stack_trace: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub labels: AnomalyLabels,
}

impl RawEvent {
    /// Decode and validate one JSON record.
    pub fn from_slice(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(DecodeError::Empty);
        }
        let record: EventRecord = serde_json::from_slice(payload)?;
        let timestamp = parse_timestamp(&record.timestamp)?;

        Ok(Self {
            timestamp,
            level: record.level,
            source: record.source,
            service: record.service,
            message: record.message,
            request_id: record.request_id,
            user_id: record.user_id,
            ip_address: record.ip_address,
            endpoint: record.endpoint,
            method: record.method,
            status_code: record.status_code,
            response_time_ms: record.response_time_ms,
            error_code: record.error_code,
            stack_trace: record.stack_trace,
            metadata: record.metadata,
            labels: record.labels.unwrap_or_default(),
        })
    }

    /// Event time in milliseconds since the Unix epoch.
    pub fn event_time_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    pub fn is_error(&self) -> bool {
        self.level.is_error()
    }

    pub fn is_anomaly(&self) -> bool {
        self.labels.is_anomaly
    }

    /// Response time with missing values treated as zero.
    pub fn response_time_or_zero(&self) -> f64 {
        self.response_time_ms.unwrap_or(0.0)
    }
}

/// Parse an ISO-8601 timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DecodeError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(DecodeError::Timestamp {
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "timestamp": "2024-05-01T12:00:03.250Z",
        "level": "ERROR",
        "source": "api-gateway",
        "service": "auth",
        "message": "token validation failed",
        "request_id": "req-1",
        "status_code": 500,
        "response_time_ms": 1250.5,
        "metadata": {"region": "eu-west-1"},
        "_labels": {"is_anomaly": true, "anomaly_type": "error_spike", "anomaly_score": 0.92}
    }"#;

    #[test]
    fn decodes_full_record() {
        let ev = RawEvent::from_slice(FULL.as_bytes()).unwrap();
        assert_eq!(ev.service, "auth");
        assert_eq!(ev.level, LogLevel::Error);
        assert_eq!(ev.status_code, Some(500));
        assert!(ev.is_error());
        assert!(ev.is_anomaly());
        assert_eq!(ev.labels.anomaly_type, "error_spike");
        assert_eq!(ev.event_time_ms() % 1000, 250);
    }

    #[test]
    fn missing_labels_default_to_normal() {
        let json = r#"{"timestamp":"2024-05-01T12:00:00","level":"info","source":"s","service":"web","message":"ok"}"#;
        let ev = RawEvent::from_slice(json.as_bytes()).unwrap();
        assert!(!ev.is_anomaly());
        assert_eq!(ev.labels.anomaly_type, "none");
        assert_eq!(ev.labels.anomaly_score, 0.0);
        assert_eq!(ev.response_time_or_zero(), 0.0);
    }

    #[test]
    fn partial_labels_fill_defaults() {
        let json = r#"{"timestamp":"2024-05-01T12:00:00Z","level":"INFO","source":"s","service":"web","message":"ok","_labels":{"is_anomaly":true}}"#;
        let ev = RawEvent::from_slice(json.as_bytes()).unwrap();
        assert!(ev.is_anomaly());
        assert_eq!(ev.labels.anomaly_type, "none");
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let json = r#"{"timestamp":"2024-05-01T12:00:00Z","level":"INFO","source":"s","message":"ok"}"#;
        assert!(matches!(
            RawEvent::from_slice(json.as_bytes()),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        let json = r#"{"timestamp":"yesterday","level":"INFO","source":"s","service":"web","message":"ok"}"#;
        assert!(matches!(
            RawEvent::from_slice(json.as_bytes()),
            Err(DecodeError::Timestamp { .. })
        ));
    }

    #[test]
    fn blank_payload_is_empty() {
        assert!(matches!(RawEvent::from_slice(b"  \n"), Err(DecodeError::Empty)));
    }

    #[test]
    fn level_keeps_unknown_spelling() {
        let level = LogLevel::from("notice".to_string());
        assert_eq!(level.as_str(), "notice");
        assert!(!level.is_error());
        assert!(LogLevel::from("critical".to_string()).is_error());
    }

    #[test]
    fn offset_timestamps_normalise_to_utc() {
        let ts = parse_timestamp("2024-05-01T14:00:00+02:00").unwrap();
        assert_eq!(ts, parse_timestamp("2024-05-01T12:00:00Z").unwrap());
    }
}
