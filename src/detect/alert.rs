use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Classification;
use crate::event::LogLevel;
use crate::window::WindowAggregate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Spike,
    Normal,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Spike => "spike",
            AlertType::Normal => "normal",
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An actionable window, derived once at close time.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub id: Uuid,
    pub service: String,
    pub level: LogLevel,
    pub log_count: u64,
    pub error_count: u64,
    pub anomaly_count: u64,
    pub avg_response_time: f64,
    pub max_anomaly_score: f64,
    pub is_spike: bool,
    pub error_rate: f64,
    pub alert_type: AlertType,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Processing time at which the alert was raised.
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// Returns `None` for windows that did not pass the actionable gate.
    pub fn raise(window: &WindowAggregate, classification: &Classification) -> Option<Self> {
        if !classification.actionable {
            return None;
        }
        Some(Self {
            id: Uuid::new_v4(),
            service: window.service.clone(),
            level: window.level.clone(),
            log_count: window.log_count,
            error_count: window.error_count,
            anomaly_count: window.anomaly_count,
            avg_response_time: window.avg_response_time(),
            max_anomaly_score: window.max_anomaly_score,
            is_spike: classification.is_spike,
            error_rate: classification.error_rate,
            alert_type: classification.alert_type,
            window_start: window.key.start(),
            window_end: window.key.end(),
            timestamp: Utc::now(),
        })
    }

    pub fn record(&self) -> AlertRecord {
        AlertRecord::from(self)
    }
}

/// Published shape of an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub alert_id: Uuid,
    pub service: String,
    pub log_level: String,
    pub total_logs: u64,
    pub anomaly_count: u64,
    pub avg_response_time_ms: f64,
    pub is_spike: bool,
    pub alert_type: AlertType,
    pub timestamp: DateTime<Utc>,
}

impl From<&Alert> for AlertRecord {
    fn from(alert: &Alert) -> Self {
        Self {
            alert_id: alert.id,
            service: alert.service.clone(),
            log_level: alert.level.to_string(),
            total_logs: alert.log_count,
            anomaly_count: alert.anomaly_count,
            avg_response_time_ms: round2(alert.avg_response_time),
            is_spike: alert.is_spike,
            alert_type: alert.alert_type,
            timestamp: alert.timestamp,
        }
    }
}

fn round2(v: f64) -> f64 {
    if !v.is_finite() {
        return 0.0;
    }
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{classify, Thresholds};
    use crate::window::tests::event_at;
    use crate::window::{GroupKey, WindowKey};

    #[test]
    fn record_matches_output_schema() {
        let key = WindowKey::containing(0, 15_000, GroupKey::Global);
        let mut ev = event_at(0, "ERROR", "auth");
        ev.response_time_ms = Some(1234.5678);
        ev.labels.is_anomaly = true;
        let w = WindowAggregate::open(key, &ev);

        let alert = Alert::raise(&w, &classify(&w, &Thresholds::default())).unwrap();
        let json = serde_json::to_value(alert.record()).unwrap();

        assert_eq!(json["service"], "auth");
        assert_eq!(json["log_level"], "ERROR");
        assert_eq!(json["total_logs"], 1);
        assert_eq!(json["anomaly_count"], 1);
        assert_eq!(json["avg_response_time_ms"], 1234.57);
        assert_eq!(json["is_spike"], true);
        assert_eq!(json["alert_type"], "spike");
        assert!(json["timestamp"].is_string());
        assert_eq!(json["alert_id"], alert.id.to_string());
    }

    #[test]
    fn each_raise_gets_a_fresh_id() {
        let key = WindowKey::containing(0, 15_000, GroupKey::Global);
        let mut ev = event_at(0, "INFO", "web");
        ev.labels.is_anomaly = true;
        let w = WindowAggregate::open(key, &ev);
        let c = classify(&w, &Thresholds::default());
        let a = Alert::raise(&w, &c).unwrap();
        let b = Alert::raise(&w, &c).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.log_count, b.log_count);
    }
}
