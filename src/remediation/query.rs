use std::fmt;

use crate::detect::{Alert, AlertType};

/// Average latency above which the query asks about slowness.
const HIGH_LATENCY_MS: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemediationQuery(String);

impl RemediationQuery {
    pub fn from_alert(alert: &Alert) -> Self {
        let service = &alert.service;
        let mut parts = Vec::with_capacity(3);

        if alert.alert_type == AlertType::Spike {
            parts.push(format!("How to handle error spike in {service} service?"));
            parts.push(format!(
                "Remediation steps for high error rate ({} anomalies detected).",
                alert.anomaly_count
            ));
        }
        if alert.avg_response_time > HIGH_LATENCY_MS {
            parts.push(format!(
                "What to do when {service} has high latency ({:.0}ms)?",
                alert.avg_response_time
            ));
        }
        if alert.level.is_error() {
            parts.push(format!(
                "Troubleshooting {} level issues in {service}.",
                alert.level
            ));
        }
        if parts.is_empty() {
            parts.push(format!(
                "What are the best practices for handling anomalies in {service}?"
            ));
        }

        Self(parts.join(" "))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RemediationQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LogLevel;
    use chrono::Utc;
    use uuid::Uuid;

    fn alert(alert_type: AlertType, level: &str, avg: f64, anomalies: u64) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            service: "auth".into(),
            level: LogLevel::from(level.to_string()),
            log_count: 10,
            error_count: 0,
            anomaly_count: anomalies,
            avg_response_time: avg,
            max_anomaly_score: 0.0,
            is_spike: alert_type == AlertType::Spike,
            error_rate: 0.0,
            alert_type,
            window_start: Utc::now(),
            window_end: Utc::now(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn spike_with_error_level() {
        let q = RemediationQuery::from_alert(&alert(AlertType::Spike, "ERROR", 120.0, 3));
        assert_eq!(
            q.as_str(),
            "How to handle error spike in auth service? \
             Remediation steps for high error rate (3 anomalies detected). \
             Troubleshooting ERROR level issues in auth."
        );
    }

    #[test]
    fn high_latency_is_rounded() {
        let q = RemediationQuery::from_alert(&alert(AlertType::Normal, "INFO", 1534.6, 0));
        assert_eq!(q.as_str(), "What to do when auth has high latency (1535ms)?");
    }

    #[test]
    fn latency_at_limit_does_not_match() {
        let q = RemediationQuery::from_alert(&alert(AlertType::Normal, "WARNING", 1000.0, 0));
        assert_eq!(
            q.as_str(),
            "What are the best practices for handling anomalies in auth?"
        );
    }

    #[test]
    fn lowercase_critical_is_normalised() {
        let q = RemediationQuery::from_alert(&alert(AlertType::Normal, "critical", 0.0, 0));
        assert_eq!(q.as_str(), "Troubleshooting CRITICAL level issues in auth.");
    }
}
