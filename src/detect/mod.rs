//! Threshold classification of closed windows into alerts.

pub mod alert;

pub use self::alert::{Alert, AlertRecord, AlertType};

use crate::window::WindowAggregate;
use serde::{Deserialize, Serialize};

/// Threshold rules applied to every closed window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Error count at or above which a window is a spike.
    pub spike_error_count: u64,
    /// Error rate strictly above which a window is actionable.
    pub error_rate: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            spike_error_count: 5,
            error_rate: 0.1,
        }
    }
}

/// Flags derived from one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub is_spike: bool,
    pub error_rate: f64,
    pub actionable: bool,
    pub alert_type: AlertType,
}

impl Classification {
    /// Why a window was not escalated, for debug output.
    pub fn skip_reason(&self, window: &WindowAggregate) -> Option<String> {
        if self.actionable {
            return None;
        }
        Some(format!(
            "spike={} anomalies={} error_rate={:.2}%",
            self.is_spike,
            window.anomaly_count,
            self.error_rate * 100.0
        ))
    }
}

/// Classify a closed window. Pure: equal inputs give equal outputs.
///
/// A non-spike window can still be actionable through its error rate, yet its
/// alert type is then `normal`; only spikes ever carry `spike`.
pub fn classify(window: &WindowAggregate, thresholds: &Thresholds) -> Classification {
    let is_spike = window.anomaly_count > 0 || window.error_count >= thresholds.spike_error_count;
    let error_rate = window.error_rate();
    let actionable = is_spike || window.anomaly_count > 0 || error_rate > thresholds.error_rate;

    Classification {
        is_spike,
        error_rate,
        actionable,
        alert_type: if is_spike {
            AlertType::Spike
        } else {
            AlertType::Normal
        },
    }
}

/// Classify and, when actionable, derive the alert.
pub fn evaluate(window: &WindowAggregate, thresholds: &Thresholds) -> Option<Alert> {
    let classification = classify(window, thresholds);
    Alert::raise(window, &classification)
}
