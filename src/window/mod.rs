//! Tumbling event-time windows and their per-window reducers.

pub mod aggregator;

pub use self::aggregator::{Observation, WindowAggregator};

use crate::event::{LogLevel, RawEvent};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// How events are partitioned before windowing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    /// One window per time bucket across every service.
    #[default]
    Global,
    /// One window per time bucket and service.
    Service,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum GroupKey {
    Global,
    Service(String),
}

impl GroupKey {
    pub fn for_event(group_by: GroupBy, event: &RawEvent) -> Self {
        match group_by {
            GroupBy::Global => GroupKey::Global,
            GroupBy::Service => GroupKey::Service(event.service.clone()),
        }
    }
}

/// Identity of a window: grouping key plus `[start, end)` in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct WindowKey {
    pub start_ms: i64,
    pub end_ms: i64,
    pub group: GroupKey,
}

impl WindowKey {
    /// `start = floor(t / duration) * duration`, also for pre-epoch times.
    pub fn containing(event_time_ms: i64, duration_ms: i64, group: GroupKey) -> Self {
        let start_ms = window_start(event_time_ms, duration_ms);
        Self {
            start_ms,
            end_ms: start_ms + duration_ms,
            group,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.start_ms)
            .single()
            .unwrap_or_default()
    }

    pub fn end(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.end_ms)
            .single()
            .unwrap_or_default()
    }
}

pub fn window_start(event_time_ms: i64, duration_ms: i64) -> i64 {
    event_time_ms.div_euclid(duration_ms) * duration_ms
}

/// Reducer state for one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowAggregate {
    pub key: WindowKey,
    pub log_count: u64,
    pub error_count: u64,
    pub anomaly_count: u64,
    pub response_time_sum: f64,
    pub min_response_time: f64,
    pub max_response_time: f64,
    pub max_anomaly_score: f64,
    /// Service of the first event seen in the window.
    pub service: String,
    /// Level of the first event seen in the window.
    pub level: LogLevel,
}

impl WindowAggregate {
    /// Open a window from its first event.
    pub fn open(key: WindowKey, first: &RawEvent) -> Self {
        let rt = first.response_time_or_zero();
        let mut agg = Self {
            key,
            log_count: 0,
            error_count: 0,
            anomaly_count: 0,
            response_time_sum: 0.0,
            min_response_time: rt,
            max_response_time: rt,
            max_anomaly_score: first.labels.anomaly_score,
            service: first.service.clone(),
            level: first.level.clone(),
        };
        agg.absorb(first);
        agg
    }

    pub fn absorb(&mut self, event: &RawEvent) {
        self.log_count += 1;
        if event.is_error() {
            self.error_count += 1;
        }
        if event.is_anomaly() {
            self.anomaly_count += 1;
        }

        let rt = event.response_time_or_zero();
        self.response_time_sum += rt;
        self.min_response_time = self.min_response_time.min(rt);
        self.max_response_time = self.max_response_time.max(rt);
        self.max_anomaly_score = self.max_anomaly_score.max(event.labels.anomaly_score);
    }

    pub fn avg_response_time(&self) -> f64 {
        if self.log_count == 0 {
            return 0.0;
        }
        self.response_time_sum / self.log_count as f64
    }

    /// Fraction of ERROR/CRITICAL events; zero for an empty window.
    pub fn error_rate(&self) -> f64 {
        if self.log_count == 0 {
            return 0.0;
        }
        self.error_count as f64 / self.log_count as f64
    }
}
