use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

/// Process counters shared by every pipeline stage.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    events_consumed: AtomicU64,
    events_malformed: AtomicU64,
    events_late: AtomicU64,
    windows_closed: AtomicU64,
    windows_suppressed: AtomicU64,
    alerts_generated: AtomicU64,
    alerts_published: AtomicU64,
    alerts_publish_failed: AtomicU64,
    publish_retried: AtomicU64,
    results_published: AtomicU64,
    results_publish_failed: AtomicU64,
    remediation_submitted: AtomicU64,
    remediation_completed: AtomicU64,
    remediation_failed: AtomicU64,
    remediation_rejected: AtomicU64,
    remediation_abandoned: AtomicU64,
    offset_commits: AtomicU64,
    offset_commit_failed: AtomicU64,
    lookup_latency_sum_ms: AtomicU64,
    lookup_latency_count: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub events_consumed: u64,
    pub events_malformed: u64,
    pub events_late: u64,
    pub windows_closed: u64,
    pub windows_suppressed: u64,
    pub alerts_generated: u64,
    pub alerts_published: u64,
    pub alerts_publish_failed: u64,
    pub publish_retried: u64,
    pub results_published: u64,
    pub results_publish_failed: u64,
    pub remediation_submitted: u64,
    pub remediation_completed: u64,
    pub remediation_failed: u64,
    pub remediation_rejected: u64,
    pub remediation_abandoned: u64,
    pub offset_commits: u64,
    pub offset_commit_failed: u64,
    pub lookup_latency_sum_ms: u64,
    pub lookup_latency_count: u64,
}

macro_rules! counter {
    ($inc:ident, $val:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }

        pub fn $val(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl PipelineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    counter!(inc_events_consumed, events_consumed_val, events_consumed);
    counter!(inc_events_malformed, events_malformed_val, events_malformed);
    counter!(inc_events_late, events_late_val, events_late);
    counter!(inc_windows_closed, windows_closed_val, windows_closed);
    counter!(inc_windows_suppressed, windows_suppressed_val, windows_suppressed);
    counter!(inc_alerts_generated, alerts_generated_val, alerts_generated);
    counter!(inc_alerts_published, alerts_published_val, alerts_published);
    counter!(inc_alerts_publish_failed, alerts_publish_failed_val, alerts_publish_failed);
    counter!(inc_publish_retried, publish_retried_val, publish_retried);
    counter!(inc_results_published, results_published_val, results_published);
    counter!(inc_results_publish_failed, results_publish_failed_val, results_publish_failed);
    counter!(inc_remediation_submitted, remediation_submitted_val, remediation_submitted);
    counter!(inc_remediation_completed, remediation_completed_val, remediation_completed);
    counter!(inc_remediation_failed, remediation_failed_val, remediation_failed);
    counter!(inc_remediation_rejected, remediation_rejected_val, remediation_rejected);
    counter!(inc_remediation_abandoned, remediation_abandoned_val, remediation_abandoned);
    counter!(inc_offset_commits, offset_commits_val, offset_commits);
    counter!(inc_offset_commit_failed, offset_commit_failed_val, offset_commit_failed);

    pub fn record_lookup_latency(&self, start: Instant) {
        let ms = start.elapsed().as_millis() as u64;
        self.lookup_latency_sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.lookup_latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lookup_latency_vals(&self) -> (u64, u64) {
        (
            self.lookup_latency_sum_ms.load(Ordering::Relaxed),
            self.lookup_latency_count.load(Ordering::Relaxed),
        )
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (lookup_latency_sum_ms, lookup_latency_count) = self.lookup_latency_vals();
        MetricsSnapshot {
            events_consumed: self.events_consumed_val(),
            events_malformed: self.events_malformed_val(),
            events_late: self.events_late_val(),
            windows_closed: self.windows_closed_val(),
            windows_suppressed: self.windows_suppressed_val(),
            alerts_generated: self.alerts_generated_val(),
            alerts_published: self.alerts_published_val(),
            alerts_publish_failed: self.alerts_publish_failed_val(),
            publish_retried: self.publish_retried_val(),
            results_published: self.results_published_val(),
            results_publish_failed: self.results_publish_failed_val(),
            remediation_submitted: self.remediation_submitted_val(),
            remediation_completed: self.remediation_completed_val(),
            remediation_failed: self.remediation_failed_val(),
            remediation_rejected: self.remediation_rejected_val(),
            remediation_abandoned: self.remediation_abandoned_val(),
            offset_commits: self.offset_commits_val(),
            offset_commit_failed: self.offset_commit_failed_val(),
            lookup_latency_sum_ms,
            lookup_latency_count,
        }
    }
}
