//! Operator-facing counters. Not load-bearing for the dataflow.

pub mod exposition;
pub mod pipeline_metrics;

pub use self::exposition::{render_prometheus, Gauges};
pub use self::pipeline_metrics::{MetricsSnapshot, PipelineMetrics};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn counters_increment() {
        let m = PipelineMetrics::new();
        m.inc_events_consumed();
        m.inc_events_consumed();
        m.inc_events_malformed();
        assert_eq!(m.events_consumed_val(), 2);
        assert_eq!(m.events_malformed_val(), 1);
        assert_eq!(m.snapshot().events_consumed, 2);
    }

    #[test]
    fn latency_recording() {
        let m = PipelineMetrics::new();
        let start = Instant::now();
        std::thread::sleep(std::time::Duration::from_millis(2));
        m.record_lookup_latency(start);
        let (sum, count) = m.lookup_latency_vals();
        assert!(sum >= 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn prometheus_output_contains_metric_names() {
        let m = PipelineMetrics::new();
        m.inc_alerts_published();
        m.inc_remediation_failed();
        let gauges = Gauges {
            remediation_in_flight: 1,
            remediation_queued: 3,
            open_windows: 0,
        };
        let output = render_prometheus(&m, gauges);
        assert!(output.contains("logpulse_alerts_published_total 1"));
        assert!(output.contains("logpulse_remediation_failed_total 1"));
        assert!(output.contains("logpulse_remediation_queued 3"));
        assert!(output.contains("# TYPE logpulse_remediation_lookup_ms summary"));
    }
}
