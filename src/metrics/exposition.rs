use std::fmt::Write;

use super::pipeline_metrics::PipelineMetrics;

/// Live values owned by other components, sampled at render time.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gauges {
    pub remediation_in_flight: usize,
    pub remediation_queued: usize,
    pub open_windows: usize,
}

pub fn render_prometheus(m: &PipelineMetrics, gauges: Gauges) -> String {
    let s = m.snapshot();
    let mut out = String::with_capacity(2048);

    write_counter(&mut out, "logpulse_events_consumed_total", s.events_consumed);
    write_counter(&mut out, "logpulse_events_malformed_total", s.events_malformed);
    write_counter(&mut out, "logpulse_events_late_total", s.events_late);
    write_counter(&mut out, "logpulse_windows_closed_total", s.windows_closed);
    write_counter(&mut out, "logpulse_windows_suppressed_total", s.windows_suppressed);
    write_counter(&mut out, "logpulse_alerts_generated_total", s.alerts_generated);
    write_counter(&mut out, "logpulse_alerts_published_total", s.alerts_published);
    write_counter(&mut out, "logpulse_alerts_publish_failed_total", s.alerts_publish_failed);
    write_counter(&mut out, "logpulse_publish_retried_total", s.publish_retried);
    write_counter(&mut out, "logpulse_results_published_total", s.results_published);
    write_counter(&mut out, "logpulse_results_publish_failed_total", s.results_publish_failed);
    write_counter(&mut out, "logpulse_remediation_submitted_total", s.remediation_submitted);
    write_counter(&mut out, "logpulse_remediation_completed_total", s.remediation_completed);
    write_counter(&mut out, "logpulse_remediation_failed_total", s.remediation_failed);
    write_counter(&mut out, "logpulse_remediation_rejected_total", s.remediation_rejected);
    write_counter(&mut out, "logpulse_remediation_abandoned_total", s.remediation_abandoned);
    write_counter(&mut out, "logpulse_offset_commits_total", s.offset_commits);
    write_counter(&mut out, "logpulse_offset_commit_failed_total", s.offset_commit_failed);

    write_gauge(&mut out, "logpulse_remediation_in_flight", gauges.remediation_in_flight as u64);
    write_gauge(&mut out, "logpulse_remediation_queued", gauges.remediation_queued as u64);
    write_gauge(&mut out, "logpulse_open_windows", gauges.open_windows as u64);

    write_summary(
        &mut out,
        "logpulse_remediation_lookup_ms",
        s.lookup_latency_sum_ms,
        s.lookup_latency_count,
    );

    out
}

fn write_counter(out: &mut String, name: &str, val: u64) {
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {val}");
}

fn write_gauge(out: &mut String, name: &str, val: u64) {
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {val}");
}

fn write_summary(out: &mut String, name: &str, sum: u64, count: u64) {
    let _ = writeln!(out, "# TYPE {name} summary");
    let _ = writeln!(out, "{name}_sum {sum}");
    let _ = writeln!(out, "{name}_count {count}");
}
