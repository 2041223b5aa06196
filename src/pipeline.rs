//! Main dataflow: ingest, window, classify, publish, dispatch.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::detect::{classify, Alert, Thresholds};
use crate::event::RawEvent;
use crate::ingest::{EventSource, IngestError, Ingestor};
use crate::metrics::{Gauges, PipelineMetrics};
use crate::observe::{EventBus, PipelineEvent};
use crate::publish::{PublishKind, RecordPublisher, RecordSink};
use crate::remediation::{Dispatcher, RemediationLookup};
use crate::window::{WindowAggregate, WindowAggregator};

const HOUSEKEEPING_TICK: Duration = Duration::from_millis(250);
const SINK_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Live values shared with the operator API.
#[derive(Clone)]
pub struct PipelineStatus {
    pub metrics: Arc<PipelineMetrics>,
    pub dispatcher: Option<Arc<Dispatcher>>,
    open_windows: Arc<AtomicUsize>,
}

impl PipelineStatus {
    pub fn gauges(&self) -> Gauges {
        Gauges {
            remediation_in_flight: self.dispatcher.as_ref().map_or(0, |d| d.in_flight()),
            remediation_queued: self.dispatcher.as_ref().map_or(0, |d| d.queued()),
            open_windows: self.open_windows.load(Ordering::Relaxed),
        }
    }
}

/// Owns the window state and the output side of the dataflow.
///
/// Windows close and alerts publish strictly in order on the caller's task;
/// remediation lookups run on the dispatcher's own workers.
pub struct Pipeline {
    thresholds: Thresholds,
    aggregator: WindowAggregator,
    idle_close: Option<Duration>,
    alerts: Option<RecordPublisher>,
    dispatcher: Option<Arc<Dispatcher>>,
    sink: Arc<dyn RecordSink>,
    metrics: Arc<PipelineMetrics>,
    bus: EventBus,
    open_windows: Arc<AtomicUsize>,
    drain_grace: Duration,
    alert_seq: u64,
}

impl Pipeline {
    /// Remediation is enabled when `lookup` is given.
    pub fn new(
        config: &PipelineConfig,
        sink: Arc<dyn RecordSink>,
        lookup: Option<Arc<dyn RemediationLookup>>,
        metrics: Arc<PipelineMetrics>,
        bus: EventBus,
    ) -> Self {
        let backoff = config.publish.retry_backoff();
        let alerts = config.publish.enabled.then(|| {
            RecordPublisher::new(
                sink.clone(),
                config.kafka.output_topic.clone(),
                PublishKind::Alert,
                backoff,
                metrics.clone(),
            )
        });
        let dispatcher = lookup.map(|lookup| {
            let results = RecordPublisher::new(
                sink.clone(),
                config.kafka.remediation_topic.clone(),
                PublishKind::RemediationResult,
                backoff,
                metrics.clone(),
            );
            Arc::new(Dispatcher::spawn(
                config.remediation.dispatcher_config(),
                lookup,
                results,
                metrics.clone(),
                bus.clone(),
            ))
        });

        Self {
            thresholds: config.thresholds,
            aggregator: WindowAggregator::new(config.window.duration(), config.window.group_by),
            idle_close: config.window.idle_close(),
            alerts,
            dispatcher,
            sink,
            metrics,
            bus,
            open_windows: Arc::new(AtomicUsize::new(0)),
            drain_grace: config.remediation.timeout().saturating_add(Duration::from_secs(5)),
            alert_seq: 0,
        }
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            metrics: self.metrics.clone(),
            dispatcher: self.dispatcher.clone(),
            open_windows: self.open_windows.clone(),
        }
    }

    pub fn open_windows(&self) -> usize {
        self.aggregator.open_windows()
    }

    /// Feed one event; closes and emits any windows the watermark passed.
    pub async fn handle_event(&mut self, event: &RawEvent) {
        let obs = self.aggregator.observe(event);
        if !obs.accepted {
            self.metrics.inc_events_late();
        }
        for window in obs.closed {
            self.close_window(window).await;
        }
        self.open_windows
            .store(self.aggregator.open_windows(), Ordering::Relaxed);
    }

    /// Close every open window, e.g. at end of input.
    pub async fn flush(&mut self) {
        for window in self.aggregator.flush() {
            self.close_window(window).await;
        }
        self.open_windows.store(0, Ordering::Relaxed);
    }

    async fn close_window(&mut self, window: WindowAggregate) {
        self.metrics.inc_windows_closed();
        let classification = classify(&window, &self.thresholds);
        self.bus.emit(PipelineEvent::WindowClosed {
            window: window.key.clone(),
            service: window.service.clone(),
            level: window.level.to_string(),
            log_count: window.log_count,
            error_count: window.error_count,
            anomaly_count: window.anomaly_count,
            skipped: classification.skip_reason(&window),
        });

        let Some(alert) = Alert::raise(&window, &classification) else {
            self.metrics.inc_windows_suppressed();
            return;
        };
        self.metrics.inc_alerts_generated();
        self.alert_seq += 1;
        self.bus.emit(PipelineEvent::AlertRaised {
            seq: self.alert_seq,
            alert_id: alert.id,
            service: alert.service.clone(),
            level: alert.level.to_string(),
            log_count: alert.log_count,
            error_count: alert.error_count,
            anomaly_count: alert.anomaly_count,
            is_spike: alert.is_spike,
        });

        if let Some(publisher) = &self.alerts {
            publisher
                .publish(Some(&alert.service), &alert.record())
                .await;
        }
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.dispatch(&alert).await;
        }
    }

    /// Consume until the source ends or `shutdown` resolves, then flush.
    ///
    /// Only a source connection failure is returned as an error.
    pub async fn run<S, F>(&mut self, ingestor: &mut Ingestor<S>, shutdown: F) -> Result<(), IngestError>
    where
        S: EventSource,
        F: Future<Output = ()>,
    {
        info!(source = %ingestor.describe(), "pipeline started");
        tokio::pin!(shutdown);
        let mut tick = tokio::time::interval(HOUSEKEEPING_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_event = Instant::now();

        let result = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break Ok(());
                }
                next = ingestor.next_event() => match next {
                    Ok(Some(event)) => {
                        last_event = Instant::now();
                        self.handle_event(&event).await;
                    }
                    Ok(None) => {
                        info!("end of input");
                        break Ok(());
                    }
                    Err(e) => break Err(e),
                },
                _ = tick.tick() => {
                    ingestor.commit_if_due().await;
                    if let Some(idle) = self.idle_close {
                        if self.aggregator.open_windows() > 0 && last_event.elapsed() >= idle {
                            debug!(idle_secs = idle.as_secs(), "input idle, closing open windows");
                            self.flush().await;
                        }
                    }
                }
            }
        };

        self.flush().await;
        ingestor.commit().await;
        result
    }

    /// Drain queued lookups and flush the output sink.
    pub async fn finish(self) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.shutdown(self.drain_grace).await;
        }
        if let Err(e) = self.sink.flush(SINK_FLUSH_TIMEOUT).await {
            warn!(sink = self.sink.name(), error = %e, "output flush failed");
        }
        let s = self.metrics.snapshot();
        info!(
            events = s.events_consumed,
            malformed = s.events_malformed,
            late = s.events_late,
            windows = s.windows_closed,
            alerts = s.alerts_generated,
            published = s.alerts_published,
            remediations = s.remediation_completed,
            remediation_failures = s.remediation_failed,
            "pipeline stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::JsonLinesSource;
    use crate::publish::MemorySink;
    use crate::remediation::{LookupAnswer, LookupError};
    use crate::window::tests::event_at;
    use async_trait::async_trait;
    use serde_json::Value;

    const T0: i64 = 1_714_557_600_000;

    #[derive(Default)]
    struct CountingLookup {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemediationLookup for CountingLookup {
        async fn lookup(&self, query: &str) -> Result<LookupAnswer, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(LookupAnswer {
                answer: format!("answer for: {query}"),
                sources: vec!["runbook.md".into()],
                model: "test".into(),
            })
        }
    }

    struct Harness {
        pipeline: Pipeline,
        sink: Arc<MemorySink>,
        lookup: Arc<CountingLookup>,
        metrics: Arc<PipelineMetrics>,
    }

    fn harness(config: PipelineConfig) -> Harness {
        let sink = Arc::new(MemorySink::new());
        let lookup = Arc::new(CountingLookup::default());
        let metrics = PipelineMetrics::new();
        let pipeline = Pipeline::new(
            &config,
            sink.clone(),
            Some(lookup.clone()),
            metrics.clone(),
            EventBus::default(),
        );
        Harness {
            pipeline,
            sink,
            lookup,
            metrics,
        }
    }

    fn on_topic(sink: &MemorySink, topic: &str) -> Vec<Value> {
        sink.records()
            .iter()
            .filter(|r| r.topic == topic)
            .map(|r| serde_json::from_slice(&r.payload).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn five_errors_raise_a_spike() {
        let mut h = harness(PipelineConfig::default());
        for i in 0..5 {
            h.pipeline.handle_event(&event_at(T0 + i * 1000, "ERROR", "auth")).await;
        }
        assert_eq!(h.pipeline.open_windows(), 1);
        // First event of the next window closes the previous one.
        h.pipeline.handle_event(&event_at(T0 + 15_000, "INFO", "auth")).await;
        h.pipeline.finish().await;

        let alerts = on_topic(&h.sink, "processed_alerts");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0]["total_logs"], 5);
        assert_eq!(alerts[0]["is_spike"], true);
        assert_eq!(alerts[0]["alert_type"], "spike");
        assert_eq!(alerts[0]["log_level"], "ERROR");

        let results = on_topic(&h.sink, "remediation_alerts");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["status"], "success");
        assert_eq!(results[0]["original_alert"]["alert_id"], alerts[0]["alert_id"]);
        assert_eq!(h.metrics.windows_suppressed_val(), 0);
    }

    #[tokio::test]
    async fn single_anomaly_is_actionable() {
        let mut h = harness(PipelineConfig::default());
        for i in 0..20 {
            let mut ev = event_at(T0 + i * 500, "INFO", "web");
            ev.labels.is_anomaly = i == 7;
            h.pipeline.handle_event(&ev).await;
        }
        h.pipeline.flush().await;
        h.pipeline.finish().await;

        let alerts = on_topic(&h.sink, "processed_alerts");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0]["anomaly_count"], 1);
        assert_eq!(alerts[0]["alert_type"], "spike");
        assert_eq!(h.lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn quiet_window_raises_nothing() {
        let mut h = harness(PipelineConfig::default());
        for i in 0..100 {
            h.pipeline.handle_event(&event_at(T0 + i * 100, "INFO", "web")).await;
        }
        h.pipeline.flush().await;
        h.pipeline.finish().await;

        assert!(h.sink.records().is_empty());
        assert_eq!(h.lookup.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.metrics.windows_closed_val(), 1);
        assert_eq!(h.metrics.windows_suppressed_val(), 1);
        assert_eq!(h.metrics.remediation_submitted_val(), 0);
    }

    #[tokio::test]
    async fn late_events_are_counted_not_aggregated() {
        let mut h = harness(PipelineConfig::default());
        h.pipeline.handle_event(&event_at(T0, "INFO", "web")).await;
        h.pipeline.handle_event(&event_at(T0 + 15_000, "INFO", "web")).await;
        h.pipeline.handle_event(&event_at(T0 + 1_000, "ERROR", "web")).await;

        assert_eq!(h.metrics.events_late_val(), 1);
        assert_eq!(h.metrics.windows_closed_val(), 1);
    }

    #[tokio::test]
    async fn disabled_publishing_still_classifies() {
        let mut config = PipelineConfig::default();
        config.publish.enabled = false;
        let mut h = harness(config);
        for i in 0..5 {
            h.pipeline.handle_event(&event_at(T0 + i, "CRITICAL", "db")).await;
        }
        h.pipeline.flush().await;
        h.pipeline.finish().await;

        assert_eq!(h.metrics.alerts_generated_val(), 1);
        assert!(on_topic(&h.sink, "processed_alerts").is_empty());
        assert_eq!(on_topic(&h.sink, "remediation_alerts").len(), 1);
    }

    #[tokio::test]
    async fn alerts_publish_in_window_order() {
        let mut config = PipelineConfig::default();
        config.window.group_by = crate::window::GroupBy::Service;
        let mut h = harness(config);
        for (offset, service) in [(0, "b"), (1, "a"), (15_000, "c"), (30_000, "a")] {
            for i in 0..5 {
                h.pipeline
                    .handle_event(&event_at(T0 + offset + i, "ERROR", service))
                    .await;
            }
        }
        h.pipeline.flush().await;
        h.pipeline.finish().await;

        let services: Vec<String> = on_topic(&h.sink, "processed_alerts")
            .iter()
            .map(|a| a["service"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(services, vec!["a", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn run_consumes_lines_and_flushes_at_end() {
        let mut input = String::new();
        for i in 0..5 {
            input.push_str(&format!(
                "{{\"timestamp\":\"2024-05-01T10:00:0{i}Z\",\"level\":\"ERROR\",\"source\":\"api\",\"service\":\"auth\",\"message\":\"boom\",\"response_time_ms\":1500}}\n"
            ));
        }
        input.push_str("this is not json\n\n");

        let mut h = harness(PipelineConfig::default());
        let mut ingestor = Ingestor::new(
            JsonLinesSource::new(input.as_bytes(), "mem"),
            Duration::from_secs(1),
            h.metrics.clone(),
            EventBus::default(),
        );
        h.pipeline
            .run(&mut ingestor, std::future::pending())
            .await
            .unwrap();
        h.pipeline.finish().await;

        assert_eq!(h.metrics.events_consumed_val(), 5);
        assert_eq!(h.metrics.events_malformed_val(), 1);
        assert_eq!(h.metrics.offset_commits_val(), 1);

        let alerts = on_topic(&h.sink, "processed_alerts");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0]["avg_response_time_ms"], 1500.0);

        let results = on_topic(&h.sink, "remediation_alerts");
        let query = results[0]["query"].as_str().unwrap();
        assert!(query.contains("high latency (1500ms)"));
    }

    #[tokio::test]
    async fn shutdown_signal_stops_and_flushes() {
        let mut h = harness(PipelineConfig::default());
        let input = "{\"timestamp\":\"2024-05-01T10:00:00Z\",\"level\":\"ERROR\",\"source\":\"a\",\"service\":\"s\",\"message\":\"m\",\"_labels\":{\"is_anomaly\":true}}\n";
        let mut ingestor = Ingestor::new(
            JsonLinesSource::new(input.as_bytes(), "mem"),
            Duration::from_secs(1),
            h.metrics.clone(),
            EventBus::default(),
        );
        h.pipeline.run(&mut ingestor, async {}).await.unwrap();
        h.pipeline.finish().await;

        // Shutdown wins before the first read, so nothing was consumed.
        assert_eq!(h.metrics.events_consumed_val(), 0);
        assert!(h.sink.records().is_empty());
    }

    fn error_line(second: u32) -> String {
        format!(
            "{{\"timestamp\":\"2024-05-01T10:00:{second:02}Z\",\"level\":\"ERROR\",\"source\":\"api\",\"service\":\"auth\",\"message\":\"boom\"}}\n"
        )
    }

    #[tokio::test]
    async fn idle_close_emits_window_once() {
        use tokio::io::AsyncWriteExt;

        let mut config = PipelineConfig::default();
        config.window.idle_close_secs = 1;
        let mut h = harness(config);

        let (reader, mut writer) = tokio::io::duplex(4096);
        let feeder = tokio::spawn(async move {
            for second in 0..5 {
                writer.write_all(error_line(second).as_bytes()).await.unwrap();
            }
            // Same bucket, after the idle close has flushed it.
            tokio::time::sleep(Duration::from_millis(1600)).await;
            writer.write_all(error_line(7).as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1000)).await;
        });

        let mut ingestor = Ingestor::new(
            JsonLinesSource::new(tokio::io::BufReader::new(reader), "pipe"),
            Duration::from_secs(1),
            h.metrics.clone(),
            EventBus::default(),
        );
        h.pipeline
            .run(&mut ingestor, tokio::time::sleep(Duration::from_millis(2200)))
            .await
            .unwrap();
        h.pipeline.finish().await;
        feeder.await.unwrap();

        assert_eq!(h.metrics.events_consumed_val(), 6);
        assert_eq!(h.metrics.events_late_val(), 1);
        assert_eq!(h.metrics.windows_closed_val(), 1);
        let alerts = on_topic(&h.sink, "processed_alerts");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0]["total_logs"], 5);
    }

    #[tokio::test]
    async fn oversized_lookup_timeout_saturates() {
        let mut config = PipelineConfig::default();
        config.remediation.timeout_secs = u64::MAX;
        let h = harness(config);
        assert_eq!(h.pipeline.drain_grace, Duration::MAX);
        h.pipeline.finish().await;
    }

    #[tokio::test]
    async fn status_reports_gauges() {
        let mut h = harness(PipelineConfig::default());
        let status = h.pipeline.status();
        h.pipeline.handle_event(&event_at(T0, "INFO", "web")).await;
        assert_eq!(status.gauges().open_windows, 1);
        h.pipeline.flush().await;
        assert_eq!(status.gauges().open_windows, 0);
        h.pipeline.finish().await;
        assert_eq!(status.gauges().remediation_in_flight, 0);
    }
}
