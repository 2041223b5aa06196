//! logpulse -- streaming log anomaly detection with remediation lookup.
//!
//! Structured log events are bucketed into tumbling event-time windows,
//! each closed window is classified against threshold rules, actionable
//! windows become alerts, and every alert is handed to a small worker pool
//! that asks an external lookup service for remediation advice.

pub mod api;
pub mod config;
pub mod detect;
pub mod event;
pub mod ingest;
pub mod metrics;
pub mod observe;
pub mod pipeline;
pub mod publish;
pub mod remediation;
pub mod window;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::BufReader;
use tracing::{error, info, warn};

use crate::config::{PipelineConfig, RemediationConfig};
use crate::ingest::{EventSource, Ingestor, JsonLinesSource};
use crate::metrics::PipelineMetrics;
use crate::observe::{DebugObserver, EventBus};
use crate::pipeline::Pipeline;
use crate::publish::{RecordSink, StdoutSink};
use crate::remediation::{LookupClient, LookupStats, RemediationLookup};

/// Consume the configured Kafka topic until Ctrl-C.
#[cfg(feature = "kafka")]
pub async fn run(config: PipelineConfig) -> Result<()> {
    use crate::ingest::kafka::KafkaSource;
    use crate::publish::kafka::KafkaSink;

    let group_id = config.kafka.effective_group_id();
    info!(brokers = %config.kafka.brokers, topic = %config.kafka.input_topic, %group_id, "connecting to kafka");
    let source = KafkaSource::connect(
        &config.kafka.consumer_config(&group_id),
        &config.kafka.input_topic,
        Duration::from_secs(10),
    )
    .context("kafka source unavailable")?;
    let sink: Arc<dyn RecordSink> =
        Arc::new(KafkaSink::new(&config.kafka.producer_config()).context("kafka producer")?);

    drive(&config, source, sink).await
}

#[cfg(not(feature = "kafka"))]
pub async fn run(_config: PipelineConfig) -> Result<()> {
    anyhow::bail!("this build has no Kafka support; rebuild with `--features kafka`")
}

/// Run the pipeline over a JSON-lines file (`-` for stdin), writing alerts
/// and remediation results to stdout.
pub async fn replay(config: PipelineConfig, input: &Path) -> Result<()> {
    let sink: Arc<dyn RecordSink> = Arc::new(StdoutSink::new());
    if input == Path::new("-") {
        let reader = BufReader::new(tokio::io::stdin());
        return drive(&config, JsonLinesSource::new(reader, "stdin"), sink).await;
    }
    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("cannot open input {}", input.display()))?;
    let source = JsonLinesSource::new(BufReader::new(file), input.display().to_string());
    drive(&config, source, sink).await
}

async fn drive<S: EventSource>(
    config: &PipelineConfig,
    source: S,
    sink: Arc<dyn RecordSink>,
) -> Result<()> {
    let metrics = PipelineMetrics::new();
    let bus = EventBus::default();
    let lookup = build_lookup(&config.remediation).await?;
    let observer = DebugObserver::new(&bus, lookup.is_some()).spawn();

    let mut pipeline = Pipeline::new(config, sink, lookup, metrics.clone(), bus.clone());
    let api = config.api.bind.clone().map(|bind| {
        let state = api::AppState::new(pipeline.status());
        tokio::spawn(async move {
            if let Err(e) = api::serve(&bind, state).await {
                error!(error = %e, "operator API stopped");
            }
        })
    });

    let mut ingestor = Ingestor::new(source, config.kafka.commit_interval(), metrics, bus);
    let outcome = pipeline.run(&mut ingestor, shutdown_signal()).await;
    pipeline.finish().await;

    if let Some(api) = api {
        api.abort();
    }
    drop(ingestor);
    let _ = tokio::time::timeout(Duration::from_secs(1), observer).await;

    outcome.context("event source failed")
}

async fn build_lookup(cfg: &RemediationConfig) -> Result<Option<Arc<dyn RemediationLookup>>> {
    let Some(url) = &cfg.base_url else {
        info!("remediation lookup disabled");
        return Ok(None);
    };
    let client = LookupClient::new(url, cfg.timeout(), cfg.n_results)?;
    if cfg.health_check {
        let health = probe(&client).await;
        if health.healthy {
            info!(
                url = %health.url,
                documents = ?health.stats.as_ref().map(|s| s.total_documents),
                model = ?health.stats.as_ref().and_then(|s| s.llm_model.clone()),
                "remediation lookup service ready"
            );
        } else {
            warn!(url = %health.url, "remediation lookup service not healthy; lookups will be attempted anyway");
        }
    }
    Ok(Some(Arc::new(client)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Result of probing a lookup service.
#[derive(Debug, Clone, Serialize)]
pub struct LookupHealth {
    pub url: String,
    pub healthy: bool,
    pub stats: Option<LookupStats>,
}

async fn probe(client: &LookupClient) -> LookupHealth {
    let healthy = client.health().await;
    let stats = if healthy {
        client.stats().await.ok()
    } else {
        None
    };
    LookupHealth {
        url: client.base_url().to_string(),
        healthy,
        stats,
    }
}

/// Probe `/health` and `/stats` of a lookup service.
pub async fn check_remediation(url: &str, timeout: Duration) -> Result<LookupHealth> {
    let client = LookupClient::new(url, timeout, 5)?;
    Ok(probe(&client).await)
}
