use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::{DeliveryReceipt, OutboundRecord, PublishError, RecordSink, SinkError};
use crate::metrics::PipelineMetrics;

/// Which counters a publisher reports into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishKind {
    Alert,
    RemediationResult,
}

impl PublishKind {
    fn published(self, m: &PipelineMetrics) {
        match self {
            PublishKind::Alert => m.inc_alerts_published(),
            PublishKind::RemediationResult => m.inc_results_published(),
        }
    }

    fn failed(self, m: &PipelineMetrics) {
        match self {
            PublishKind::Alert => m.inc_alerts_publish_failed(),
            PublishKind::RemediationResult => m.inc_results_publish_failed(),
        }
    }
}

/// Delivery confirmation, observed off the publishing path.
pub struct DeliveryHandle(JoinHandle<Result<DeliveryReceipt, PublishError>>);

impl DeliveryHandle {
    pub async fn confirmed(self) -> Result<DeliveryReceipt, PublishError> {
        self.0.await.unwrap_or(Err(PublishError::Aborted))
    }
}

pub enum PublishOutcome {
    Enqueued(DeliveryHandle),
    Dropped(PublishError),
}

impl PublishOutcome {
    pub fn is_enqueued(&self) -> bool {
        matches!(self, PublishOutcome::Enqueued(_))
    }
}

/// Serializes values and publishes them to one topic.
///
/// A full producer buffer is retried once after a short pause. Anything that
/// still fails is logged, counted and dropped; publishing never fails the caller.
#[derive(Clone)]
pub struct RecordPublisher {
    sink: Arc<dyn RecordSink>,
    topic: String,
    retry_backoff: Duration,
    kind: PublishKind,
    metrics: Arc<PipelineMetrics>,
}

impl RecordPublisher {
    pub fn new(
        sink: Arc<dyn RecordSink>,
        topic: impl Into<String>,
        kind: PublishKind,
        retry_backoff: Duration,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            sink,
            topic: topic.into(),
            retry_backoff,
            kind,
            metrics,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn publish<T: Serialize>(&self, key: Option<&str>, value: &T) -> PublishOutcome {
        let payload = match serde_json::to_vec(value) {
            Ok(p) => p,
            Err(e) => return self.drop_with(PublishError::from(e)),
        };
        let record = OutboundRecord {
            topic: self.topic.clone(),
            key: key.map(str::to_string),
            payload,
        };

        let delivery = match self.sink.enqueue(record).await {
            Ok(d) => d,
            Err(SinkError::BufferFull(record)) => {
                self.metrics.inc_publish_retried();
                debug!(topic = %self.topic, backoff_ms = self.retry_backoff.as_millis() as u64, "buffer full, retrying once");
                tokio::time::sleep(self.retry_backoff).await;
                match self.sink.enqueue(record).await {
                    Ok(d) => d,
                    Err(SinkError::BufferFull(_)) => {
                        return self.drop_with(PublishError::BufferFull {
                            topic: self.topic.clone(),
                        })
                    }
                    Err(e) => return self.drop_with(e.into()),
                }
            }
            Err(e) => return self.drop_with(e.into()),
        };

        let metrics = self.metrics.clone();
        let kind = self.kind;
        let topic = self.topic.clone();
        let handle = tokio::spawn(async move {
            match delivery.await {
                Ok(receipt) => {
                    kind.published(&metrics);
                    debug!(%topic, partition = ?receipt.partition, offset = ?receipt.offset, "delivered");
                    Ok(receipt)
                }
                Err(e) => {
                    kind.failed(&metrics);
                    warn!(%topic, error = %e, "delivery failed");
                    Err(PublishError::from(e))
                }
            }
        });

        PublishOutcome::Enqueued(DeliveryHandle(handle))
    }

    fn drop_with(&self, err: PublishError) -> PublishOutcome {
        self.kind.failed(&self.metrics);
        error!(topic = %self.topic, sink = self.sink.name(), error = %err, "publish dropped");
        PublishOutcome::Dropped(err)
    }
}
