//! Output side: record sinks and the publisher that feeds them.

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod publisher;
pub mod stdout;

pub use self::memory::MemorySink;
pub use self::publisher::{DeliveryHandle, PublishKind, PublishOutcome, RecordPublisher};
pub use self::stdout::StdoutSink;

use futures::future::BoxFuture;
use thiserror::Error;

/// A serialized record addressed to an output topic.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// Broker acknowledgement for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReceipt {
    pub topic: String,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
}

#[derive(Debug, Error)]
pub enum SinkError {
    /// Transient: the record is handed back so it can be retried.
    #[error("producer buffer full for topic {}", .0.topic)]
    BufferFull(OutboundRecord),

    #[error("publish failed: {0}")]
    Terminal(String),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("buffer still full after retry on {topic}")]
    BufferFull { topic: String },

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("delivery task aborted")]
    Aborted,
}

/// Future resolving once the broker confirms (or refuses) a record.
pub type Delivery = BoxFuture<'static, Result<DeliveryReceipt, SinkError>>;

/// Something that accepts records for an output queue.
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    fn name(&self) -> &str;

    /// Hand a record to the producer. Returns without waiting for the broker.
    async fn enqueue(&self, record: OutboundRecord) -> Result<Delivery, SinkError>;

    /// Wait for buffered records to leave the process.
    async fn flush(&self, _timeout: std::time::Duration) -> Result<(), SinkError> {
        Ok(())
    }
}
