use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{Message, Offset, TopicPartitionList};
use tracing::info;

use super::{EventSource, IngestError, SourceRecord};

/// Consumer-group source over one topic.
///
/// Auto-commit is off; the highest offset handed downstream per partition is
/// committed when the ingestor asks.
pub struct KafkaSource {
    consumer: StreamConsumer,
    topic: String,
    group_id: String,
    pending: BTreeMap<i32, i64>,
}

impl KafkaSource {
    /// Create the consumer, check the brokers answer and subscribe.
    pub fn connect(
        config: &ClientConfig,
        topic: &str,
        metadata_timeout: Duration,
    ) -> Result<Self, IngestError> {
        let group_id = config.get("group.id").unwrap_or_default().to_string();
        let consumer: StreamConsumer = config
            .create()
            .map_err(|e| IngestError::Connection(format!("consumer create: {e}")))?;

        let metadata = consumer
            .fetch_metadata(Some(topic), metadata_timeout)
            .map_err(|e| IngestError::Connection(e.to_string()))?;
        let partitions = metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic)
            .map(|t| t.partitions().len())
            .unwrap_or(0);

        consumer
            .subscribe(&[topic])
            .map_err(|e| IngestError::Connection(format!("subscribe {topic}: {e}")))?;
        info!(%topic, %group_id, partitions, "kafka consumer subscribed");

        Ok(Self {
            consumer,
            topic: topic.to_string(),
            group_id,
            pending: BTreeMap::new(),
        })
    }
}

#[async_trait]
impl EventSource for KafkaSource {
    async fn next_record(&mut self) -> Result<Option<SourceRecord>, IngestError> {
        let msg = self
            .consumer
            .recv()
            .await
            .map_err(|e| IngestError::Transient(e.to_string()))?;

        let partition = msg.partition();
        let offset = msg.offset();
        let payload = msg.payload().map(<[u8]>::to_vec).unwrap_or_default();
        self.pending.insert(partition, offset);

        Ok(Some(SourceRecord {
            payload,
            position: format!("{}/{partition}@{offset}", msg.topic()),
        }))
    }

    async fn commit(&mut self) -> Result<(), IngestError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut tpl = TopicPartitionList::new();
        for (&partition, &offset) in &self.pending {
            tpl.add_partition_offset(&self.topic, partition, Offset::Offset(offset + 1))
                .map_err(|e| IngestError::Commit(e.to_string()))?;
        }
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| IngestError::Commit(e.to_string()))?;
        self.pending.clear();
        Ok(())
    }

    fn describe(&self) -> String {
        format!("kafka topic {} (group {})", self.topic, self.group_id)
    }
}
