use std::time::Duration;

use futures::FutureExt;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tracing::info;

use super::{Delivery, DeliveryReceipt, OutboundRecord, RecordSink, SinkError};

/// Producer-backed sink. Delivery confirmation comes from the broker ack.
pub struct KafkaSink {
    producer: FutureProducer,
}

impl KafkaSink {
    pub fn new(config: &ClientConfig) -> Result<Self, SinkError> {
        let producer: FutureProducer = config
            .create()
            .map_err(|e| SinkError::Terminal(format!("producer create: {e}")))?;
        info!("kafka producer created");
        Ok(Self { producer })
    }
}

#[async_trait::async_trait]
impl RecordSink for KafkaSink {
    fn name(&self) -> &str {
        "kafka"
    }

    async fn enqueue(&self, record: OutboundRecord) -> Result<Delivery, SinkError> {
        let sent = {
            let mut fr = FutureRecord::<str, [u8]>::to(&record.topic).payload(&record.payload);
            if let Some(key) = record.key.as_deref() {
                fr = fr.key(key);
            }
            self.producer.send_result(fr).map_err(|(e, _)| e)
        };

        let future = match sent {
            Ok(f) => f,
            Err(KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull)) => {
                return Err(SinkError::BufferFull(record))
            }
            Err(e) => return Err(SinkError::Terminal(e.to_string())),
        };

        let topic = record.topic;
        Ok(async move {
            match future.await {
                Ok(Ok((partition, offset))) => Ok(DeliveryReceipt {
                    topic,
                    partition: Some(partition),
                    offset: Some(offset),
                }),
                Ok(Err((e, _))) => Err(SinkError::Delivery(e.to_string())),
                Err(_) => Err(SinkError::Delivery("delivery canceled".into())),
            }
        }
        .boxed())
    }

    async fn flush(&self, timeout: Duration) -> Result<(), SinkError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| SinkError::Terminal(e.to_string()))?
            .map_err(|e| SinkError::Delivery(e.to_string()))
    }
}
