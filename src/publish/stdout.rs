use futures::FutureExt;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{Delivery, DeliveryReceipt, OutboundRecord, RecordSink, SinkError};

/// Writes each record as one JSON line: `{"topic", "key", "record"}`.
pub struct StdoutSink {
    out: Mutex<tokio::io::Stdout>,
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

pub(crate) fn envelope(record: &OutboundRecord) -> Value {
    let body = serde_json::from_slice::<Value>(&record.payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&record.payload).into_owned()));
    json!({
        "topic": record.topic,
        "key": record.key,
        "record": body,
    })
}

#[async_trait::async_trait]
impl RecordSink for StdoutSink {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn enqueue(&self, record: OutboundRecord) -> Result<Delivery, SinkError> {
        let mut line =
            serde_json::to_vec(&envelope(&record)).map_err(|e| SinkError::Terminal(e.to_string()))?;
        line.push(b'\n');

        let mut out = self.out.lock().await;
        out.write_all(&line)
            .await
            .map_err(|e| SinkError::Terminal(e.to_string()))?;
        out.flush()
            .await
            .map_err(|e| SinkError::Terminal(e.to_string()))?;

        let receipt = DeliveryReceipt {
            topic: record.topic,
            partition: None,
            offset: None,
        };
        Ok(futures::future::ready(Ok(receipt)).boxed())
    }
}
