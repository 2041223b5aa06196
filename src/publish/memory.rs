use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;

use super::{Delivery, DeliveryReceipt, OutboundRecord, RecordSink, SinkError};

/// In-process sink. Records are kept in order of acceptance.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<OutboundRecord>>>,
    capacity: Option<usize>,
    full_rejections: Arc<AtomicUsize>,
    unreachable: Arc<AtomicBool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse records with `BufferFull` once `capacity` records are held.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Answer the next `n` enqueue attempts with `BufferFull`.
    pub fn reject_next_as_full(&self, n: usize) {
        self.full_rejections.store(n, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<OutboundRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Take every held record, freeing capacity.
    pub fn drain(&self) -> Vec<OutboundRecord> {
        self.records
            .lock()
            .map(|mut r| std::mem::take(&mut *r))
            .unwrap_or_default()
    }

    /// Held payloads decoded as JSON, for assertions.
    pub fn json_values(&self) -> Vec<serde_json::Value> {
        self.records()
            .iter()
            .filter_map(|r| serde_json::from_slice(&r.payload).ok())
            .collect()
    }

    fn take_rejection(&self) -> bool {
        self.full_rejections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl RecordSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn enqueue(&self, record: OutboundRecord) -> Result<Delivery, SinkError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SinkError::Terminal("broker unreachable".into()));
        }
        if self.take_rejection() {
            return Err(SinkError::BufferFull(record));
        }

        let mut records = self
            .records
            .lock()
            .map_err(|_| SinkError::Terminal("sink poisoned".into()))?;
        if self.capacity.is_some_and(|cap| records.len() >= cap) {
            drop(records);
            return Err(SinkError::BufferFull(record));
        }

        let receipt = DeliveryReceipt {
            topic: record.topic.clone(),
            partition: Some(0),
            offset: Some(records.len() as i64),
        };
        records.push(record);
        Ok(futures::future::ready(Ok(receipt)).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(n: u8) -> OutboundRecord {
        OutboundRecord {
            topic: "t".into(),
            key: None,
            payload: vec![n],
        }
    }

    #[tokio::test]
    async fn capacity_triggers_buffer_full() {
        let sink = MemorySink::with_capacity(1);
        assert!(sink.enqueue(rec(1)).await.is_ok());
        match sink.enqueue(rec(2)).await {
            Err(SinkError::BufferFull(r)) => assert_eq!(r.payload, vec![2]),
            _ => panic!("expected BufferFull"),
        }
        sink.drain();
        assert!(sink.enqueue(rec(3)).await.is_ok());
    }

    #[tokio::test]
    async fn offsets_follow_acceptance_order() {
        let sink = MemorySink::new();
        let d0 = sink.enqueue(rec(0)).await.unwrap().await.unwrap();
        let d1 = sink.enqueue(rec(1)).await.unwrap().await.unwrap();
        assert_eq!((d0.offset, d1.offset), (Some(0), Some(1)));
    }
}
