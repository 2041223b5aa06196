//! Ingestion: pull raw records from a source, decode them into events.
//!
//! Malformed records are dropped and counted. Progress is committed in
//! batches on a fixed interval, so a restart may redeliver up to one
//! interval's worth of records (at-least-once).

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod lines;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::event::{DecodeError, RawEvent};
use crate::metrics::PipelineMetrics;
use crate::observe::{EventBus, PipelineEvent};

pub use self::lines::JsonLinesSource;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Source unreachable. Fatal at startup.
    #[error("source unreachable: {0}")]
    Connection(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),

    /// Receive error after startup; the caller may keep reading.
    #[error("receive failed: {0}")]
    Transient(String),

    #[error("offset commit failed: {0}")]
    Commit(String),
}

/// One undecoded record and where it came from.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub payload: Vec<u8>,
    pub position: String,
}

#[async_trait]
pub trait EventSource: Send {
    /// `Ok(None)` once the source is exhausted.
    async fn next_record(&mut self) -> Result<Option<SourceRecord>, IngestError>;

    /// Mark every record returned so far as processed.
    async fn commit(&mut self) -> Result<(), IngestError>;

    fn describe(&self) -> String;
}

/// Decoding front end over an [`EventSource`].
pub struct Ingestor<S> {
    source: S,
    metrics: Arc<PipelineMetrics>,
    bus: EventBus,
    commit_interval: Duration,
    last_commit: Instant,
    uncommitted: u64,
    seq: u64,
}

impl<S: EventSource> Ingestor<S> {
    pub fn new(
        source: S,
        commit_interval: Duration,
        metrics: Arc<PipelineMetrics>,
        bus: EventBus,
    ) -> Self {
        Self {
            source,
            metrics,
            bus,
            commit_interval,
            last_commit: Instant::now(),
            uncommitted: 0,
            seq: 0,
        }
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }

    /// Next well-formed event, or `Ok(None)` at end of input.
    ///
    /// Only connection-level failures are returned; bad records are skipped.
    /// Cancel safe as long as the source's `next_record` is.
    pub async fn next_event(&mut self) -> Result<Option<RawEvent>, IngestError> {
        loop {
            self.commit_if_due().await;

            let record = match self.source.next_record().await {
                Ok(Some(r)) => r,
                Ok(None) => return Ok(None),
                Err(IngestError::Transient(e)) => {
                    warn!(error = %e, "receive failed, retrying");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.uncommitted += 1;

            match RawEvent::from_slice(&record.payload) {
                Ok(event) => {
                    self.metrics.inc_events_consumed();
                    self.seq += 1;
                    self.bus.emit(PipelineEvent::EventIngested {
                        seq: self.seq,
                        service: event.service.clone(),
                        level: event.level.to_string(),
                        timestamp: event.timestamp,
                    });
                    return Ok(Some(event));
                }
                Err(e) => {
                    self.metrics.inc_events_malformed();
                    warn!(position = %record.position, error = %e, "dropping malformed record");
                }
            }
        }
    }

    /// Commit when the interval has elapsed and there is progress to record.
    pub async fn commit_if_due(&mut self) {
        if self.uncommitted > 0 && self.last_commit.elapsed() >= self.commit_interval {
            self.commit().await;
        }
    }

    /// Commit now. Failures are counted and logged, never fatal.
    pub async fn commit(&mut self) {
        self.last_commit = Instant::now();
        if self.uncommitted == 0 {
            return;
        }
        match self.source.commit().await {
            Ok(()) => {
                self.metrics.inc_offset_commits();
                debug!(records = self.uncommitted, "offsets committed");
                self.uncommitted = 0;
            }
            Err(e) => {
                self.metrics.inc_offset_commit_failed();
                warn!(error = %e, "offset commit failed");
            }
        }
    }
}
