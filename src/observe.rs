//! Typed pipeline event bus and the debug observer that logs it.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::remediation::ResultStatus;
use crate::window::WindowKey;

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    EventIngested {
        seq: u64,
        service: String,
        level: String,
        timestamp: DateTime<Utc>,
    },
    WindowClosed {
        window: WindowKey,
        service: String,
        level: String,
        log_count: u64,
        error_count: u64,
        anomaly_count: u64,
        /// Set when the window did not pass the actionable gate.
        skipped: Option<String>,
    },
    AlertRaised {
        seq: u64,
        alert_id: Uuid,
        service: String,
        level: String,
        log_count: u64,
        error_count: u64,
        anomaly_count: u64,
        is_spike: bool,
    },
    RemediationQueued {
        alert_id: Uuid,
        service: String,
        pending: usize,
    },
    RemediationFinished {
        alert_id: Uuid,
        service: String,
        status: ResultStatus,
        detail: String,
    },
}

/// Fan-out of pipeline events. Emitting with no subscriber is a no-op.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}

/// Logs pipeline activity for operators watching the console.
pub struct DebugObserver {
    rx: broadcast::Receiver<PipelineEvent>,
    remediation_enabled: bool,
}

impl DebugObserver {
    pub fn new(bus: &EventBus, remediation_enabled: bool) -> Self {
        Self {
            rx: bus.subscribe(),
            remediation_enabled,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        loop {
            match self.rx.recv().await {
                Ok(event) => self.log(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "debug observer lagging");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn log(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::EventIngested {
                seq,
                service,
                level,
                timestamp,
            } => {
                if should_sample(*seq) {
                    info!(seq, %service, %level, ts = %timestamp, "event ingested");
                }
            }
            PipelineEvent::WindowClosed {
                window,
                service,
                level,
                log_count,
                error_count,
                anomaly_count,
                skipped,
            } => {
                info!(
                    window_start = %window.start(),
                    log_count,
                    error_count,
                    anomaly_count,
                    %service,
                    %level,
                    "window closed"
                );
                if let Some(reason) = skipped {
                    debug!(%reason, "window not actionable");
                }
            }
            PipelineEvent::AlertRaised {
                seq,
                alert_id,
                service,
                level,
                log_count,
                error_count,
                anomaly_count,
                is_spike,
            } => {
                warn!(
                    seq,
                    %alert_id,
                    %service,
                    %level,
                    log_count,
                    error_count,
                    anomaly_count,
                    is_spike,
                    remediation = self.remediation_enabled,
                    "alert raised"
                );
            }
            PipelineEvent::RemediationQueued {
                alert_id,
                service,
                pending,
            } => {
                info!(%alert_id, %service, pending, "remediation lookup queued");
            }
            PipelineEvent::RemediationFinished {
                alert_id,
                service,
                status,
                detail,
            } => match status {
                ResultStatus::Success => info!(%alert_id, %service, %detail, "remediation ready"),
                ResultStatus::Failed => warn!(%alert_id, %service, %detail, "remediation failed"),
            },
        }
    }
}

/// First five, then every hundredth.
fn should_sample(seq: u64) -> bool {
    seq <= 5 || seq % 100 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_schedule() {
        let sampled: Vec<u64> = (1..=300).filter(|s| should_sample(*s)).collect();
        assert_eq!(sampled, vec![1, 2, 3, 4, 5, 100, 200, 300]);
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(PipelineEvent::RemediationQueued {
            alert_id: Uuid::nil(),
            service: "auth".into(),
            pending: 2,
        });
        match rx.recv().await.unwrap() {
            PipelineEvent::RemediationQueued { pending, .. } => assert_eq!(pending, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new(1);
        bus.emit(PipelineEvent::RemediationQueued {
            alert_id: Uuid::nil(),
            service: "auth".into(),
            pending: 0,
        });
    }
}
