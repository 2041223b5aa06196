use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{LookupError, RemediationLookup, RemediationQuery, RemediationResult, ResultStatus};
use crate::detect::{Alert, AlertRecord};
use crate::metrics::PipelineMetrics;
use crate::observe::{EventBus, PipelineEvent};
use crate::publish::RecordPublisher;

/// What `dispatch` does when a bounded queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Publish a `QueueFull` failure record and move on.
    #[default]
    Reject,
    /// Wait for queue space. This pushes back on the streaming path.
    Block,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub pool_size: usize,
    pub lookup_timeout: Duration,
    /// `None` leaves the queue unbounded.
    pub queue_capacity: Option<usize>,
    pub overflow: OverflowPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            pool_size: 1,
            lookup_timeout: Duration::from_secs(120),
            queue_capacity: None,
            overflow: OverflowPolicy::Reject,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchAck {
    pub alert_id: Uuid,
    pub queued: bool,
    /// Queued plus running lookups right after this submission.
    pub pending: usize,
}

struct Job {
    alert: AlertRecord,
    query: RemediationQuery,
}

#[derive(Clone)]
enum JobSender {
    Unbounded(mpsc::UnboundedSender<Job>),
    Bounded(mpsc::Sender<Job>),
}

enum JobReceiver {
    Unbounded(mpsc::UnboundedReceiver<Job>),
    Bounded(mpsc::Receiver<Job>),
}

impl JobReceiver {
    async fn recv(&mut self) -> Option<Job> {
        match self {
            JobReceiver::Unbounded(rx) => rx.recv().await,
            JobReceiver::Bounded(rx) => rx.recv().await,
        }
    }

    fn try_recv(&mut self) -> Option<Job> {
        match self {
            JobReceiver::Unbounded(rx) => rx.try_recv().ok(),
            JobReceiver::Bounded(rx) => rx.try_recv().ok(),
        }
    }
}

/// State shared between the dispatcher handle and its workers.
struct Shared {
    lookup: Arc<dyn RemediationLookup>,
    publisher: RecordPublisher,
    metrics: Arc<PipelineMetrics>,
    bus: EventBus,
    permits: Arc<Semaphore>,
    submitted: AtomicU64,
    started: AtomicU64,
    /// Alert each worker has taken off the queue and not yet reported on.
    active: Mutex<Vec<Option<AlertRecord>>>,
    lookup_timeout: Duration,
}

/// Fixed-size worker pool for remediation lookups.
///
/// `dispatch` only enqueues. Each worker holds one semaphore permit while a
/// lookup runs, so the in-flight count is read off the semaphore and can never
/// exceed `pool_size`.
pub struct Dispatcher {
    tx: Mutex<Option<JobSender>>,
    rx: Arc<tokio::sync::Mutex<JobReceiver>>,
    shared: Arc<Shared>,
    pool_size: usize,
    overflow: OverflowPolicy,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn spawn(
        config: DispatcherConfig,
        lookup: Arc<dyn RemediationLookup>,
        publisher: RecordPublisher,
        metrics: Arc<PipelineMetrics>,
        bus: EventBus,
    ) -> Self {
        let pool_size = config.pool_size.max(1);
        let (tx, rx) = match config.queue_capacity {
            Some(cap) => {
                let (tx, rx) = mpsc::channel(cap.max(1));
                (JobSender::Bounded(tx), JobReceiver::Bounded(rx))
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (JobSender::Unbounded(tx), JobReceiver::Unbounded(rx))
            }
        };

        let shared = Arc::new(Shared {
            lookup,
            publisher,
            metrics,
            bus,
            permits: Arc::new(Semaphore::new(pool_size)),
            submitted: AtomicU64::new(0),
            started: AtomicU64::new(0),
            active: Mutex::new(vec![None; pool_size]),
            lookup_timeout: config.lookup_timeout,
        });

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let workers = (0..pool_size)
            .map(|id| tokio::spawn(worker(id, rx.clone(), shared.clone())))
            .collect();

        info!(
            pool_size,
            queue_capacity = ?config.queue_capacity,
            overflow = ?config.overflow,
            "remediation dispatcher started"
        );

        Self {
            tx: Mutex::new(Some(tx)),
            rx,
            shared,
            pool_size,
            overflow: config.overflow,
            workers: Mutex::new(workers),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Lookups currently running.
    pub fn in_flight(&self) -> usize {
        self.pool_size
            .saturating_sub(self.shared.permits.available_permits())
    }

    /// Lookups accepted but not yet started.
    pub fn queued(&self) -> usize {
        let submitted = self.shared.submitted.load(Ordering::SeqCst);
        let started = self.shared.started.load(Ordering::SeqCst);
        submitted.saturating_sub(started) as usize
    }

    pub fn pending(&self) -> usize {
        self.queued() + self.in_flight()
    }

    /// Queue a lookup for `alert` and return without waiting for it.
    pub async fn dispatch(&self, alert: &Alert) -> DispatchAck {
        let record = alert.record();
        let job = Job {
            query: RemediationQuery::from_alert(alert),
            alert: record.clone(),
        };

        let tx = self.tx.lock().ok().and_then(|guard| guard.as_ref().cloned());
        // Counted before the send so a fast worker never sees started > submitted.
        self.shared.submitted.fetch_add(1, Ordering::SeqCst);
        let sent = match tx {
            None => Err(LookupError::QueueFull),
            Some(JobSender::Unbounded(tx)) => tx.send(job).map_err(|_| LookupError::QueueFull),
            Some(JobSender::Bounded(tx)) => match self.overflow {
                OverflowPolicy::Block => tx.send(job).await.map_err(|_| LookupError::QueueFull),
                OverflowPolicy::Reject => tx.try_send(job).map_err(|_| LookupError::QueueFull),
            },
        };

        if let Err(err) = sent {
            self.shared.submitted.fetch_sub(1, Ordering::SeqCst);
            self.reject(record, err).await;
            return DispatchAck {
                alert_id: alert.id,
                queued: false,
                pending: self.pending(),
            };
        }

        self.shared.metrics.inc_remediation_submitted();
        let pending = self.pending();
        self.shared.bus.emit(PipelineEvent::RemediationQueued {
            alert_id: alert.id,
            service: alert.service.clone(),
            pending,
        });
        DispatchAck {
            alert_id: alert.id,
            queued: true,
            pending,
        }
    }

    async fn reject(&self, record: AlertRecord, err: LookupError) {
        self.shared.metrics.inc_remediation_rejected();
        warn!(alert_id = %record.alert_id, service = %record.service, "remediation queue full, lookup rejected");
        report_failure(&self.shared, record, &err).await;
    }

    /// Stop accepting work and let the workers drain the queue.
    ///
    /// Workers still busy after `grace` are aborted. The lookups they were
    /// running and anything left in the queue are published as
    /// `ShutdownTimeout` failures.
    pub async fn shutdown(&self, grace: Duration) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        let workers = match self.workers.lock() {
            Ok(mut w) => std::mem::take(&mut *w),
            Err(_) => return,
        };
        let pending = self.pending();
        if pending > 0 {
            info!(pending, "draining remediation queue");
        }

        let deadline = tokio::time::Instant::now().checked_add(grace);
        let mut aborted = Vec::new();
        for mut handle in workers {
            let finished = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, &mut handle).await.is_ok(),
                None => {
                    let _ = (&mut handle).await;
                    true
                }
            };
            if !finished {
                handle.abort();
                aborted.push(handle);
            }
        }

        if !aborted.is_empty() {
            warn!(workers = aborted.len(), "remediation workers did not finish in time, aborting");
            for handle in aborted {
                let _ = handle.await;
            }
            self.abandon_leftovers(grace).await;
        }
        debug!("remediation dispatcher stopped");
    }

    async fn abandon_leftovers(&self, grace: Duration) {
        let mut leftovers: Vec<AlertRecord> = match self.shared.active.lock() {
            Ok(mut slots) => slots.iter_mut().filter_map(Option::take).collect(),
            Err(_) => Vec::new(),
        };
        {
            let mut rx = self.rx.lock().await;
            while let Some(job) = rx.try_recv() {
                self.shared.started.fetch_add(1, Ordering::SeqCst);
                leftovers.push(job.alert);
            }
        }

        let err = LookupError::ShutdownTimeout(grace);
        for record in leftovers {
            self.shared.metrics.inc_remediation_abandoned();
            warn!(alert_id = %record.alert_id, service = %record.service, "remediation lookup abandoned at shutdown");
            report_failure(&self.shared, record, &err).await;
        }
    }
}

fn set_active(shared: &Shared, worker: usize, alert: Option<AlertRecord>) {
    if let Ok(mut slots) = shared.active.lock() {
        if let Some(slot) = slots.get_mut(worker) {
            *slot = alert;
        }
    }
}

async fn report_failure(shared: &Shared, record: AlertRecord, err: &LookupError) {
    let result = RemediationResult::failure(record, err);
    shared.bus.emit(PipelineEvent::RemediationFinished {
        alert_id: result.original_alert.alert_id,
        service: result.service().to_string(),
        status: ResultStatus::Failed,
        detail: result.detail(),
    });
    shared
        .publisher
        .publish(Some(result.service()), &result)
        .await;
}

async fn worker(
    id: usize,
    rx: Arc<tokio::sync::Mutex<JobReceiver>>,
    shared: Arc<Shared>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };
        set_active(&shared, id, Some(job.alert.clone()));
        shared.started.fetch_add(1, Ordering::SeqCst);

        let Ok(permit) = shared.permits.clone().acquire_owned().await else {
            break;
        };
        run_job(id, job, &shared).await;
        drop(permit);
    }
    debug!(worker = id, "remediation worker exiting");
}

async fn run_job(worker: usize, job: Job, shared: &Shared) {
    let Job { alert, query } = job;
    let service = alert.service.clone();
    let alert_id = alert.alert_id;
    debug!(worker, %alert_id, %service, query = %query, "remediation lookup started");

    let started = Instant::now();
    let outcome = match tokio::time::timeout(shared.lookup_timeout, shared.lookup.lookup(query.as_str())).await {
        Ok(r) => r,
        Err(_) => Err(LookupError::Timeout(shared.lookup_timeout)),
    };
    shared.metrics.record_lookup_latency(started);
    set_active(shared, worker, None);

    let result = match outcome {
        Ok(answer) => {
            shared.metrics.inc_remediation_completed();
            RemediationResult::success(alert, query.into_string(), answer)
        }
        Err(e) => {
            shared.metrics.inc_remediation_failed();
            warn!(worker, %alert_id, %service, error = %e, "remediation lookup failed");
            RemediationResult::failure(alert, &e)
        }
    };

    shared.bus.emit(PipelineEvent::RemediationFinished {
        alert_id,
        service: service.clone(),
        status: result.status,
        detail: result.detail(),
    });
    shared.publisher.publish(Some(&service), &result).await;
}
