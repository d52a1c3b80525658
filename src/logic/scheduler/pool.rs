//! Worker pool
//!
//! Fixed set of tokio worker tasks draining one bounded queue. Each attempt runs
//! on the blocking pool under a latency budget, so a hung native call costs
//! only its own item. Results travel back over a oneshot per item.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::governor::{Governor, PressureLevel};
use super::metrics::{MetricsSnapshot, SchedulerMetrics};
use super::state::{WorkEvent, WorkLifecycle, WorkState};
use crate::logic::analyzer::ImageAnalyzer;
use crate::logic::config::{ConfigStore, RuntimeConfig};
use crate::logic::decoder::ImageBuffer;
use crate::logic::error::{AnalyzerError, AnalyzerResult};
use crate::logic::types::{AnalysisMode, AnalysisResult};

type Responder = oneshot::Sender<AnalyzerResult<AnalysisResult>>;

struct WorkItem {
    id: Uuid,
    payload: ImageBuffer,
    mode: AnalysisMode,
    responder: Responder,
}

/// Caller side of one admitted item
#[derive(Debug)]
pub struct WorkHandle {
    id: Uuid,
    mode: AnalysisMode,
    rx: oneshot::Receiver<AnalyzerResult<AnalysisResult>>,
}

impl WorkHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Mode chosen at admission
    pub fn mode(&self) -> AnalysisMode {
        self.mode
    }

    pub async fn wait(self) -> AnalyzerResult<AnalysisResult> {
        self.rx.await.unwrap_or(Err(AnalyzerError::ShutDown))
    }
}

struct Shared {
    analyzer: Arc<dyn ImageAnalyzer>,
    config: Arc<ConfigStore>,
    queue: Mutex<VecDeque<WorkItem>>,
    in_flight: Mutex<HashSet<Uuid>>,
    cancelled: Mutex<HashSet<Uuid>>,
    governor: Mutex<Governor>,
    notify: Notify,
    metrics: SchedulerMetrics,
    shutting_down: AtomicBool,
}

pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(analyzer: Arc<dyn ImageAnalyzer>, config: Arc<ConfigStore>) -> Self {
        Self {
            shared: Arc::new(Shared {
                analyzer,
                config,
                queue: Mutex::new(VecDeque::new()),
                in_flight: Mutex::new(HashSet::new()),
                cancelled: Mutex::new(HashSet::new()),
                governor: Mutex::new(Governor::new()),
                notify: Notify::new(),
                metrics: SchedulerMetrics::default(),
                shutting_down: AtomicBool::new(false),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `maxWorkers` workers. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        let count = self.shared.config.snapshot().scheduler.max_workers;
        for index in 0..count {
            let shared = Arc::clone(&self.shared);
            workers.push(tokio::spawn(worker_loop(shared, index)));
        }
        log::info!("Scheduler started with {} workers", count);
    }

    /// Stop admitting; workers finish what is queued, then exit
    pub async fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                log::error!("Worker task ended abnormally: {}", e);
            }
        }

        // Nothing left to run them (never started)
        let orphaned: Vec<WorkItem> = self.shared.queue.lock().drain(..).collect();
        for item in orphaned {
            let _ = item.responder.send(Err(AnalyzerError::ShutDown));
        }
        log::info!("Scheduler shut down");
    }

    /// Admit one payload. Never blocks: at the hard limit the caller gets
    /// `QueueRejected` straight away.
    pub fn submit(&self, payload: ImageBuffer) -> AnalyzerResult<WorkHandle> {
        if self.shared.shutting_down.load(Ordering::SeqCst) {
            return Err(AnalyzerError::ShutDown);
        }
        let config = self.shared.config.snapshot();
        let settings = &config.scheduler;

        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();

        let mode = {
            let mut queue = self.shared.queue.lock();
            let depth = queue.len();
            if depth >= settings.queue_hard_limit {
                SchedulerMetrics::incr(&self.shared.metrics.rejected);
                log::warn!(
                    "Queue rejected item: depth {} at hard limit {}",
                    depth,
                    settings.queue_hard_limit
                );
                return Err(AnalyzerError::QueueRejected {
                    depth,
                    limit: settings.queue_hard_limit,
                });
            }

            let mode = self.shared.governor.lock().admit(
                depth,
                settings.queue_soft_limit,
                settings.pressure_cooldown(),
                Instant::now(),
            );
            queue.push_back(WorkItem { id, payload, mode, responder: tx });
            mode
        };

        SchedulerMetrics::incr(&self.shared.metrics.submitted);
        if mode == AnalysisMode::Fast {
            SchedulerMetrics::incr(&self.shared.metrics.fast_mode_admissions);
        }
        self.shared.notify.notify_one();

        Ok(WorkHandle { id, mode, rx })
    }

    /// Submit and wait
    pub async fn analyze(&self, payload: ImageBuffer) -> AnalyzerResult<AnalysisResult> {
        self.submit(payload)?.wait().await
    }

    /// Bulk import. Admitted `maxBatchSize` at a time, each chunk awaited before
    /// the next is queued. Results come back in input order, one per payload.
    pub async fn run_batch(&self, payloads: Vec<ImageBuffer>) -> Vec<AnalyzerResult<AnalysisResult>> {
        let chunk_size = self.shared.config.snapshot().scheduler.max_batch_size.max(1);
        let mut results = Vec::with_capacity(payloads.len());
        let mut pending = payloads.into_iter().peekable();

        while pending.peek().is_some() {
            let admitted: Vec<AnalyzerResult<WorkHandle>> = pending
                .by_ref()
                .take(chunk_size)
                .map(|payload| self.submit(payload))
                .collect();

            for handle in admitted {
                results.push(match handle {
                    Ok(handle) => handle.wait().await,
                    Err(e) => Err(e),
                });
            }
        }

        let failed = results.iter().filter(|r| r.is_err()).count();
        log::info!("Batch finished: {} items, {} failed", results.len(), failed);
        results
    }

    /// Cancel an item. A queued item is dropped immediately; an item between
    /// attempts is stopped before its next retry. Returns false for unknown
    /// or finished items.
    pub fn cancel(&self, id: Uuid) -> bool {
        let removed = {
            let mut queue = self.shared.queue.lock();
            match queue.iter().position(|item| item.id == id) {
                Some(pos) => queue.remove(pos),
                None => {
                    // Held across the insert so `finish` cannot slip in between
                    let in_flight = self.shared.in_flight.lock();
                    if in_flight.contains(&id) {
                        self.shared.cancelled.lock().insert(id);
                        return true;
                    }
                    return false;
                }
            }
        };

        if let Some(item) = removed {
            SchedulerMetrics::incr(&self.shared.metrics.cancelled);
            log::debug!("Work item {} cancelled while queued", id);
            let _ = item.responder.send(Err(AnalyzerError::Cancelled(id)));
        }
        true
    }

    pub fn queue_depth(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Cancellation requests still waiting for a running item to notice them
    pub fn pending_cancellations(&self) -> usize {
        self.shared.cancelled.lock().len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let depth = self.queue_depth();
        let workers = self.workers.lock().len();
        let pressure = PressureLevel::from(self.shared.governor.lock().state());
        self.shared.metrics.snapshot(depth, workers, pressure)
    }
}

// ============================================================================
// WORKER
// ============================================================================

impl Shared {
    fn pop(&self) -> Option<(WorkItem, usize)> {
        let mut queue = self.queue.lock();
        let item = queue.pop_front()?;
        self.in_flight.lock().insert(item.id);
        Some((item, queue.len()))
    }

    fn take_cancelled(&self, id: Uuid) -> bool {
        self.cancelled.lock().remove(&id)
    }

    /// Lock order: queue, in_flight, cancelled
    fn finish(&self, id: Uuid) {
        let mut in_flight = self.in_flight.lock();
        in_flight.remove(&id);
        self.cancelled.lock().remove(&id);
    }

    async fn run_attempt(
        &self,
        payload: Arc<ImageBuffer>,
        mode: AnalysisMode,
        config: Arc<RuntimeConfig>,
    ) -> AnalyzerResult<AnalysisResult> {
        let analyzer = Arc::clone(&self.analyzer);
        let budget = config.scheduler.attempt_timeout();
        let task = tokio::task::spawn_blocking(move || analyzer.analyze(&payload, mode, &config));

        match tokio::time::timeout(budget, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(AnalyzerError::Inference(format!("analysis task aborted: {}", e))),
            Err(_) => {
                SchedulerMetrics::incr(&self.metrics.timed_out);
                Err(AnalyzerError::Timeout(budget.as_millis() as u64))
            }
        }
    }

    async fn process(&self, item: WorkItem) {
        let WorkItem { id, payload, mode, responder } = item;
        let payload = Arc::new(payload);
        let mut lifecycle = WorkLifecycle::new(self.config.snapshot().scheduler.max_retries);

        let outcome = loop {
            if self.take_cancelled(id) {
                let _ = lifecycle.apply(WorkEvent::Cancel);
                break Err(AnalyzerError::Cancelled(id));
            }
            if let Err(e) = lifecycle.apply(WorkEvent::Start) {
                log::error!("Work item {}: {}", id, e);
                break Err(AnalyzerError::Cancelled(id));
            }

            // Thresholds are read through on every attempt
            let config = self.config.snapshot();
            self.metrics.active.fetch_add(1, Ordering::Relaxed);
            let attempt = self.run_attempt(Arc::clone(&payload), mode, Arc::clone(&config)).await;
            self.metrics.active.fetch_sub(1, Ordering::Relaxed);

            let error = match attempt {
                Ok(result) => {
                    let _ = lifecycle.apply(WorkEvent::Succeed);
                    break Ok(result);
                }
                Err(e) => e,
            };

            let next = lifecycle
                .apply(WorkEvent::Fail { retryable: error.is_retryable() })
                .unwrap_or(WorkState::Failed);
            if next != WorkState::Retrying {
                break Err(error);
            }

            let delay = config.scheduler.backoff_delay(lifecycle.attempts());
            SchedulerMetrics::incr(&self.metrics.retried);
            log::debug!(
                "Work item {} attempt {} failed ({}), retrying in {:?}",
                id,
                lifecycle.attempts(),
                error,
                delay
            );
            tokio::time::sleep(delay).await;
        };

        match (&outcome, lifecycle.state()) {
            (Ok(_), _) => SchedulerMetrics::incr(&self.metrics.completed),
            (Err(_), WorkState::Cancelled) => {
                log::debug!("Work item {} cancelled before retry", id);
                SchedulerMetrics::incr(&self.metrics.cancelled);
            }
            (Err(e), _) => {
                log::warn!(
                    "Work item {} failed after {} attempt(s): {}",
                    id,
                    lifecycle.attempts(),
                    e
                );
                SchedulerMetrics::incr(&self.metrics.failed);
            }
        }

        self.finish(id);
        let _ = responder.send(outcome);
    }
}

async fn worker_loop(shared: Arc<Shared>, index: usize) {
    log::debug!("Worker {} started", index);
    loop {
        let notified = shared.notify.notified();
        tokio::pin!(notified);
        // Register before checking the queue so a wake-up in between is not lost
        notified.as_mut().enable();

        if let Some((item, depth)) = shared.pop() {
            let config = shared.config.snapshot();
            shared.governor.lock().observe(
                depth,
                config.scheduler.queue_soft_limit,
                config.scheduler.pressure_cooldown(),
                Instant::now(),
            );
            shared.process(item).await;
            continue;
        }

        if shared.shutting_down.load(Ordering::SeqCst) {
            break;
        }
        notified.await;
    }
    log::debug!("Worker {} stopped", index);
}
