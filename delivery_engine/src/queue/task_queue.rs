use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use log::*;
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
    time::Instant,
};

use super::{DeadLetter, DeadLetterQueue, Job};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of jobs executing at the same time.
    pub workers: usize,
    /// Attempts (including the first) before a retryable job is dead-lettered.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// A job still running after this long is presumed dead and is retried.
    pub hard_timeout: Duration,
    /// A job still running after this long is logged as slow.
    pub soft_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            max_attempts: 5,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            hard_timeout: Duration::from_secs(30 * 60),
            soft_timeout: Duration::from_secs(60),
        }
    }
}

impl QueueConfig {
    /// Delay before attempt `attempt + 1`: `base_backoff * 2^(attempt - 1)`, capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    /// Worth trying again later: provider timeouts, lost optimistic-lock races and the like.
    #[error("{0}")]
    Retryable(String),
    /// Retrying cannot help: bad payloads, permanently missing records.
    #[error("{0}")]
    Fatal(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("The task queue has shut down")]
    Closed,
}

/// Executes jobs. Implementations must be idempotent: a job can be delivered more than once.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &Job) -> Result<(), JobError>;
}

struct Envelope {
    id: u64,
    job: Job,
    attempts: u32,
}

/// The enqueueing side of a [`TaskQueue`]. Jobs from one producer are dequeued in the order they were enqueued.
#[derive(Clone)]
pub struct JobProducer {
    sender: mpsc::UnboundedSender<Envelope>,
    next_id: Arc<AtomicU64>,
    outstanding: Arc<AtomicUsize>,
}

impl JobProducer {
    /// Enqueues a job and returns its id. Never blocks.
    pub fn enqueue(&self, job: Job) -> Result<u64, QueueError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = job.name();
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(Envelope { id, job, attempts: 0 }).is_err() {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            error!("📬️ Could not enqueue {name} job. The queue has shut down.");
            return Err(QueueError::Closed);
        }
        trace!("📬️ Enqueued job #{id} ({name})");
        Ok(id)
    }

    pub fn enqueue_all<I: IntoIterator<Item = Job>>(&self, jobs: I) -> Result<(), QueueError> {
        for job in jobs {
            self.enqueue(job)?;
        }
        Ok(())
    }

    fn requeue(&self, envelope: Envelope) -> Result<(), Envelope> {
        self.sender.send(envelope).map_err(|e| e.0)
    }

    fn finish(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    /// Jobs enqueued and not yet finished (succeeded or dead-lettered).
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

pub struct TaskQueue {
    config: QueueConfig,
    receiver: mpsc::UnboundedReceiver<Envelope>,
    producer: JobProducer,
    dead_letters: DeadLetterQueue,
}

impl TaskQueue {
    pub fn new(config: QueueConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let producer =
            JobProducer { sender, next_id: Arc::new(AtomicU64::new(1)), outstanding: Arc::new(AtomicUsize::new(0)) };
        Self { config, receiver, producer, dead_letters: DeadLetterQueue::default() }
    }

    pub fn producer(&self) -> JobProducer {
        self.producer.clone()
    }

    pub fn dead_letters(&self) -> DeadLetterQueue {
        self.dead_letters.clone()
    }

    /// Removes and returns every job waiting in the queue without running it. Lets tests and tools drive a handler
    /// by hand.
    pub fn drain_pending(&mut self) -> Vec<Job> {
        let mut jobs = Vec::new();
        while let Ok(envelope) = self.receiver.try_recv() {
            self.producer.finish();
            jobs.push(envelope.job);
        }
        jobs
    }

    /// Starts the dispatcher loop. The queue runs until [`QueueHandle::shutdown`] is called or the handle is dropped.
    pub fn start<H: JobHandler>(self, handler: Arc<H>) -> QueueHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let producer = self.producer.clone();
        let dead_letters = self.dead_letters.clone();
        let join = tokio::spawn(run_dispatcher(self, handler, shutdown_rx));
        QueueHandle { shutdown: shutdown_tx, join, producer, dead_letters }
    }
}

pub struct QueueHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    producer: JobProducer,
    dead_letters: DeadLetterQueue,
}

impl QueueHandle {
    pub fn producer(&self) -> JobProducer {
        self.producer.clone()
    }

    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.dead_letters
    }

    /// Waits until every enqueued job has finished, including follow-up jobs they enqueue. Returns `false` on timeout.
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.producer.outstanding() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    /// Stops taking new jobs and waits for running ones to complete.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            warn!("📬️ Task queue shutdown process failed: {e}");
        }
        debug!("📬️ Task queue has shut down");
    }
}

async fn run_dispatcher<H: JobHandler>(queue: TaskQueue, handler: Arc<H>, mut shutdown: watch::Receiver<bool>) {
    let TaskQueue { config, mut receiver, producer, dead_letters } = queue;
    let workers = config.workers.max(1);
    let config = Arc::new(config);
    let semaphore = Arc::new(Semaphore::new(workers));
    debug!("📬️ Starting task queue with {workers} workers");
    loop {
        let envelope = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = receiver.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };
        let worker = Worker {
            handler: Arc::clone(&handler),
            producer: producer.clone(),
            config: Arc::clone(&config),
            dead_letters: dead_letters.clone(),
        };
        tokio::spawn(worker.execute(envelope, permit));
    }
    debug!("📬️ Task queue is draining running jobs");
    #[allow(clippy::cast_possible_truncation)]
    let _ = semaphore.acquire_many(workers as u32).await;
}

struct Worker<H> {
    handler: Arc<H>,
    producer: JobProducer,
    config: Arc<QueueConfig>,
    dead_letters: DeadLetterQueue,
}

impl<H: JobHandler> Worker<H> {
    async fn execute(self, mut envelope: Envelope, permit: OwnedSemaphorePermit) {
        envelope.attempts += 1;
        let name = envelope.job.name();
        trace!("📬️ Running job #{} ({name}), attempt {}", envelope.id, envelope.attempts);
        let result = self.run_with_timeouts(&envelope).await;
        drop(permit);
        match result {
            Ok(()) => {
                trace!("📬️ Job #{} ({name}) done", envelope.id);
                self.producer.finish();
            },
            Err(JobError::Fatal(e)) => self.dead_letter(envelope, e),
            Err(JobError::Retryable(e)) if envelope.attempts >= self.config.max_attempts => {
                self.dead_letter(envelope, format!("retries exhausted. Last error: {e}"))
            },
            Err(JobError::Retryable(e)) => {
                let delay = self.config.backoff_for(envelope.attempts);
                warn!(
                    "📬️ Job #{} ({name}) failed on attempt {}: {e}. Retrying in {}ms",
                    envelope.id,
                    envelope.attempts,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                if let Err(envelope) = self.producer.requeue(envelope) {
                    self.dead_letter(envelope, format!("queue closed before retry. Last error: {e}"));
                }
            },
        }
    }

    async fn run_with_timeouts(&self, envelope: &Envelope) -> Result<(), JobError> {
        let fut = self.handler.handle(&envelope.job);
        tokio::pin!(fut);
        tokio::select! {
            result = &mut fut => return result,
            _ = tokio::time::sleep(self.config.soft_timeout) => {
                warn!(
                    "📬️ Job #{} ({}) is still running after {}s",
                    envelope.id,
                    envelope.job.name(),
                    self.config.soft_timeout.as_secs()
                );
            },
        }
        let remaining = self.config.hard_timeout.saturating_sub(self.config.soft_timeout);
        match tokio::time::timeout(remaining, fut).await {
            Ok(result) => result,
            Err(_) => Err(JobError::Retryable(format!(
                "job exceeded its {}ms visibility timeout",
                self.config.hard_timeout.as_millis()
            ))),
        }
    }

    fn dead_letter(&self, envelope: Envelope, error: String) {
        self.dead_letters.push(DeadLetter {
            job_id: envelope.id,
            job: envelope.job,
            attempts: envelope.attempts,
            error,
            failed_at: Utc::now(),
        });
        self.producer.finish();
    }
}
