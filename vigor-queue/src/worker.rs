//! Bounded worker pool consuming due jobs.

use crate::clock::Clock;
use crate::dispatch::{self, Described, Dispatch, Job, JobError, JobResult};
use crate::error::{QueueError, QueueResult};
use crate::job::{FailOutcome, Lease, StoredJob};
use crate::queue::Queue;
use crate::store::QueueStore;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use vigor_log::{debug, error, info, warn};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs executing at the same time, at most
    pub concurrency: usize,

    /// Idle wait between claim attempts
    pub poll_interval: Duration,

    /// Exclusive hold on a claimed job; expired leases are reclaimed
    pub lease: Duration,

    /// Handlers running longer are reported as failed once they return
    pub job_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            poll_interval: Duration::from_secs(1),
            lease: Duration::from_secs(300),
            job_timeout: Duration::from_secs(300),
        }
    }
}

/// What one processing step did with the claimed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Failed; runs again at `at`.
    Retrying { at: DateTime<Utc> },
    /// Failed on its last attempt.
    Dead,
    /// Undecodable or a configuration error; dead without retries.
    Buried,
}

/// Running totals for a worker.
#[derive(Debug, Default)]
pub struct WorkerStats {
    claimed: AtomicU64,
    completed: AtomicU64,
    retried: AtomicU64,
    dead: AtomicU64,
    buried: AtomicU64,
    store_errors: AtomicU64,
    in_flight: AtomicU32,
    peak_in_flight: AtomicU32,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            claimed: self.claimed.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead: self.dead.load(Ordering::Relaxed),
            buried: self.buried.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
        }
    }

    fn enter(&self) {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Point-in-time copy of [`WorkerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    pub claimed: u64,
    pub completed: u64,
    pub retried: u64,
    pub dead: u64,
    pub buried: u64,
    pub store_errors: u64,
    pub in_flight: u32,
    /// Most handlers ever observed running at once
    pub peak_in_flight: u32,
}

struct Executor<J, D> {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<D>,
    stats: Arc<WorkerStats>,
    lease: Duration,
    job_timeout: Duration,
    _job: PhantomData<fn() -> J>,
}

impl<J: Job, D: Dispatch<J>> Executor<J, D> {
    async fn process(&self, slot: usize) -> QueueResult<Option<JobOutcome>> {
        let Some(record) = self.store.claim(self.clock.now(), self.lease).await? else {
            return Ok(None);
        };
        self.stats.claimed.fetch_add(1, Ordering::Relaxed);
        let lease = record.lease();

        let job = match dispatch::decode::<J>(&record.kind, &record.payload) {
            Ok(job) => job,
            Err(e) => {
                error!(
                    "[slot {}] Burying job {} ({}): {}",
                    slot, record.id, record.kind, e
                );
                self.store.bury(&lease, self.clock.now(), &e.to_string()).await?;
                self.stats.buried.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(JobOutcome::Buried));
            }
        };

        info!(
            "[slot {}] Running {} (job {}, attempt {})",
            slot,
            Described(&record.kind, &record.payload),
            record.id,
            record.attempts
        );

        self.stats.enter();
        let result = self.run(slot, job, &record, &lease).await;
        self.stats.exit();

        match result {
            Ok(()) => {
                self.store.ack(&lease, self.clock.now()).await?;
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                info!("[slot {}] Finished running {}", slot, record.kind);
                Ok(Some(JobOutcome::Completed))
            }
            Err(JobError::Configuration(reason)) => {
                error!(
                    "[slot {}] Job {} ({}) cannot succeed: {}",
                    slot, record.id, record.kind, reason
                );
                self.store.bury(&lease, self.clock.now(), &reason).await?;
                self.stats.buried.fetch_add(1, Ordering::Relaxed);
                Ok(Some(JobOutcome::Buried))
            }
            Err(err @ JobError::Transient(_)) => {
                self.fail(slot, &record, &lease, &err.to_string()).await.map(Some)
            }
        }
    }

    /// Run the handler on its own task so a panic costs one attempt instead
    /// of the slot.
    ///
    /// A handler is never cancelled: one that overruns `job_timeout` keeps
    /// its lease renewed until it returns, and only then is the attempt
    /// recorded as a transient failure.
    async fn run(&self, slot: usize, job: J, record: &StoredJob, lease: &Lease) -> JobResult {
        let dispatcher = self.dispatcher.clone();
        let mut task = tokio::spawn(async move { dispatcher.dispatch(job).await });

        let started = tokio::time::Instant::now();
        let deadline = tokio::time::sleep(self.job_timeout);
        tokio::pin!(deadline);
        let every = self.renew_every();
        let mut renewals = tokio::time::interval_at(started + every, every);
        let mut overran = false;

        let joined = loop {
            tokio::select! {
                joined = &mut task => break joined,
                _ = &mut deadline, if !overran => {
                    overran = true;
                    warn!(
                        "[slot {}] Job {} ({}) passed its {}ms timeout, waiting for it to return",
                        slot,
                        record.id,
                        record.kind,
                        self.job_timeout.as_millis()
                    );
                }
                _ = renewals.tick() => {
                    if let Err(e) = self.store.renew(lease, self.clock.now(), self.lease).await {
                        warn!("[slot {}] Could not renew lease on job {}: {}", slot, record.id, e);
                    }
                }
            }
        };

        let result = match joined {
            Ok(result) => result,
            Err(join) if join.is_panic() => {
                Err(JobError::Transient("handler panicked".to_string()))
            }
            Err(join) => Err(JobError::transient(join)),
        };

        let overran = overran || started.elapsed() > self.job_timeout;
        match result {
            Ok(()) if overran => Err(JobError::Transient(format!(
                "ran {}ms, over the {}ms timeout",
                started.elapsed().as_millis(),
                self.job_timeout.as_millis()
            ))),
            other => other,
        }
    }

    fn renew_every(&self) -> Duration {
        (self.lease / 3).max(Duration::from_millis(1))
    }

    async fn fail(
        &self,
        slot: usize,
        record: &StoredJob,
        lease: &Lease,
        reason: &str,
    ) -> QueueResult<JobOutcome> {
        match self.store.fail(lease, self.clock.now(), reason).await? {
            FailOutcome::Retry { at } => {
                warn!(
                    "[slot {}] Job {} ({}) failed on attempt {}/{}: {}; retrying at {}",
                    slot,
                    record.id,
                    record.kind,
                    record.attempts,
                    record.retry.max_attempts,
                    reason,
                    at
                );
                self.stats.retried.fetch_add(1, Ordering::Relaxed);
                Ok(JobOutcome::Retrying { at })
            }
            FailOutcome::Dead => {
                error!(
                    "[slot {}] Job {} ({}) exhausted {} attempts: {}",
                    slot, record.id, record.kind, record.attempts, reason
                );
                self.stats.dead.fetch_add(1, Ordering::Relaxed);
                Ok(JobOutcome::Dead)
            }
        }
    }

    async fn run_slot(
        self: Arc<Self>,
        slot: usize,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!("[slot {}] Started", slot);

        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }

            match self.process(slot).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    self.stats.store_errors.fetch_add(1, Ordering::Relaxed);
                    error!("[slot {}] Queue error: {}", slot, e);
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        debug!("[slot {}] Stopped", slot);
    }
}

/// Pulls due jobs of type `J` and hands them to `D`.
///
/// `concurrency` slots each process one job at a time, so no more than
/// `concurrency` handlers ever run at once. On shutdown each slot finishes
/// the job it holds before exiting.
pub struct Worker<J, D> {
    executor: Arc<Executor<J, D>>,
    config: WorkerConfig,
    shutdown: Option<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl<J: Job, D: Dispatch<J>> Worker<J, D> {
    /// Create a worker consuming from the same store as `queue`.
    pub fn new(queue: &Queue<J>, dispatcher: D) -> Self {
        Self::with_config(queue, dispatcher, WorkerConfig::default())
    }

    pub fn with_config(queue: &Queue<J>, dispatcher: D, config: WorkerConfig) -> Self {
        Self {
            executor: Arc::new(Executor {
                store: queue.store(),
                clock: queue.clock(),
                dispatcher: Arc::new(dispatcher),
                stats: Arc::new(WorkerStats::default()),
                lease: config.lease,
                job_timeout: config.job_timeout,
                _job: PhantomData,
            }),
            config,
            shutdown: None,
            handles: Vec::new(),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.executor.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Claim and process at most one job on the calling task.
    pub async fn process_next(&self) -> QueueResult<Option<JobOutcome>> {
        self.executor.process(0).await
    }

    /// Process due jobs until none is left. Returns how many were handled.
    pub async fn drain(&self) -> QueueResult<usize> {
        let mut handled = 0;
        while self.process_next().await?.is_some() {
            handled += 1;
        }
        Ok(handled)
    }

    /// Start the worker slots.
    pub fn start(&mut self) -> QueueResult<()> {
        if self.is_running() {
            return Err(QueueError::WorkerAlreadyRunning);
        }
        if self.config.concurrency == 0 {
            return Err(QueueError::Config(
                "worker concurrency must be at least 1".to_string(),
            ));
        }

        let kinds = J::kinds();
        if kinds.is_empty() {
            return Err(QueueError::Config(format!(
                "{} declares no job kinds; it must be an enum tagged with \
                 #[serde(tag = \"kind\", content = \"payload\")]",
                std::any::type_name::<J>()
            )));
        }

        info!(
            "Starting worker with concurrency {} for kinds: {}",
            self.config.concurrency,
            kinds.join(", ")
        );

        let (tx, rx) = watch::channel(false);
        for slot in 0..self.config.concurrency {
            let executor = self.executor.clone();
            let handle = tokio::spawn(executor.run_slot(
                slot,
                self.config.poll_interval,
                rx.clone(),
            ));
            self.handles.push(handle);
        }
        self.shutdown = Some(tx);
        Ok(())
    }

    /// Stop claiming and wait for in-flight jobs to finish.
    pub async fn shutdown(&mut self) -> QueueResult<()> {
        let Some(tx) = self.shutdown.take() else {
            return Err(QueueError::WorkerNotRunning);
        };

        info!("Stopping worker, waiting for {} slots", self.handles.len());
        let _ = tx.send(true);

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!("Worker slot ended abnormally: {}", e);
            }
        }

        info!("Worker stopped");
        Ok(())
    }

    /// Run until `signal` resolves, then shut down gracefully.
    pub async fn run_until<F>(mut self, signal: F) -> QueueResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start()?;
        signal.await;
        self.shutdown().await
    }
}

impl<J, D> Drop for Worker<J, D> {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
    }
}
