//! Boot and shutdown of the fitness job pipeline.

use crate::error::JobsResult;
use crate::handlers::JobHandlers;
use crate::kinds::FitnessJob;
use crate::schedule::declare_cleanups;
use crate::store::FitnessStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use vigor_config::{BackoffKind, RetrySettings, SchedulerSettings, Validate};
use vigor_log::{debug, error, info, warn};
use vigor_queue::{
    Clock, Inspector, Queue, QueueStore, RedisQueueStore, RedisStoreConfig, RetryPolicy,
    SystemClock, Worker, WorkerConfig, WorkerStatsSnapshot,
};

pub fn retry_policy(settings: &RetrySettings) -> RetryPolicy {
    let base = std::time::Duration::from_millis(settings.base_ms);
    match settings.backoff {
        BackoffKind::Fixed => RetryPolicy::fixed(settings.max_attempts, base),
        BackoffKind::Exponential => RetryPolicy::exponential(
            settings.max_attempts,
            base,
            std::time::Duration::from_millis(settings.max_ms),
        ),
    }
}

pub fn worker_config(settings: &SchedulerSettings) -> WorkerConfig {
    WorkerConfig {
        concurrency: settings.concurrency,
        poll_interval: settings.poll_interval(),
        lease: settings.lease(),
        job_timeout: settings.job_timeout(),
    }
}

fn redis_config(settings: &SchedulerSettings) -> RedisStoreConfig {
    RedisStoreConfig::new(&settings.redis_url, &settings.queue_name)
        .with_key_prefix(settings.key_prefix())
        .with_retention(settings.retention())
}

/// Producer-only handle for processes that schedule but never consume,
/// such as the API server.
pub async fn connect_queue(settings: &SchedulerSettings) -> JobsResult<Queue<FitnessJob>> {
    settings.validate()?;
    let store = RedisQueueStore::connect(redis_config(settings)).await?;
    Ok(Queue::new(Arc::new(store)).with_retry(retry_policy(&settings.retry)))
}

/// Drop finished records older than `retention` every `every` until told
/// to stop. The first sweep runs immediately.
fn spawn_retention_sweep(
    inspector: Inspector,
    retention: Duration,
    every: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(every);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                _ = ticks.tick() => {
                    match inspector.purge_finished(retention).await {
                        Ok(0) => {}
                        Ok(purged) => debug!("Retention sweep dropped {} finished jobs", purged),
                        Err(e) => warn!("Retention sweep failed: {}", e),
                    }
                }
            }
        }
    })
}

/// A running worker plus the queue it consumes.
pub struct JobRuntime {
    settings: SchedulerSettings,
    queue: Queue<FitnessJob>,
    worker: Worker<FitnessJob, JobHandlers>,
    sweep_stop: watch::Sender<bool>,
    sweep: JoinHandle<()>,
}

impl JobRuntime {
    /// Connect to Redis, declare the recurring cleanups and start the worker.
    pub async fn boot(
        settings: SchedulerSettings,
        fitness: Arc<dyn FitnessStore>,
    ) -> JobsResult<Self> {
        vigor_log::init();
        settings.validate()?;

        let store = RedisQueueStore::connect(redis_config(&settings)).await?;
        Self::with_store(settings, Arc::new(store), fitness, Arc::new(SystemClock)).await
    }

    /// Same as [`JobRuntime::boot`] over any queue store and clock.
    pub async fn with_store(
        settings: SchedulerSettings,
        store: Arc<dyn QueueStore>,
        fitness: Arc<dyn FitnessStore>,
        clock: Arc<dyn Clock>,
    ) -> JobsResult<Self> {
        settings.validate()?;

        let queue = Queue::new(store)
            .with_clock(clock)
            .with_retry(retry_policy(&settings.retry));

        let declared = declare_cleanups(&queue, settings.cleanup_every()).await?;
        for (target, outcome) in declared {
            info!("Cleanup {} schedule: {:?}", target, outcome);
        }

        let mut worker =
            Worker::with_config(&queue, JobHandlers::new(fitness), worker_config(&settings));
        worker.start()?;

        let (sweep_stop, stop) = watch::channel(false);
        let sweep = spawn_retention_sweep(
            queue.inspector(),
            settings.retention(),
            settings.purge_every(),
            stop,
        );

        info!(
            "Job runtime running on queue '{}' with {} slots",
            settings.queue_name, settings.concurrency
        );

        Ok(Self {
            settings,
            queue,
            worker,
            sweep_stop,
            sweep,
        })
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn queue(&self) -> &Queue<FitnessJob> {
        &self.queue
    }

    pub fn inspector(&self) -> Inspector {
        self.queue.inspector()
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.worker.stats()
    }

    /// Stop consuming and wait for in-flight jobs.
    pub async fn shutdown(mut self) -> JobsResult<()> {
        let _ = self.sweep_stop.send(true);
        if let Err(e) = (&mut self.sweep).await {
            error!("Retention sweep ended abnormally: {}", e);
        }
        self.worker.shutdown().await?;
        info!("Job runtime stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigor_queue::Backoff;

    #[test]
    fn test_retry_policy_from_settings() {
        let policy = retry_policy(&RetrySettings::default());
        assert_eq!(policy, RetryPolicy::default());

        let fixed = retry_policy(&RetrySettings {
            max_attempts: 4,
            backoff: BackoffKind::Fixed,
            base_ms: 250,
            max_ms: 1_000,
        });
        assert_eq!(fixed.max_attempts, 4);
        assert_eq!(fixed.backoff, Backoff::Fixed { delay_ms: 250 });
    }

    #[test]
    fn test_worker_config_from_settings() {
        let config = worker_config(&SchedulerSettings::default());
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.lease, Duration::from_secs(300));
    }
}
