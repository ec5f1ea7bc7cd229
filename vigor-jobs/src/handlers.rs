//! Handlers for every fitness job kind.

use crate::kinds::{
    CleanupTarget, CloseFastingWindow, FinishChallengeSubscription, FitnessJob, LogLine,
};
use crate::store::FitnessStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use vigor_log::{debug, info};
use vigor_queue::{Dispatch, Handler, JobError, JobResult};

/// Registry binding each [`FitnessJob`] kind to its handler.
#[derive(Clone)]
pub struct JobHandlers {
    store: Arc<dyn FitnessStore>,
}

impl JobHandlers {
    pub fn new(store: Arc<dyn FitnessStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Dispatch<FitnessJob> for JobHandlers {
    async fn dispatch(&self, job: FitnessJob) -> JobResult {
        match job {
            FitnessJob::CloseFastingWindow(payload) => self.handle(payload).await,
            FitnessJob::FinishChallengeSubscription(payload) => self.handle(payload).await,
            FitnessJob::Log(line) => self.handle(line).await,
            FitnessJob::CleanupCalorieTarget => self.handle(CleanupTarget::CalorieTarget).await,
            FitnessJob::CleanupCalorieHeader => self.handle(CleanupTarget::CalorieHeader).await,
            FitnessJob::CleanupStepTarget => self.handle(CleanupTarget::StepTarget).await,
            FitnessJob::CleanupWaterTarget => self.handle(CleanupTarget::WaterTarget).await,
        }
    }
}

#[async_trait]
impl Handler<CloseFastingWindow> for JobHandlers {
    async fn handle(&self, payload: CloseFastingWindow) -> JobResult {
        let closed = self
            .store
            .finish_fasting_if_open(payload.entry_id, payload.window_end)
            .await
            .map_err(JobError::transient)?;

        if closed {
            info!(
                "Closed fasting entry {} at {}",
                payload.entry_id, payload.window_end
            );
        } else {
            debug!("Fasting entry {} was already finished", payload.entry_id);
        }
        Ok(())
    }
}

#[async_trait]
impl Handler<FinishChallengeSubscription> for JobHandlers {
    async fn handle(&self, payload: FinishChallengeSubscription) -> JobResult {
        let finished = self
            .store
            .finish_subscription_if_active(payload.subscription_id, payload.ends_at)
            .await
            .map_err(JobError::transient)?;

        if finished {
            info!("Finished challenge subscription {}", payload.subscription_id);
        } else {
            debug!(
                "Challenge subscription {} was already finished",
                payload.subscription_id
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Handler<CleanupTarget> for JobHandlers {
    async fn handle(&self, target: CleanupTarget) -> JobResult {
        let deleted = self
            .store
            .delete_orphans(target)
            .await
            .map_err(JobError::transient)?;
        info!("Cleanup {}: deleted {} orphaned rows", target, deleted);
        Ok(())
    }
}

#[async_trait]
impl Handler<LogLine> for JobHandlers {
    async fn handle(&self, line: LogLine) -> JobResult {
        info!("{}", log_line(Utc::now(), &line.0));
        Ok(())
    }
}

/// `yyyy-MM-dd HH:mm:ss:SSSS message`
pub fn log_line(at: DateTime<Utc>, message: &str) -> String {
    format!(
        "{}:{:04} {}",
        at.format("%Y-%m-%d %H:%M:%S"),
        at.timestamp_subsec_micros() / 100,
        message
    )
}
