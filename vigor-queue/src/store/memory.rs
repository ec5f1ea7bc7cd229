//! In-process store for tests and single-node use.

use super::{LEASE_EXPIRED, QueueStore};
use crate::error::{QueueError, QueueResult};
use crate::job::{
    FailOutcome, JobId, JobState, Lease, NewJob, QueueCounts, RecurringSchedule, StoredJob,
    UpsertOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use vigor_log::{debug, warn};

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, StoredJob>,
    schedules: BTreeMap<String, RecurringSchedule>,
}

impl State {
    fn insert(&mut self, job: NewJob, now: DateTime<Utc>) -> JobId {
        let record = StoredJob::new(job, now);
        let id = record.id;
        self.jobs.insert(id, record);
        id
    }

    fn fire_due_schedules(&mut self, now: DateTime<Utc>) {
        let due: Vec<String> = self
            .schedules
            .values()
            .filter(|s| s.next_run <= now)
            .map(|s| s.id.clone())
            .collect();

        for id in due {
            let Some(schedule) = self.schedules.get(&id).cloned() else {
                continue;
            };
            let fired_at = schedule.next_run;
            let job_id = self.insert(schedule.job_for(fired_at), now);
            debug!("Schedule '{}' fired job {}", id, job_id);

            match schedule.rule.next_firing(fired_at, now) {
                Some(next) => {
                    if let Some(entry) = self.schedules.get_mut(&id) {
                        entry.next_run = next;
                        entry.fired += 1;
                    }
                }
                None => {
                    warn!("Schedule '{}' has no further firings, removing it", id);
                    self.schedules.remove(&id);
                }
            }
        }
    }

    fn reclaim_expired(&mut self, now: DateTime<Utc>) {
        for job in self.jobs.values_mut().filter(|j| j.lease_expired(now)) {
            let outcome = job.fail(now, LEASE_EXPIRED);
            warn!("Reclaimed job {} ({}) after lease expiry: {:?}", job.id, job.kind, outcome);
        }
    }

    fn leased(&mut self, lease: &Lease) -> QueueResult<&mut StoredJob> {
        let job = self
            .jobs
            .get_mut(&lease.id)
            .ok_or(QueueError::JobNotFound(lease.id))?;
        if !job.holds(lease) {
            return Err(QueueError::LeaseLost(lease.id));
        }
        Ok(job)
    }
}

/// Store keeping every record in process memory.
///
/// Clones share the same records, so a producer and a worker built from
/// clones of one store see each other's work.
#[derive(Clone, Default)]
pub struct MemoryQueueStore {
    state: Arc<Mutex<State>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records currently held, in any state.
    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn push(&self, job: NewJob, now: DateTime<Utc>) -> QueueResult<JobId> {
        Ok(self.state.lock().await.insert(job, now))
    }

    async fn claim(&self, now: DateTime<Utc>, lease: Duration) -> QueueResult<Option<StoredJob>> {
        let mut state = self.state.lock().await;
        state.fire_due_schedules(now);
        state.reclaim_expired(now);

        let next = state
            .jobs
            .values()
            .filter(|j| j.is_due(now))
            .min_by_key(|j| (j.run_at, j.created_at))
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            state.jobs.get_mut(&id).map(|job| {
                job.claim(now, lease);
                job.clone()
            })
        }))
    }

    async fn renew(
        &self,
        lease: &Lease,
        now: DateTime<Utc>,
        duration: Duration,
    ) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.leased(lease)?.renew(now, duration);
        Ok(())
    }

    async fn ack(&self, lease: &Lease, now: DateTime<Utc>) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.leased(lease)?.complete(now);
        Ok(())
    }

    async fn fail(
        &self,
        lease: &Lease,
        now: DateTime<Utc>,
        error: &str,
    ) -> QueueResult<FailOutcome> {
        let mut state = self.state.lock().await;
        Ok(state.leased(lease)?.fail(now, error))
    }

    async fn bury(&self, lease: &Lease, now: DateTime<Utc>, error: &str) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.leased(lease)?.bury(now, error);
        Ok(())
    }

    async fn upsert_recurring(
        &self,
        schedule: RecurringSchedule,
        now: DateTime<Utc>,
    ) -> QueueResult<UpsertOutcome> {
        let mut state = self.state.lock().await;
        let (merged, outcome) =
            RecurringSchedule::merge_registration(state.schedules.get(&schedule.id), schedule, now);
        state.schedules.insert(merged.id.clone(), merged);
        Ok(outcome)
    }

    async fn remove_recurring(&self, id: &str) -> QueueResult<bool> {
        Ok(self.state.lock().await.schedules.remove(id).is_some())
    }

    async fn recurring(&self) -> QueueResult<Vec<RecurringSchedule>> {
        Ok(self.state.lock().await.schedules.values().cloned().collect())
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<StoredJob>> {
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn list(
        &self,
        state: JobState,
        limit: usize,
        now: DateTime<Utc>,
    ) -> QueueResult<Vec<StoredJob>> {
        let guard = self.state.lock().await;
        let mut jobs: Vec<StoredJob> = guard
            .jobs
            .values()
            .filter(|j| j.visible_state(now) == state)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.run_at, j.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn counts(&self, now: DateTime<Utc>) -> QueueResult<QueueCounts> {
        let state = self.state.lock().await;
        let mut counts = QueueCounts {
            schedules: state.schedules.len(),
            ..Default::default()
        };
        for job in state.jobs.values() {
            match job.state {
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Dead => counts.dead += 1,
                _ if job.run_at <= now => counts.ready += 1,
                _ => counts.delayed += 1,
            }
        }
        Ok(counts)
    }

    async fn retry_dead(&self, id: JobId, now: DateTime<Utc>) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(&id) {
            Some(job) if job.state == JobState::Dead => {
                job.revive(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_finished(&self, before: DateTime<Utc>) -> QueueResult<usize> {
        let mut state = self.state.lock().await;
        let before_len = state.jobs.len();
        state.jobs.retain(|_, job| {
            !(job.state.is_finished() && job.finished_at.is_some_and(|at| at < before))
        });
        Ok(before_len - state.jobs.len())
    }
}
