//! Redis-backed store shared by every producer and worker process.
//!
//! Layout under `{prefix}`:
//!
//! - `{prefix}:job:{id}`: the record as JSON
//! - `{prefix}:waiting`: zset of claimable ids, scored by visibility time (ms)
//! - `{prefix}:active`: zset of leased ids, scored by lease expiry (ms)
//! - `{prefix}:completed`, `{prefix}:dead`: zsets scored by finish time (ms)
//! - `{prefix}:schedules`: hash of recurring definitions by id
//! - `{prefix}:schedules:next`: zset of schedule ids, scored by next firing (ms)
//!
//! Claims move an id from `waiting` to `active` inside a Lua script, so two
//! workers never receive the same record. Every later change to a claimed
//! record (ack, fail, bury, renew, reclaim, revive) is a compare-and-set on
//! the record's JSON: the write only lands if the record is still the one
//! that was read, so a worker whose lease was reclaimed cannot overwrite the
//! new holder's state. A recurring firing advances the schedule and writes
//! its record in one script, guarded by the score that was found due.
//!
//! Scores are milliseconds rounded up, so no record or schedule is visible
//! before its instant.

use super::{LEASE_EXPIRED, QueueStore};
use crate::error::{QueueError, QueueResult};
use crate::job::{
    FailOutcome, JobId, JobState, Lease, NewJob, QueueCounts, RecurringSchedule, StoredJob,
    UpsertOutcome, chrono_duration,
};
use ::redis::{AsyncCommands, Client, Script, aio::ConnectionManager};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use vigor_log::{debug, info, warn};

const CLAIM_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #ids == 0 then
    return false
end
redis.call('ZREM', KEYS[1], ids[1])
redis.call('ZADD', KEYS[2], ARGV[2], ids[1])
return ids[1]
"#;

// KEYS: record, waiting, active, completed, dead, target index
// ARGV: JSON read, JSON to write, id, score, ttl secs (0 = none), completed cutoff ms
const COMMIT_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) ~= ARGV[1] then
    return 0
end
for i = 2, 5 do
    redis.call('ZREM', KEYS[i], ARGV[3])
end
if tonumber(ARGV[5]) > 0 then
    redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[5])
else
    redis.call('SET', KEYS[1], ARGV[2])
end
redis.call('ZADD', KEYS[6], ARGV[4], ARGV[3])
if KEYS[6] == KEYS[4] then
    redis.call('ZREMRANGEBYSCORE', KEYS[4], '-inf', '(' .. ARGV[6])
end
return 1
"#;

// KEYS: schedules:next, schedules, record, waiting
// ARGV: schedule id, due score, next score ('' = no further firings),
//       schedule JSON, job id, job JSON, job score
const FIRE_SCRIPT: &str = r#"
local current = redis.call('ZSCORE', KEYS[1], ARGV[1])
if not current or tonumber(current) ~= tonumber(ARGV[2]) then
    return 0
end
if ARGV[3] == '' then
    redis.call('ZREM', KEYS[1], ARGV[1])
    redis.call('HDEL', KEYS[2], ARGV[1])
else
    redis.call('ZADD', KEYS[1], ARGV[3], ARGV[1])
    redis.call('HSET', KEYS[2], ARGV[1], ARGV[4])
end
redis.call('SET', KEYS[3], ARGV[6])
redis.call('ZADD', KEYS[4], ARGV[7], ARGV[5])
return 1
"#;

/// Redis store configuration.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL
    pub redis_url: String,

    /// Key prefix for Redis keys
    pub key_prefix: String,

    /// How long completed records stay readable
    pub retention: Duration,
}

impl RedisStoreConfig {
    pub fn new(redis_url: impl Into<String>, queue_name: impl AsRef<str>) -> Self {
        Self {
            redis_url: redis_url.into(),
            key_prefix: format!("vigor:queue:{}", queue_name.as_ref()),
            retention: Duration::from_secs(7 * 86_400),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.key_prefix, suffix)
    }
}

/// Store backed by Redis.
#[derive(Clone)]
pub struct RedisQueueStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
    claim_script: Script,
    commit_script: Script,
    fire_script: Script,
}

impl RedisQueueStore {
    pub async fn connect(config: RedisStoreConfig) -> QueueResult<Self> {
        info!("Connecting job store at prefix '{}'", config.key_prefix);

        let client = Client::open(config.redis_url.as_str())
            .map_err(|e| QueueError::Config(e.to_string()))?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            config,
            claim_script: Script::new(CLAIM_SCRIPT),
            commit_script: Script::new(COMMIT_SCRIPT),
            fire_script: Script::new(FIRE_SCRIPT),
        })
    }

    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    fn job_key(&self, id: impl std::fmt::Display) -> String {
        self.config.key(&format!("job:{}", id))
    }

    /// The record and the exact JSON it was read from.
    async fn load_raw(&self, id: JobId) -> QueueResult<Option<(String, StoredJob)>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(self.job_key(id)).await?;
        match raw {
            Some(raw) => {
                let job = serde_json::from_str(&raw)?;
                Ok(Some((raw, job)))
            }
            None => Ok(None),
        }
    }

    async fn load(&self, id: JobId) -> QueueResult<Option<StoredJob>> {
        Ok(self.load_raw(id).await?.map(|(_, job)| job))
    }

    /// Index and score a record is filed under for its state.
    fn placement(&self, job: &StoredJob) -> (String, i64) {
        let finished = job.finished_at.map(ms_ceil).unwrap_or_default();
        match job.state {
            JobState::Completed => (self.config.key("completed"), finished),
            JobState::Dead => (self.config.key("dead"), finished),
            JobState::Active => (
                self.config.key("active"),
                job.lease_until.map(ms_ceil).unwrap_or_default(),
            ),
            JobState::Delayed | JobState::Ready | JobState::Failed => {
                (self.config.key("waiting"), ms_ceil(job.run_at))
            }
        }
    }

    /// Write a new record and file it as waiting.
    async fn insert(&self, job: &StoredJob) -> QueueResult<()> {
        let id = job.id.to_string();
        let (index, score) = self.placement(job);

        let mut conn = self.connection.clone();
        let _: () = ::redis::pipe()
            .atomic()
            .set(self.job_key(&id), serde_json::to_string(job)?)
            .ignore()
            .zadd(index, &id, score)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Replace the record read as `before` with `job` and refile its id.
    /// Returns false, writing nothing, when the record changed since it was
    /// read.
    async fn commit(
        &self,
        before: &str,
        job: &StoredJob,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let id = job.id.to_string();
        let (index, score) = self.placement(job);
        let ttl = if job.state == JobState::Completed {
            self.config.retention.as_secs().max(1)
        } else {
            0
        };
        let cutoff = ms(now - chrono_duration(self.config.retention));

        let mut conn = self.connection.clone();
        let written: i64 = self
            .commit_script
            .key(self.job_key(&id))
            .key(self.config.key("waiting"))
            .key(self.config.key("active"))
            .key(self.config.key("completed"))
            .key(self.config.key("dead"))
            .key(index)
            .arg(before)
            .arg(serde_json::to_string(job)?)
            .arg(&id)
            .arg(score)
            .arg(ttl)
            .arg(cutoff)
            .invoke_async(&mut conn)
            .await?;
        Ok(written == 1)
    }

    /// Apply `change` to a record the caller still holds.
    async fn update_leased<T>(
        &self,
        lease: &Lease,
        now: DateTime<Utc>,
        change: impl FnOnce(&mut StoredJob) -> T,
    ) -> QueueResult<T> {
        let (raw, mut job) = self
            .load_raw(lease.id)
            .await?
            .ok_or(QueueError::JobNotFound(lease.id))?;
        if !job.holds(lease) {
            return Err(QueueError::LeaseLost(lease.id));
        }

        let out = change(&mut job);
        if !self.commit(&raw, &job, now).await? {
            return Err(QueueError::LeaseLost(lease.id));
        }
        Ok(out)
    }

    async fn fire_due_schedules(&self, now: DateTime<Utc>) -> QueueResult<()> {
        let mut conn = self.connection.clone();
        let next_key = self.config.key("schedules:next");
        let defs_key = self.config.key("schedules");

        let due: Vec<(String, f64)> = conn
            .zrangebyscore_withscores(&next_key, "-inf", ms(now))
            .await?;

        for (id, score) in due {
            let raw: Option<String> = conn.hget(&defs_key, &id).await?;
            let Some(raw) = raw else {
                let _: () = conn.zrem(&next_key, &id).await?;
                continue;
            };
            let mut schedule: RecurringSchedule = serde_json::from_str(&raw)?;
            let due_ms = score as i64;
            let Some(fired_at) = DateTime::from_timestamp_millis(due_ms) else {
                continue;
            };

            let next = schedule.rule.next_firing(fired_at, now);
            let next_score = match next {
                Some(next) => {
                    schedule.next_run = next;
                    schedule.fired += 1;
                    ms_ceil(next).to_string()
                }
                None => String::new(),
            };
            let record = StoredJob::new(schedule.job_for(fired_at), now);

            // Only the worker that still sees the due score fires.
            let fired: i64 = self
                .fire_script
                .key(&next_key)
                .key(&defs_key)
                .key(self.job_key(record.id))
                .key(self.config.key("waiting"))
                .arg(&id)
                .arg(due_ms)
                .arg(next_score)
                .arg(serde_json::to_string(&schedule)?)
                .arg(record.id.to_string())
                .arg(serde_json::to_string(&record)?)
                .arg(ms_ceil(record.run_at))
                .invoke_async(&mut conn)
                .await?;
            if fired == 0 {
                continue;
            }

            if next.is_none() {
                warn!("Schedule '{}' has no further firings, removed it", id);
            }
            debug!("Schedule '{}' fired job {}", id, record.id);
        }
        Ok(())
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> QueueResult<()> {
        let mut conn = self.connection.clone();
        let expired: Vec<String> = conn
            .zrangebyscore(self.config.key("active"), "-inf", ms(now))
            .await?;

        for raw_id in expired {
            let Ok(id) = raw_id.parse::<JobId>() else {
                continue;
            };
            let Some((raw, mut job)) = self.load_raw(id).await? else {
                continue;
            };
            if !job.lease_expired(now) {
                continue;
            }
            let outcome = job.fail(now, LEASE_EXPIRED);
            // Another worker may have reclaimed it, or the holder finished.
            if self.commit(&raw, &job, now).await? {
                warn!("Reclaimed job {} ({}) after lease expiry: {:?}", id, job.kind, outcome);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn push(&self, job: NewJob, now: DateTime<Utc>) -> QueueResult<JobId> {
        let record = StoredJob::new(job, now);
        self.insert(&record).await?;
        Ok(record.id)
    }

    async fn claim(&self, now: DateTime<Utc>, lease: Duration) -> QueueResult<Option<StoredJob>> {
        self.fire_due_schedules(now).await?;
        self.reclaim_expired(now).await?;

        let mut conn = self.connection.clone();
        let active_key = self.config.key("active");
        let lease_until = now + chrono_duration(lease);

        let claimed: Option<String> = self
            .claim_script
            .key(self.config.key("waiting"))
            .key(&active_key)
            .arg(ms(now))
            .arg(ms_ceil(lease_until))
            .invoke_async(&mut conn)
            .await?;

        let Some(raw_id) = claimed else {
            return Ok(None);
        };
        let id = raw_id
            .parse::<JobId>()
            .map_err(|e| QueueError::Deserialization(format!("job id '{}': {}", raw_id, e)))?;

        let Some((raw, mut job)) = self.load_raw(id).await? else {
            warn!("Job {} vanished before it could be claimed", id);
            let _: () = conn.zrem(&active_key, &raw_id).await?;
            return Ok(None);
        };

        if !job.is_due(now) {
            // Refile unchanged under its own score.
            debug!("Job {} is not due until {}, putting it back", id, job.run_at);
            self.commit(&raw, &job, now).await?;
            return Ok(None);
        }

        job.claim(now, lease);
        if !self.commit(&raw, &job, now).await? {
            warn!("Job {} changed while it was being claimed", id);
            return Ok(None);
        }
        Ok(Some(job))
    }

    async fn renew(
        &self,
        lease: &Lease,
        now: DateTime<Utc>,
        duration: Duration,
    ) -> QueueResult<()> {
        self.update_leased(lease, now, |job| job.renew(now, duration)).await
    }

    async fn ack(&self, lease: &Lease, now: DateTime<Utc>) -> QueueResult<()> {
        self.update_leased(lease, now, |job| job.complete(now)).await
    }

    async fn fail(
        &self,
        lease: &Lease,
        now: DateTime<Utc>,
        error: &str,
    ) -> QueueResult<FailOutcome> {
        self.update_leased(lease, now, |job| job.fail(now, error)).await
    }

    async fn bury(&self, lease: &Lease, now: DateTime<Utc>, error: &str) -> QueueResult<()> {
        self.update_leased(lease, now, |job| job.bury(now, error)).await
    }

    async fn upsert_recurring(
        &self,
        schedule: RecurringSchedule,
        now: DateTime<Utc>,
    ) -> QueueResult<UpsertOutcome> {
        let mut conn = self.connection.clone();
        let defs_key = self.config.key("schedules");

        let existing: Option<String> = conn.hget(&defs_key, &schedule.id).await?;
        let existing = existing
            .map(|raw| serde_json::from_str::<RecurringSchedule>(&raw))
            .transpose()?;

        let (merged, outcome) =
            RecurringSchedule::merge_registration(existing.as_ref(), schedule, now);

        if outcome != UpsertOutcome::Unchanged {
            let _: () = ::redis::pipe()
                .atomic()
                .hset(&defs_key, &merged.id, serde_json::to_string(&merged)?)
                .ignore()
                .zadd(
                    self.config.key("schedules:next"),
                    &merged.id,
                    ms_ceil(merged.next_run),
                )
                .ignore()
                .query_async(&mut conn)
                .await?;
        }
        Ok(outcome)
    }

    async fn remove_recurring(&self, id: &str) -> QueueResult<bool> {
        let mut conn = self.connection.clone();
        let (removed, _): (i64, i64) = ::redis::pipe()
            .atomic()
            .hdel(self.config.key("schedules"), id)
            .zrem(self.config.key("schedules:next"), id)
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn recurring(&self) -> QueueResult<Vec<RecurringSchedule>> {
        let mut conn = self.connection.clone();
        let raw: Vec<String> = conn.hvals(self.config.key("schedules")).await?;
        let mut schedules = raw
            .iter()
            .map(|r| serde_json::from_str::<RecurringSchedule>(r))
            .collect::<Result<Vec<_>, _>>()?;
        schedules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(schedules)
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<StoredJob>> {
        self.load(id).await
    }

    async fn list(
        &self,
        state: JobState,
        limit: usize,
        now: DateTime<Utc>,
    ) -> QueueResult<Vec<StoredJob>> {
        let mut conn = self.connection.clone();
        let waiting = self.config.key("waiting");
        let now_ms = ms(now);

        let ids: Vec<String> = match state {
            JobState::Ready => conn.zrangebyscore(&waiting, "-inf", now_ms).await?,
            JobState::Delayed => {
                conn.zrangebyscore(&waiting, format!("({}", now_ms), "+inf")
                    .await?
            }
            JobState::Failed => conn.zrange(&waiting, 0, -1).await?,
            JobState::Active => conn.zrange(self.config.key("active"), 0, -1).await?,
            JobState::Completed => conn.zrange(self.config.key("completed"), 0, -1).await?,
            JobState::Dead => conn.zrange(self.config.key("dead"), 0, -1).await?,
        };

        let mut jobs = Vec::new();
        for raw_id in ids {
            if jobs.len() >= limit {
                break;
            }
            let Ok(id) = raw_id.parse::<JobId>() else {
                continue;
            };
            if let Some(job) = self.load(id).await?
                && job.visible_state(now) == state
            {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    async fn counts(&self, now: DateTime<Utc>) -> QueueResult<QueueCounts> {
        let mut conn = self.connection.clone();
        let waiting = self.config.key("waiting");
        let now_ms = ms(now);

        let (ready, delayed, active, completed, dead, schedules): (
            usize,
            usize,
            usize,
            usize,
            usize,
            usize,
        ) = ::redis::pipe()
            .zcount(&waiting, "-inf", now_ms)
            .zcount(&waiting, format!("({}", now_ms), "+inf")
            .zcard(self.config.key("active"))
            .zcard(self.config.key("completed"))
            .zcard(self.config.key("dead"))
            .hlen(self.config.key("schedules"))
            .query_async(&mut conn)
            .await?;

        Ok(QueueCounts {
            delayed,
            ready,
            active,
            completed,
            dead,
            schedules,
        })
    }

    async fn retry_dead(&self, id: JobId, now: DateTime<Utc>) -> QueueResult<bool> {
        let Some((raw, mut job)) = self.load_raw(id).await? else {
            return Ok(false);
        };
        if job.state != JobState::Dead {
            return Ok(false);
        }
        job.revive(now);
        self.commit(&raw, &job, now).await
    }

    async fn purge_finished(&self, before: DateTime<Utc>) -> QueueResult<usize> {
        let mut conn = self.connection.clone();
        let mut purged = 0;

        for index in ["completed", "dead"] {
            let key = self.config.key(index);
            let ids: Vec<String> = conn
                .zrangebyscore(&key, "-inf", format!("({}", ms(before)))
                .await?;
            if ids.is_empty() {
                continue;
            }

            let job_keys: Vec<String> = ids.iter().map(|id| self.job_key(id)).collect();
            let _: () = ::redis::pipe()
                .atomic()
                .del(job_keys)
                .ignore()
                .zrem(&key, &ids)
                .ignore()
                .query_async(&mut conn)
                .await?;
            purged += ids.len();
        }

        if purged > 0 {
            info!("Purged {} finished jobs", purged);
        }
        Ok(purged)
    }
}

/// Milliseconds, rounded down. Used for "now" bounds.
fn ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

/// Milliseconds, rounded up. Used for scores, so `score <= ms(now)` implies
/// the instant itself is not after `now`.
fn ms_ceil(t: DateTime<Utc>) -> i64 {
    let floor = t.timestamp_millis();
    if t.timestamp_subsec_nanos() % 1_000_000 == 0 {
        floor
    } else {
        floor + 1
    }
}
