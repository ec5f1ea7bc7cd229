//! Data the fitness handlers act on.
//!
//! Every mutation is conditional on current state, which is what makes the
//! handlers safe to run more than once.

use crate::kinds::CleanupTarget;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Fitness store failures.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("fitness store unavailable: {0}")]
    Unavailable(String),

    #[error("fitness store query failed: {0}")]
    Query(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait FitnessStore: Send + Sync {
    /// Set `finished_at = at` on the entry only while it is unfinished.
    /// Returns whether a row changed.
    async fn finish_fasting_if_open(&self, entry_id: Uuid, at: DateTime<Utc>)
    -> StoreResult<bool>;

    /// Mark the subscription finished only while it is active.
    async fn finish_subscription_if_active(
        &self,
        subscription_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Delete rows of `target` that have no child rows left.
    async fn delete_orphans(&self, target: CleanupTarget) -> StoreResult<u64>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastingEntry {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeSubscription {
    pub id: Uuid,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Tables {
    fasting: HashMap<Uuid, FastingEntry>,
    subscriptions: HashMap<Uuid, ChallengeSubscription>,
    /// Parent rows per cleanup target, with their child row count
    parents: HashMap<CleanupTarget, HashMap<Uuid, usize>>,
    unavailable: bool,
}

impl Tables {
    fn check(&self) -> StoreResult<()> {
        if self.unavailable {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

/// In-memory fitness data for tests and local runs.
#[derive(Clone, Default)]
pub struct MemoryFitnessStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryFitnessStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_fasting(&self, started_at: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        self.tables.lock().await.fasting.insert(
            id,
            FastingEntry {
                id,
                started_at,
                finished_at: None,
            },
        );
        id
    }

    /// The user ends a fast from the app.
    pub async fn finish_fasting_manually(&self, id: Uuid, at: DateTime<Utc>) -> bool {
        let mut tables = self.tables.lock().await;
        match tables.fasting.get_mut(&id) {
            Some(entry) if entry.finished_at.is_none() => {
                entry.finished_at = Some(at);
                true
            }
            _ => false,
        }
    }

    pub async fn fasting(&self, id: Uuid) -> Option<FastingEntry> {
        self.tables.lock().await.fasting.get(&id).cloned()
    }

    pub async fn insert_subscription(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.tables.lock().await.subscriptions.insert(
            id,
            ChallengeSubscription {
                id,
                finished_at: None,
            },
        );
        id
    }

    pub async fn subscription(&self, id: Uuid) -> Option<ChallengeSubscription> {
        self.tables.lock().await.subscriptions.get(&id).cloned()
    }

    /// A target or header row with `children` child rows.
    pub async fn insert_parent(&self, target: CleanupTarget, children: usize) -> Uuid {
        let id = Uuid::new_v4();
        self.tables
            .lock()
            .await
            .parents
            .entry(target)
            .or_default()
            .insert(id, children);
        id
    }

    pub async fn parent_count(&self, target: CleanupTarget) -> usize {
        self.tables
            .lock()
            .await
            .parents
            .get(&target)
            .map_or(0, HashMap::len)
    }

    /// Simulate the database going away (or coming back).
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.tables.lock().await.unavailable = unavailable;
    }
}

#[async_trait]
impl FitnessStore for MemoryFitnessStore {
    async fn finish_fasting_if_open(
        &self,
        entry_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        tables.check()?;
        match tables.fasting.get_mut(&entry_id) {
            Some(entry) if entry.finished_at.is_none() => {
                entry.finished_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finish_subscription_if_active(
        &self,
        subscription_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        tables.check()?;
        match tables.subscriptions.get_mut(&subscription_id) {
            Some(sub) if sub.finished_at.is_none() => {
                sub.finished_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_orphans(&self, target: CleanupTarget) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        tables.check()?;
        let Some(rows) = tables.parents.get_mut(&target) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|_, children| *children > 0);
        Ok((before - rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fasting_finishes_once() {
        let store = MemoryFitnessStore::new();
        let now = Utc::now();
        let id = store.insert_fasting(now).await;

        assert!(store.finish_fasting_if_open(id, now).await.unwrap());
        assert!(
            !store
                .finish_fasting_if_open(id, now + chrono::Duration::hours(1))
                .await
                .unwrap()
        );
        assert_eq!(store.fasting(id).await.unwrap().finished_at, Some(now));
    }

    #[tokio::test]
    async fn test_missing_rows_are_no_ops() {
        let store = MemoryFitnessStore::new();
        let now = Utc::now();
        assert!(!store.finish_fasting_if_open(Uuid::new_v4(), now).await.unwrap());
        assert!(
            !store
                .finish_subscription_if_active(Uuid::new_v4(), now)
                .await
                .unwrap()
        );
        assert_eq!(store.delete_orphans(CleanupTarget::StepTarget).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_orphans_only_touches_its_table() {
        let store = MemoryFitnessStore::new();
        store.insert_parent(CleanupTarget::WaterTarget, 0).await;
        store.insert_parent(CleanupTarget::WaterTarget, 3).await;
        store.insert_parent(CleanupTarget::CalorieHeader, 0).await;

        assert_eq!(store.delete_orphans(CleanupTarget::WaterTarget).await.unwrap(), 1);
        assert_eq!(store.parent_count(CleanupTarget::WaterTarget).await, 1);
        assert_eq!(store.parent_count(CleanupTarget::CalorieHeader).await, 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = MemoryFitnessStore::new();
        store.set_unavailable(true).await;
        let err = store
            .delete_orphans(CleanupTarget::CalorieTarget)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
