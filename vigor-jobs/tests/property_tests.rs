//! Every handler must leave the same state whether it runs once or twice.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use proptest::prelude::*;
use std::sync::Arc;
use vigor_jobs::*;
use vigor_queue::Dispatch;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn target_strategy() -> impl Strategy<Value = CleanupTarget> {
    prop::sample::select(CleanupTarget::ALL.to_vec())
}

proptest! {
    #[test]
    fn close_fasting_window_is_idempotent(
        finished_first in any::<bool>(),
        end_offset_mins in -600i64..600,
        manual_offset_mins in 0i64..600,
    ) {
        let result = runtime().block_on(async {
            let start = Utc.with_ymd_and_hms(2026, 5, 10, 20, 0, 0).unwrap();
            let window_end = start + ChronoDuration::minutes(end_offset_mins);
            let manual = start + ChronoDuration::minutes(manual_offset_mins);

            let mut finished = Vec::new();
            for runs in [1, 2] {
                let store = MemoryFitnessStore::new();
                let entry = store.insert_fasting(start).await;
                if finished_first {
                    store.finish_fasting_manually(entry, manual).await;
                }
                let handlers = JobHandlers::new(Arc::new(store.clone()));
                let job = FitnessJob::from(CloseFastingWindow { entry_id: entry, window_end });
                for _ in 0..runs {
                    handlers.dispatch(job.clone()).await.unwrap();
                }
                finished.push(store.fasting(entry).await.unwrap().finished_at);
            }
            finished
        });

        prop_assert_eq!(result[0], result[1]);
        prop_assert!(result[0].is_some());
    }

    #[test]
    fn finish_subscription_is_idempotent(
        finished_first in any::<bool>(),
        ends_offset_days in 0i64..90,
    ) {
        let result = runtime().block_on(async {
            let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
            let ends_at = start + ChronoDuration::days(ends_offset_days);

            let mut finished = Vec::new();
            for runs in [1, 2] {
                let store = MemoryFitnessStore::new();
                let subscription = store.insert_subscription().await;
                let handlers = JobHandlers::new(Arc::new(store.clone()));
                if finished_first {
                    handlers
                        .dispatch(FitnessJob::from(FinishChallengeSubscription {
                            subscription_id: subscription,
                            ends_at: start,
                        }))
                        .await
                        .unwrap();
                }
                let job = FitnessJob::from(FinishChallengeSubscription {
                    subscription_id: subscription,
                    ends_at,
                });
                for _ in 0..runs {
                    handlers.dispatch(job.clone()).await.unwrap();
                }
                finished.push(store.subscription(subscription).await.unwrap().finished_at);
            }
            finished
        });

        prop_assert_eq!(result[0], result[1]);
    }

    #[test]
    fn cleanup_is_idempotent(
        rows in prop::collection::vec((target_strategy(), 0usize..3), 0..12),
        swept in target_strategy(),
    ) {
        let result = runtime().block_on(async {
            let mut remaining = Vec::new();
            for runs in [1, 2] {
                let store = MemoryFitnessStore::new();
                for (target, children) in &rows {
                    store.insert_parent(*target, *children).await;
                }
                let handlers = JobHandlers::new(Arc::new(store.clone()));
                for _ in 0..runs {
                    handlers.dispatch(FitnessJob::from(swept)).await.unwrap();
                }

                let mut counts = Vec::new();
                for target in CleanupTarget::ALL {
                    counts.push(store.parent_count(target).await);
                }
                remaining.push(counts);
            }
            remaining
        });

        prop_assert_eq!(&result[0], &result[1]);
    }

    #[test]
    fn log_is_idempotent(message in ".{0,64}") {
        let outcomes = runtime().block_on(async {
            let handlers = JobHandlers::new(Arc::new(MemoryFitnessStore::new()));
            let job = FitnessJob::from(LogLine(message.clone()));
            let first = handlers.dispatch(job.clone()).await;
            let second = handlers.dispatch(job).await;
            (first, second)
        });

        prop_assert!(outcomes.0.is_ok());
        prop_assert_eq!(outcomes.0, outcomes.1);
    }
}
