//! The fitness job set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vigor_queue::Job;

/// Tables swept by the periodic orphan cleanups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupTarget {
    /// Calorie targets no header refers to
    CalorieTarget,
    /// Calorie headers with no entries
    CalorieHeader,
    /// Step targets with no entries
    StepTarget,
    /// Water targets with no entries
    WaterTarget,
}

impl CleanupTarget {
    pub const ALL: [CleanupTarget; 4] = [
        CleanupTarget::CalorieTarget,
        CleanupTarget::CalorieHeader,
        CleanupTarget::StepTarget,
        CleanupTarget::WaterTarget,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupTarget::CalorieTarget => "calorie-target",
            CleanupTarget::CalorieHeader => "calorie-header",
            CleanupTarget::StepTarget => "step-target",
            CleanupTarget::WaterTarget => "water-target",
        }
    }

    /// Stable recurring schedule id of the sweep.
    pub fn schedule_id(&self) -> &'static str {
        match self {
            CleanupTarget::CalorieTarget => "cleanup-calorie-target",
            CleanupTarget::CalorieHeader => "cleanup-calorie-header",
            CleanupTarget::StepTarget => "cleanup-step-target",
            CleanupTarget::WaterTarget => "cleanup-water-target",
        }
    }
}

impl std::fmt::Display for CleanupTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Close a fasting entry at the end of its window, unless the user already
/// finished it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseFastingWindow {
    pub entry_id: Uuid,
    pub window_end: DateTime<Utc>,
}

/// Finish a challenge subscription once its last day has elapsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishChallengeSubscription {
    pub subscription_id: Uuid,
    /// Recorded as the finish time, so replays write the same value.
    pub ends_at: DateTime<Utc>,
}

/// A line for the worker log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogLine(pub String);

impl From<&str> for LogLine {
    fn from(s: &str) -> Self {
        LogLine(s.to_string())
    }
}

/// Every job the fitness backend schedules.
///
/// Stored as `{"kind": "...", "payload": ...}`; cleanup kinds carry no
/// payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum FitnessJob {
    #[serde(rename = "close-fasting-window")]
    CloseFastingWindow(CloseFastingWindow),

    #[serde(rename = "finish-challenge-subscription")]
    FinishChallengeSubscription(FinishChallengeSubscription),

    #[serde(rename = "periodic-cleanup:calorie-target")]
    CleanupCalorieTarget,

    #[serde(rename = "periodic-cleanup:calorie-header")]
    CleanupCalorieHeader,

    #[serde(rename = "periodic-cleanup:step-target")]
    CleanupStepTarget,

    #[serde(rename = "periodic-cleanup:water-target")]
    CleanupWaterTarget,

    #[serde(rename = "log")]
    Log(LogLine),
}

impl FitnessJob {
    pub fn cleanup_target(&self) -> Option<CleanupTarget> {
        match self {
            FitnessJob::CleanupCalorieTarget => Some(CleanupTarget::CalorieTarget),
            FitnessJob::CleanupCalorieHeader => Some(CleanupTarget::CalorieHeader),
            FitnessJob::CleanupStepTarget => Some(CleanupTarget::StepTarget),
            FitnessJob::CleanupWaterTarget => Some(CleanupTarget::WaterTarget),
            _ => None,
        }
    }
}

impl Job for FitnessJob {}

impl From<CloseFastingWindow> for FitnessJob {
    fn from(payload: CloseFastingWindow) -> Self {
        FitnessJob::CloseFastingWindow(payload)
    }
}

impl From<FinishChallengeSubscription> for FitnessJob {
    fn from(payload: FinishChallengeSubscription) -> Self {
        FitnessJob::FinishChallengeSubscription(payload)
    }
}

impl From<CleanupTarget> for FitnessJob {
    fn from(target: CleanupTarget) -> Self {
        match target {
            CleanupTarget::CalorieTarget => FitnessJob::CleanupCalorieTarget,
            CleanupTarget::CalorieHeader => FitnessJob::CleanupCalorieHeader,
            CleanupTarget::StepTarget => FitnessJob::CleanupStepTarget,
            CleanupTarget::WaterTarget => FitnessJob::CleanupWaterTarget,
        }
    }
}

impl From<LogLine> for FitnessJob {
    fn from(line: LogLine) -> Self {
        FitnessJob::Log(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vigor_queue::{DecodeError, decode, encode};

    #[test]
    fn test_every_kind_is_registered() {
        let jobs: Vec<FitnessJob> = vec![
            CloseFastingWindow {
                entry_id: Uuid::new_v4(),
                window_end: Utc::now(),
            }
            .into(),
            FinishChallengeSubscription {
                subscription_id: Uuid::new_v4(),
                ends_at: Utc::now(),
            }
            .into(),
            LogLine::from("hi").into(),
        ];
        let cleanups = CleanupTarget::ALL.map(FitnessJob::from);

        let mut seen = Vec::new();
        for job in jobs.iter().chain(cleanups.iter()) {
            let (kind, payload) = encode(job).unwrap();
            assert!(FitnessJob::kinds().contains(&kind.as_str()), "{}", kind);
            assert_eq!(&decode::<FitnessJob>(&kind, &payload).unwrap(), job);
            seen.push(kind);
        }
        let mut declared = FitnessJob::kinds().to_vec();
        declared.sort_unstable();
        seen.sort_unstable();
        assert_eq!(declared, seen);
    }

    #[test]
    fn test_cleanup_mapping() {
        for target in CleanupTarget::ALL {
            let job = FitnessJob::from(target);
            assert_eq!(job.cleanup_target(), Some(target));
            let (kind, _) = encode(&job).unwrap();
            assert_eq!(kind, format!("periodic-cleanup:{}", target));
            assert_eq!(target.schedule_id(), format!("cleanup-{}", target));
        }
    }

    #[test]
    fn test_stored_shape() {
        let entry_id = Uuid::nil();
        let (kind, payload) = encode(&FitnessJob::from(CloseFastingWindow {
            entry_id,
            window_end: "2026-05-10T08:00:00Z".parse().unwrap(),
        }))
        .unwrap();

        assert_eq!(kind, "close-fasting-window");
        assert_eq!(
            payload,
            json!({ "entry_id": entry_id, "window_end": "2026-05-10T08:00:00Z" })
        );

        let (_, payload) = encode(&FitnessJob::Log(LogLine::from("hello"))).unwrap();
        assert_eq!(payload, json!("hello"));
    }

    #[test]
    fn test_removed_kind_does_not_decode() {
        let err = decode::<FitnessJob>("cleanupStepTarget", &serde_json::Value::Null).unwrap_err();
        assert_eq!(err, DecodeError::UnknownKind("cleanupStepTarget".to_string()));
    }
}
