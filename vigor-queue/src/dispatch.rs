//! Typed job kinds and how stored records reach their handlers.
//!
//! A service describes all of its job kinds as one closed enum that
//! implements [`Job`]. The enum is persisted adjacently tagged, so a record
//! carries its kind name and its payload side by side:
//!
//! ```json
//! { "kind": "finish-challenge-subscription", "payload": { "subscription_id": 7 } }
//! ```
//!
//! Dispatch is an exhaustive `match` over that enum, so adding a kind
//! without a handler does not compile. The kind names themselves come from
//! the enum's serde attributes and are never listed a second time. Records
//! whose kind is not in the enum can still arrive from storage, for example
//! after a deploy removed a kind; [`decode`] reports them as
//! [`DecodeError::UnknownKind`].

use crate::error::{QueueError, QueueResult};
use crate::job::JobData;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::value::MapDeserializer;
use serde::de::{self, DeserializeOwned};
use serde_json::{Map, Value};
use std::fmt::{self, Debug, Display};
use thiserror::Error;

/// Field holding the kind name in a serialized job.
pub const KIND_FIELD: &str = "kind";

/// Field holding the payload in a serialized job.
pub const PAYLOAD_FIELD: &str = "payload";

/// The closed set of job kinds a service schedules and handles.
///
/// Implementors are enums with
/// `#[serde(tag = "kind", content = "payload")]`; the impl itself is empty.
pub trait Job: Serialize + DeserializeOwned + Debug + Send + Sync + 'static {
    /// Every kind name this enum can decode, as its serde attributes
    /// name them. Empty when the type is not a tagged enum.
    fn kinds() -> &'static [&'static str] {
        declared_kinds::<Self>()
    }
}

/// Deserializer error that keeps the variant list serde reports for an
/// unrecognized tag.
#[derive(Debug)]
enum KindListing {
    Declared(&'static [&'static str]),
    Other(String),
}

impl Display for KindListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KindListing::Declared(kinds) => write!(f, "kinds: {}", kinds.join(", ")),
            KindListing::Other(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for KindListing {}

impl de::Error for KindListing {
    fn custom<T: Display>(msg: T) -> Self {
        KindListing::Other(msg.to_string())
    }

    fn unknown_variant(_variant: &str, expected: &'static [&'static str]) -> Self {
        KindListing::Declared(expected)
    }
}

/// Tag no job enum declares; deserializing it makes serde name the ones it does.
const UNDECLARED_KIND: &str = "\u{0}";

fn declared_kinds<J: Job>() -> &'static [&'static str] {
    let tagged =
        MapDeserializer::<_, KindListing>::new(std::iter::once((KIND_FIELD, UNDECLARED_KIND)));
    match J::deserialize(tagged) {
        Err(KindListing::Declared(kinds)) => kinds,
        _ => &[],
    }
}

/// Why a stored record could not be turned back into a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("no handler registered for job kind '{0}'")]
    UnknownKind(String),

    #[error("malformed payload for job kind '{kind}': {reason}")]
    MalformedPayload { kind: String, reason: String },
}

/// Split a job into its kind name and payload for storage.
pub fn encode<J: Job>(job: &J) -> QueueResult<(String, JobData)> {
    let value = serde_json::to_value(job)?;
    if let Value::Object(mut map) = value {
        if let Some(Value::String(kind)) = map.remove(KIND_FIELD) {
            let payload = map.remove(PAYLOAD_FIELD).unwrap_or(Value::Null);
            return Ok((kind, payload));
        }
        return Err(QueueError::Serialization(format!(
            "job {:?} serialized without a '{}' field",
            job, KIND_FIELD
        )));
    }
    Err(QueueError::Serialization(format!(
        "job {:?} serialized to {} instead of a tagged object",
        job, value
    )))
}

/// Rebuild a job from a stored kind name and payload.
pub fn decode<J: Job>(kind: &str, payload: &JobData) -> Result<J, DecodeError> {
    let mut map = Map::new();
    map.insert(KIND_FIELD.to_string(), Value::String(kind.to_string()));
    if !payload.is_null() {
        map.insert(PAYLOAD_FIELD.to_string(), payload.clone());
    }

    serde_json::from_value(Value::Object(map)).map_err(|e| {
        if J::kinds().contains(&kind) {
            DecodeError::MalformedPayload {
                kind: kind.to_string(),
                reason: e.to_string(),
            }
        } else {
            DecodeError::UnknownKind(kind.to_string())
        }
    })
}

/// Failure reported by a handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// Worth retrying: the database was unreachable, a timeout, a lock.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Retrying cannot help. The record is moved to dead immediately.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl JobError {
    pub fn transient(err: impl Display) -> Self {
        JobError::Transient(err.to_string())
    }

    pub fn configuration(err: impl Display) -> Self {
        JobError::Configuration(err.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Transient(_))
    }
}

impl From<DecodeError> for JobError {
    fn from(err: DecodeError) -> Self {
        JobError::Configuration(err.to_string())
    }
}

/// Outcome of one handler invocation.
pub type JobResult = Result<(), JobError>;

/// Routes a decoded job to its handler.
#[async_trait]
pub trait Dispatch<J: Job>: Send + Sync + 'static {
    async fn dispatch(&self, job: J) -> JobResult;
}

/// Handles one payload type.
///
/// Handlers run at least once per firing and may run again after a lost
/// lease, so they must be idempotent.
#[async_trait]
pub trait Handler<P: Send + 'static>: Send + Sync {
    async fn handle(&self, payload: P) -> JobResult;
}

/// Kind name with a payload preview, for log lines.
pub struct Described<'a>(pub &'a str, pub &'a JobData);

impl fmt::Display for Described<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.1.is_null() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "{} {}", self.0, self.1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
    enum Chore {
        Sweep { room: String },
        Water(u32),
        Nap,
    }

    impl Job for Chore {}

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "kind", content = "payload")]
    enum Errand {
        #[serde(rename = "errand:post")]
        Post,
        #[serde(rename = "errand:groceries")]
        Groceries { items: u32 },
    }

    impl Job for Errand {}

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Untagged {
        note: String,
    }

    impl Job for Untagged {}

    #[test]
    fn test_kinds_follow_serde_names() {
        assert_eq!(Chore::kinds(), &["sweep", "water", "nap"]);
        assert_eq!(Errand::kinds(), &["errand:post", "errand:groceries"]);
        assert!(Untagged::kinds().is_empty());
    }

    #[test]
    fn test_every_declared_kind_decodes() {
        let (kind, payload) = encode(&Errand::Groceries { items: 4 }).unwrap();
        assert_eq!(kind, "errand:groceries");
        assert!(Errand::kinds().contains(&kind.as_str()));
        assert_eq!(
            decode::<Errand>(&kind, &payload).unwrap(),
            Errand::Groceries { items: 4 }
        );
        assert_eq!(decode::<Errand>("errand:post", &Value::Null).unwrap(), Errand::Post);
    }

    #[test]
    fn test_encode_rejects_untagged_type() {
        let err = encode(&Untagged {
            note: "x".to_string(),
        })
        .unwrap_err();
        assert!(matches!(err, QueueError::Serialization(_)));
    }

    #[test]
    fn test_encode_splits_kind_and_payload() {
        let (kind, payload) = encode(&Chore::Sweep {
            room: "hall".to_string(),
        })
        .unwrap();
        assert_eq!(kind, "sweep");
        assert_eq!(payload, json!({ "room": "hall" }));
    }

    #[test]
    fn test_unit_kind_has_null_payload() {
        let (kind, payload) = encode(&Chore::Nap).unwrap();
        assert_eq!(kind, "nap");
        assert!(payload.is_null());
        assert_eq!(decode::<Chore>("nap", &payload).unwrap(), Chore::Nap);
    }

    #[test]
    fn test_decode_known_kind() {
        let job: Chore = decode("water", &json!(3)).unwrap();
        assert_eq!(job, Chore::Water(3));
    }

    #[test]
    fn test_decode_unknown_kind() {
        let err = decode::<Chore>("cleanupStepTarget", &Value::Null).unwrap_err();
        assert_eq!(err, DecodeError::UnknownKind("cleanupStepTarget".to_string()));
        assert!(!JobError::from(err).is_retryable());
    }

    #[test]
    fn test_decode_malformed_payload() {
        let err = decode::<Chore>("water", &json!("lots")).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedPayload { ref kind, .. } if kind == "water"));
    }

    #[test]
    fn test_described() {
        assert_eq!(Described("nap", &Value::Null).to_string(), "nap");
        assert_eq!(Described("water", &json!(3)).to_string(), "water 3");
    }
}
