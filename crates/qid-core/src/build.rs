//! Build records.
//!
//! A build is one persisted execution of a job. Builds are identified by a
//! per-job monotonic id assigned by the store on create.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Build lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Started,
    Succeeded,
    Failed,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Succeeded | Status::Failed)
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Started
    }
}

/// One persisted execution record of a job.
///
/// A build in state `started` has zero duration; a terminal build has a
/// positive duration and is never mutated again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Build {
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub status: Status,
    /// Steps recorded by the get phase.
    #[serde(default)]
    pub get: Vec<Step>,
    /// Steps recorded by the task phase.
    #[serde(default)]
    pub task: Vec<Step>,
    /// Job-level hook steps recorded at the end.
    #[serde(default)]
    pub job: Vec<Step>,
    /// Internal failure detail; user-command failures live in step logs
    /// instead.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "duration_millis")]
    pub duration: Duration,
}

impl Build {
    /// A fresh `started` build stamped with the current time.
    pub fn started(now: DateTime<Utc>) -> Build {
        Build {
            status: Status::Started,
            started_at: Some(now),
            ..Build::default()
        }
    }
}

/// Progress record for a single step of a build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    /// Id of the resource version the step was bound to, for get steps.
    #[serde(default)]
    pub version_id: Option<u32>,
    #[serde(default)]
    pub logs: String,
    #[serde(default, with = "duration_millis")]
    pub duration: Duration,
}

/// Durations persist as integer milliseconds.
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal() {
        assert!(!Status::Started.is_terminal());
        assert!(Status::Succeeded.is_terminal());
        assert!(Status::Failed.is_terminal());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Status::Succeeded).unwrap(),
            "\"succeeded\""
        );
    }

    #[test]
    fn test_duration_roundtrips_as_millis() {
        let b = Build {
            duration: Duration::from_millis(1500),
            ..Build::default()
        };
        let raw = serde_json::to_value(&b).unwrap();
        assert_eq!(raw["duration"], 1500);
        let back: Build = serde_json::from_value(raw).unwrap();
        assert_eq!(back.duration, Duration::from_millis(1500));
    }
}
