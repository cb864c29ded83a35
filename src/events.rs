//! The asynchronous event stream pushed to subscribers: status
//! transitions, periodic progress, per-request results, and the
//! one-shot completion summary.

use crate::types::{EngineStateKind, ProgressSnapshot, ResultRecord, Summary};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum EngineEvent {
    #[serde(rename = "test-status")]
    Status(StatusChange),
    #[serde(rename = "test-progress")]
    Progress(ProgressSnapshot),
    #[serde(rename = "test-result")]
    Result(Box<ResultRecord>),
    #[serde(rename = "test-complete")]
    Complete(Box<Summary>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: EngineStateKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusChange {
    pub fn new(status: EngineStateKind) -> Self {
        Self {
            status,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialise_with_kebab_case_names() {
        let event = EngineEvent::Status(StatusChange::new(EngineStateKind::Running));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "test-status");
        assert_eq!(json["payload"]["status"], "running");
        assert!(json["payload"].get("error").is_none());
    }

    #[test]
    fn progress_event_round_trips() {
        let event = EngineEvent::Progress(ProgressSnapshot::default());
        let json = serde_json::to_string(&event).unwrap();
        let back: EngineEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, EngineEvent::Progress(_)));
    }
}
