//! Runtime record types flowing out of the engine: per-request results,
//! periodic progress snapshots, per-second buckets, and the terminal
//! run summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Body bytes handed to assertion/extractor logic are capped here.
pub const BODY_EVAL_CAP: usize = 1024 * 1024;
/// Body bytes preserved on the result record are capped here.
pub const BODY_RECORD_CAP: usize = 4 * 1024;

/// What assertion and extractor rules see of a completed dispatch.
/// For a transport failure this is the synthetic error response:
/// status 0, no headers, empty body, `transport_failed` set.
#[derive(Debug, Clone, Copy)]
pub struct ResponseView<'a> {
    pub status: u16,
    pub elapsed_ms: u64,
    pub headers: &'a HashMap<String, String>,
    pub body: &'a [u8],
    pub transport_failed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionOutcome {
    pub id: String,
    pub name: String,
    pub passed: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub id: String,
    pub name: String,
    pub variable: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub message: String,
}

/// One executed request. `status` is 0 when the request never produced
/// a response; `error` then carries the transport failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub request_id: String,
    pub request_name: String,
    pub group_name: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub elapsed_ms: u64,
    pub response_size: u64,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub assertions: Vec<AssertionOutcome>,
    pub assertions_passed: bool,
    pub extractions: Vec<ExtractionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultRecord {
    /// Counts toward `successful_requests`: transport succeeded and
    /// every assertion passed.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.assertions_passed
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub completed_requests: u64,
    pub total_errors: u64,
    pub active_vus: u32,
    pub elapsed_ms: u64,
    pub current_rps: f64,
    pub mean_ms: f64,
    pub p95_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub timeline: Vec<SecondBucket>,
}

/// Per-second aggregate for post-hoc charts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecondBucket {
    pub second: u64,
    pub requests: u64,
    pub errors: u64,
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub plan_id: String,
    pub plan_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub min_ms: u64,
    pub mean_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub max_ms: u64,
    pub avg_rps: f64,
    pub total_bytes: u64,
    pub status_codes: HashMap<u16, u64>,
    pub errors: HashMap<String, u64>,
    pub timeline: Vec<SecondBucket>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStateKind {
    Idle,
    Running,
    Stopping,
    Completed,
    Error,
}

impl EngineStateKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineStateKind::Completed | EngineStateKind::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineStateKind::Idle => "idle",
            EngineStateKind::Running => "running",
            EngineStateKind::Stopping => "stopping",
            EngineStateKind::Completed => "completed",
            EngineStateKind::Error => "error",
        }
    }
}

/// `status()` reply: the state kind plus the latest counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: EngineStateKind,
    pub completed_requests: u64,
    pub total_errors: u64,
    pub active_vus: u32,
    pub elapsed_ms: u64,
}
