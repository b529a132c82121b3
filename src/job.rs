use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Kind of ingestion run the registry executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    NewsBackfill,
    PriceBackfill,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::NewsBackfill => "NEWS_BACKFILL",
            JobKind::PriceBackfill => "PRICE_BACKFILL",
        }
    }
}

/// Lifecycle state of a job. Transitions only run
/// PENDING -> RUNNING -> {COMPLETED, FAILED, CANCELLED}; terminal states
/// never transition out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

/// One ingestion run as the registry reports it. `progress` is a set of
/// kind-specific named counters (items seen/saved/failed and the like);
/// the server keeps them non-decreasing while the job is RUNNING. All
/// timestamps are epoch seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    #[serde(default)]
    pub progress: BTreeMap<String, u64>,
    pub created_at: u64,
    #[serde(default)]
    pub started_at: Option<u64>,
    #[serde(default)]
    pub completed_at: Option<u64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// True iff any job in the list is still doing work. Drives the adaptive
/// poll delay.
pub fn has_active_job(jobs: &[Job]) -> bool {
    jobs.iter().any(|j| j.status.is_active())
}

pub fn now_ts() -> u64 {
    chrono::Utc::now().timestamp() as u64
}
