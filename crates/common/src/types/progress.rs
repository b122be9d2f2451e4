use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{IssueId, WorkerId};
use crate::types::{HealthState, Worker};

/// Point-in-time view of the worker pool, copied out for observers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PoolStatus {
    pub total_workers: usize,
    pub idle_workers: usize,
    pub working_workers: usize,
    pub error_workers: usize,
    pub workers: Vec<Worker>,
}

/// Point-in-time view of the bounded queue.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueueStatus {
    pub size: usize,
    pub max_size: usize,
    pub dead_letter_size: usize,
    pub backpressure_active: bool,
}

/// Health-monitor view for one worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub worker_id: WorkerId,
    pub state: HealthState,
}

/// Derived progress metrics emitted on every sampling tick.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProgressMetrics {
    pub completed: u64,
    pub failed: u64,
    pub in_progress: u64,
    pub pending: u64,
    pub blocked: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_issues: Option<u64>,
    /// Percent complete, 0–100.
    pub percentage: f64,
    /// Mean completion duration in milliseconds, 0 when nothing completed.
    pub average_completion_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<DateTime<Utc>>,
}

/// Bottleneck classes, reported with severity 1–5.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckKind {
    StuckWorker,
    BlockedChain,
    ResourceContention,
}

impl BottleneckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StuckWorker => "stuck_worker",
            Self::BlockedChain => "blocked_chain",
            Self::ResourceContention => "resource_contention",
        }
    }
}

/// An observed condition reducing overall throughput.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bottleneck {
    pub kind: BottleneckKind,
    /// Stable key for detected/resolved pairing (e.g. `stuck_worker:worker-2`).
    pub key: String,
    pub severity: u8,
    pub description: String,
    pub detected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
}

/// Recent-activity entry kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Completed,
    Started,
    Failed,
    Blocked,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Started => "started",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }
}

/// One entry in the capped recent-activity deque, newest first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: ActivityKind,
    pub issue_id: IssueId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
