use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{IssueId, WorkerId};

/// Self-reported worker status carried on a heartbeat.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatStatus {
    #[default]
    Idle,
    Busy,
    Draining,
}

/// A periodic liveness signal from a worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Heartbeat {
    pub worker_id: WorkerId,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<IssueId>,
    /// Percent complete of the current task, 0–100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    pub memory_usage: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_usage: Option<f64>,
    #[serde(default)]
    pub status: HeartbeatStatus,
}

/// Health classification derived from heartbeat history.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Zombie,
    Restarting,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Zombie => "zombie",
            Self::Restarting => "restarting",
        }
    }
}

/// Per-worker view held by the health monitor. Derived state only; the
/// monitor never mutates the worker itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthState {
    pub health_status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub missed_heartbeats: u32,
    #[serde(default)]
    pub restart_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_restart_at: Option<DateTime<Utc>>,
    /// Task last reported by the worker, used for reassignment on zombie.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<IssueId>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            health_status: HealthStatus::Healthy,
            last_heartbeat: None,
            missed_heartbeats: 0,
            restart_count: 0,
            last_restart_at: None,
            current_task: None,
        }
    }
}
