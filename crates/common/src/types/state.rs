use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{IssueId, OrderId};
use crate::types::Worker;

/// One queued issue awaiting dispatch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkQueueEntry {
    pub issue_id: IssueId,
    pub priority_score: i64,
    pub queued_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
}

/// A queue entry displaced into the dead-letter list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    #[serde(flatten)]
    pub entry: WorkQueueEntry,
    pub moved_at: DateTime<Utc>,
    pub reason: String,
}

/// Serializable queue contents for persistence and observers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default)]
    pub entries: Vec<WorkQueueEntry>,
    #[serde(default)]
    pub dead_letter: Vec<DeadLetterEntry>,
}

/// Serializable pool contents for persistence and observers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PoolSnapshot {
    #[serde(default)]
    pub workers: Vec<Worker>,
    #[serde(default)]
    pub order_counter: u64,
}

/// The persisted controller state, written atomically as JSON.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControllerState {
    pub project_id: String,
    pub last_updated: DateTime<Utc>,
    pub pool: PoolSnapshot,
    pub queue: QueueSnapshot,
    #[serde(default)]
    pub completed_order_ids: Vec<OrderId>,
    #[serde(default)]
    pub failed_order_ids: Vec<OrderId>,
}
