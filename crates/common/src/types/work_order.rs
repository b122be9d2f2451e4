use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{IssueId, OrderId, WorkerId};

/// Status of one direct dependency at work-order creation time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub issue_id: IssueId,
    pub status: String,
}

/// Document and file references handed to the worker alongside the issue.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkOrderContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sds_component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srs_feature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prd_requirement: Option<String>,
    #[serde(default)]
    pub related_files: Vec<String>,
    #[serde(default)]
    pub dependencies_status: Vec<DependencyStatus>,
}

/// The immutable instruction issued to a worker to execute one issue.
///
/// Every issue has at most one active (assigned or queued, uncompleted)
/// work order at a time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkOrder {
    pub order_id: OrderId,
    pub issue_id: IssueId,
    pub created_at: DateTime<Utc>,
    /// Priority score at creation time; used when re-queueing.
    pub priority: i64,
    #[serde(default)]
    pub context: WorkOrderContext,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

/// Outcome reported by the worker adapter for a completed order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkResult {
    pub order_id: OrderId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkResult {
    pub fn success(order_id: OrderId) -> Self {
        Self {
            order_id,
            success: true,
            summary: None,
            error: None,
        }
    }

    pub fn failure(order_id: OrderId, error: impl Into<String>) -> Self {
        Self {
            order_id,
            success: false,
            summary: None,
            error: Some(error.into()),
        }
    }
}

/// A single task completion, kept for duration statistics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub order_id: OrderId,
    pub issue_id: IssueId,
    pub worker_id: WorkerId,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
}
