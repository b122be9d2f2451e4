use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{IssueId, WorkerId};

/// Escalation levels for long-running workers, in increasing order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    Warning,
    Stuck,
    Critical,
}

impl EscalationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Stuck => "stuck",
            Self::Critical => "critical",
        }
    }
}

/// Recovery actions the stuck-worker handler can request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryActionKind {
    SendWarning,
    ExtendDeadline,
    ReassignTask,
    RestartWorker,
    EscalateCritical,
}

impl RecoveryActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendWarning => "send_warning",
            Self::ExtendDeadline => "extend_deadline",
            Self::ReassignTask => "reassign_task",
            Self::RestartWorker => "restart_worker",
            Self::EscalateCritical => "escalate_critical",
        }
    }
}

/// Record of a worker crossing an escalation threshold.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Escalation {
    pub worker_id: WorkerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<IssueId>,
    pub level: EscalationLevel,
    pub duration_ms: u64,
    pub recovery_attempts: u32,
    pub timestamp: DateTime<Utc>,
    pub suggested_action: RecoveryActionKind,
}

/// Bookkeeping for a single recovery attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub worker_id: WorkerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<IssueId>,
    pub attempt_number: u32,
    pub action: RecoveryActionKind,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(EscalationLevel::Warning < EscalationLevel::Stuck);
        assert!(EscalationLevel::Stuck < EscalationLevel::Critical);
    }
}
