use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{IssueId, WorkerId};

/// Worker lifecycle states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Idle,
    Working,
    Error,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Error => "error",
        }
    }
}

/// A pool worker.
///
/// Invariant: `status == Working` iff both `current_issue` and `started_at`
/// are set; `Idle` implies both are cleared.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub status: WorkerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_issue: Option<IssueId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_tasks: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Worker {
    pub fn idle(id: WorkerId) -> Self {
        Self {
            id,
            status: WorkerStatus::Idle,
            current_issue: None,
            started_at: None,
            completed_tasks: 0,
            last_error: None,
        }
    }

    /// Check the working ⇔ (current_issue ∧ started_at) invariant.
    pub fn invariant_holds(&self) -> bool {
        match self.status {
            WorkerStatus::Working => self.current_issue.is_some() && self.started_at.is_some(),
            WorkerStatus::Idle => self.current_issue.is_none() && self.started_at.is_none(),
            WorkerStatus::Error => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_invariant() {
        let w = Worker::idle(WorkerId::numbered(1));
        assert!(w.invariant_holds());

        let mut working = w.clone();
        working.status = WorkerStatus::Working;
        assert!(!working.invariant_holds());

        working.current_issue = Some(IssueId::from("A"));
        working.started_at = Some(Utc::now());
        assert!(working.invariant_holds());
    }
}
