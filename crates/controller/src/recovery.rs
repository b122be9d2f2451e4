use async_trait::async_trait;

use foreman_common::ids::{IssueId, WorkerId};
use foreman_common::types::Escalation;
use foreman_common::Result;

/// Recovery requests from the health monitor and stuck-worker handler.
///
/// A single tagged action type with one dispatcher replaces per-callback
/// setters; the collaborator that owns the pool and the worker adapter
/// decides how each action is carried out.
#[derive(Clone, Debug)]
pub enum RecoveryAction {
    SendWarning {
        worker_id: WorkerId,
        issue_id: Option<IssueId>,
    },
    ExtendDeadline {
        worker_id: WorkerId,
        extension_ms: u64,
    },
    ReassignTask {
        issue_id: IssueId,
        from_worker: WorkerId,
    },
    RestartWorker {
        worker_id: WorkerId,
    },
    EscalateCritical {
        escalation: Escalation,
    },
    PausePipeline {
        reason: String,
    },
}

impl RecoveryAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SendWarning { .. } => "send_warning",
            Self::ExtendDeadline { .. } => "extend_deadline",
            Self::ReassignTask { .. } => "reassign_task",
            Self::RestartWorker { .. } => "restart_worker",
            Self::EscalateCritical { .. } => "escalate_critical",
            Self::PausePipeline { .. } => "pause_pipeline",
        }
    }
}

/// What a dispatched action accomplished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Handled,
    /// For `ReassignTask`: the worker that took the task, if any; `None`
    /// means it went back to the queue.
    Reassigned(Option<WorkerId>),
}

/// The single recovery dispatcher provided by the controller.
#[async_trait]
pub trait RecoverySink: Send + Sync {
    async fn dispatch(&self, action: RecoveryAction) -> Result<RecoveryOutcome>;
}
