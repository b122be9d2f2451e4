use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use foreman_common::ids::{IssueId, OrderId, WorkerId};
use foreman_common::types::{Bottleneck, Escalation, EscalationLevel, ProgressMetrics};

/// Everything the controller components announce to observers.
///
/// External consumers key off `kind()` and `payload()`, which are stable;
/// the Rust enum shape is not part of the contract.
#[derive(Clone, Debug)]
pub enum ControllerEvent {
    // Task lifecycle (worker pool)
    TaskCreated {
        order_id: OrderId,
        issue_id: IssueId,
    },
    TaskAssigned {
        worker_id: WorkerId,
        issue_id: IssueId,
        order_id: OrderId,
    },
    TaskCompleted {
        worker_id: WorkerId,
        issue_id: IssueId,
        order_id: OrderId,
        duration_ms: u64,
    },
    TaskFailed {
        worker_id: WorkerId,
        issue_id: IssueId,
        order_id: OrderId,
        error: String,
    },
    TaskRequeued {
        issue_id: IssueId,
        reason: String,
    },

    // Bounded queue
    SoftLimitWarning {
        size: usize,
        max_size: usize,
    },
    BackpressureActivated {
        ratio: f64,
    },
    BackpressureDeactivated {
        ratio: f64,
    },

    // Health monitor
    ZombieDetected {
        worker_id: WorkerId,
        missed_heartbeats: u32,
    },
    WorkerRestarted {
        worker_id: WorkerId,
    },
    WorkerRestartFailed {
        worker_id: WorkerId,
        restart_count: u32,
    },
    MemoryThresholdExceeded {
        worker_id: WorkerId,
        memory_usage: u64,
    },

    // Stuck-worker handler
    WorkerEscalated(Escalation),
    CriticalEscalation(Escalation),

    // Progress monitor
    ProgressUpdated(ProgressMetrics),
    BottleneckDetected(Bottleneck),
    BottleneckResolved {
        key: String,
    },
    MilestoneReached {
        percentage: u8,
    },
    AllCompleted,
}

impl ControllerEvent {
    /// Stable event kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "task_created",
            Self::TaskAssigned { .. } => "task_assigned",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::TaskRequeued { .. } => "task_requeued",
            Self::SoftLimitWarning { .. } => "soft_limit_warning",
            Self::BackpressureActivated { .. } => "backpressure_activated",
            Self::BackpressureDeactivated { .. } => "backpressure_deactivated",
            Self::ZombieDetected { .. } => "zombie_detected",
            Self::WorkerRestarted { .. } => "worker_restarted",
            Self::WorkerRestartFailed { .. } => "worker_restart_failed",
            Self::MemoryThresholdExceeded { .. } => "memory_threshold_exceeded",
            Self::WorkerEscalated(e) => match e.level {
                EscalationLevel::Warning => "worker_warning",
                EscalationLevel::Stuck => "worker_stuck",
                EscalationLevel::Critical => "worker_critical",
            },
            Self::CriticalEscalation(_) => "critical_escalation",
            Self::ProgressUpdated(_) => "progress_updated",
            Self::BottleneckDetected(_) => "bottleneck_detected",
            Self::BottleneckResolved { .. } => "bottleneck_resolved",
            Self::MilestoneReached { .. } => "milestone_reached",
            Self::AllCompleted => "all_completed",
        }
    }

    /// Stable key/value payload for transport-agnostic consumers.
    pub fn payload(&self) -> Value {
        match self {
            Self::TaskCreated { order_id, issue_id } => json!({
                "order_id": order_id,
                "issue_id": issue_id,
            }),
            Self::TaskAssigned {
                worker_id,
                issue_id,
                order_id,
            } => json!({
                "worker_id": worker_id,
                "issue_id": issue_id,
                "order_id": order_id,
            }),
            Self::TaskCompleted {
                worker_id,
                issue_id,
                order_id,
                duration_ms,
            } => json!({
                "worker_id": worker_id,
                "issue_id": issue_id,
                "order_id": order_id,
                "duration_ms": duration_ms,
            }),
            Self::TaskFailed {
                worker_id,
                issue_id,
                order_id,
                error,
            } => json!({
                "worker_id": worker_id,
                "issue_id": issue_id,
                "order_id": order_id,
                "error": error,
            }),
            Self::TaskRequeued { issue_id, reason } => json!({
                "issue_id": issue_id,
                "reason": reason,
            }),
            Self::SoftLimitWarning { size, max_size } => json!({
                "size": size,
                "max_size": max_size,
            }),
            Self::BackpressureActivated { ratio } | Self::BackpressureDeactivated { ratio } => {
                json!({ "ratio": ratio })
            }
            Self::ZombieDetected {
                worker_id,
                missed_heartbeats,
            } => json!({
                "worker_id": worker_id,
                "missed_heartbeats": missed_heartbeats,
            }),
            Self::WorkerRestarted { worker_id } => json!({ "worker_id": worker_id }),
            Self::WorkerRestartFailed {
                worker_id,
                restart_count,
            } => json!({
                "worker_id": worker_id,
                "restart_count": restart_count,
            }),
            Self::MemoryThresholdExceeded {
                worker_id,
                memory_usage,
            } => json!({
                "worker_id": worker_id,
                "memory_usage": memory_usage,
            }),
            Self::WorkerEscalated(e) | Self::CriticalEscalation(e) => json!({
                "worker_id": e.worker_id,
                "issue_id": e.issue_id,
                "level": e.level,
                "duration_ms": e.duration_ms,
                "recovery_attempts": e.recovery_attempts,
                "suggested_action": e.suggested_action,
            }),
            Self::ProgressUpdated(m) => serde_json::to_value(m).unwrap_or(Value::Null),
            Self::BottleneckDetected(b) => serde_json::to_value(b).unwrap_or(Value::Null),
            Self::BottleneckResolved { key } => json!({ "key": key }),
            Self::MilestoneReached { percentage } => json!({ "percentage": percentage }),
            Self::AllCompleted => json!({}),
        }
    }
}

type Listener = Arc<dyn Fn(&ControllerEvent) -> Result<(), String> + Send + Sync>;

/// Fan-out of controller events to registered listeners.
///
/// Listeners run serially in registration order; a listener error is logged
/// and swallowed so it cannot affect later listeners or the emitter.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&ControllerEvent) -> Result<(), String> + Send + Sync + 'static,
    {
        self.listeners.lock().unwrap().push(Arc::new(listener));
    }

    pub fn emit(&self, event: &ControllerEvent) {
        // Clone the listener list so a listener that emits further events
        // does not deadlock on the registry lock.
        let listeners: Vec<Listener> = self.listeners.lock().unwrap().clone();

        for listener in listeners {
            if let Err(e) = listener(event) {
                tracing::warn!(kind = event.kind(), error = %e, "Event listener failed");
            }
        }
    }
}
