use thiserror::Error;

use crate::ids::{IssueId, OrderId, WorkerId};

/// How bad an error is for the pipeline as a whole.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// How the caller should treat an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Halts the containing operation; the pipeline may resume other work.
    Fatal,
    /// Surfaced to the caller without retry.
    Recoverable,
    /// Retried at the boundary (enqueue caller, lock acquirer).
    Transient,
}

/// Top-level error type for controller operations.
#[derive(Debug, Error)]
pub enum ControllerError {
    // --- Graph analysis ---
    #[error("Graph not found: {path}")]
    GraphNotFound { path: String },

    #[error("Graph parse error: {0}")]
    GraphParse(String),

    #[error("Graph validation failed: {}", errors.join("; "))]
    GraphValidation { errors: Vec<String> },

    #[error("Graph contains no nodes")]
    EmptyGraph,

    #[error("Issue not found in graph: {0}")]
    IssueNotFound(IssueId),

    // --- Worker pool ---
    #[error("No available worker")]
    NoAvailableWorker,

    #[error("Worker not found: {0}")]
    WorkerNotFound(WorkerId),

    #[error("Worker not available: {worker_id} is {status}")]
    WorkerNotAvailable { worker_id: WorkerId, status: String },

    #[error("Work order not found: {0}")]
    WorkOrderNotFound(OrderId),

    #[error("Work order creation failed for {issue_id}: {reason}")]
    WorkOrderCreation { issue_id: IssueId, reason: String },

    #[error("Worker assignment failed: {worker_id} on {issue_id}: {reason}")]
    WorkerAssignment {
        worker_id: WorkerId,
        issue_id: IssueId,
        reason: String,
    },

    #[error("Controller state persistence failed: {0}")]
    StatePersistence(String),

    #[error("Dependencies not resolved for {0}")]
    DependenciesNotResolved(IssueId),

    // --- Bounded queue ---
    #[error("Queue full ({size}/{max_size})")]
    QueueFull { size: usize, max_size: usize },

    #[error("Queue memory limit exceeded ({used} of {limit} bytes)")]
    MemoryLimit { used: usize, limit: usize },

    #[error("Backpressure active (ratio {ratio:.2})")]
    BackpressureActive { ratio: f64 },

    #[error("Task priority {score} too low for full queue (minimum in queue: {min_in_queue})")]
    TaskPriorityTooLow { score: i64, min_in_queue: i64 },

    // --- Health / stuck-worker ---
    #[error("Worker {0} is a zombie")]
    ZombieWorker(WorkerId),

    #[error("Worker restart failed for {worker_id}: {reason}")]
    WorkerRestart { worker_id: WorkerId, reason: String },

    #[error("Worker {worker_id} exceeded max restarts ({max_restarts})")]
    MaxRestartsExceeded { worker_id: WorkerId, max_restarts: u32 },

    #[error("Task reassignment failed for {issue_id}: {reason}")]
    TaskReassignment { issue_id: IssueId, reason: String },

    #[error("Stuck-worker recovery failed for {worker_id}: {reason}")]
    StuckWorkerRecovery { worker_id: WorkerId, reason: String },

    #[error("Worker {worker_id} critically stuck after {duration_ms}ms")]
    StuckWorkerCritical { worker_id: WorkerId, duration_ms: u64 },

    #[error("Worker {worker_id} exceeded max recovery attempts ({max_attempts})")]
    MaxRecoveryAttemptsExceeded { worker_id: WorkerId, max_attempts: u32 },

    // --- Distributed lock ---
    #[error("Lock contention on {path} after {attempts} attempts")]
    LockContention { path: String, attempts: u32 },

    #[error("Lock on {path} stolen from {previous_holder}")]
    LockStolen { path: String, previous_holder: String },

    // --- Monitors ---
    #[error("Monitor already running")]
    MonitorAlreadyRunning,

    #[error("Monitor not running")]
    MonitorNotRunning,

    #[error("Report generation failed: {0}")]
    ReportGeneration(String),

    #[error("Report persistence failed: {0}")]
    ReportPersistence(String),

    // --- Operational ---
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControllerError {
    pub fn severity(&self) -> Severity {
        match self {
            Self::MaxRestartsExceeded { .. }
            | Self::StuckWorkerCritical { .. }
            | Self::MaxRecoveryAttemptsExceeded { .. } => Severity::Critical,

            Self::GraphNotFound { .. }
            | Self::GraphParse(_)
            | Self::GraphValidation { .. }
            | Self::EmptyGraph
            | Self::ZombieWorker(_)
            | Self::WorkerRestart { .. }
            | Self::StatePersistence(_) => Severity::High,

            Self::MonitorAlreadyRunning | Self::MonitorNotRunning => Severity::Low,

            _ => Severity::Medium,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::GraphNotFound { .. }
            | Self::GraphParse(_)
            | Self::GraphValidation { .. }
            | Self::EmptyGraph
            | Self::IssueNotFound(_) => ErrorCategory::Fatal,

            Self::NoAvailableWorker
            | Self::QueueFull { .. }
            | Self::MemoryLimit { .. }
            | Self::BackpressureActive { .. }
            | Self::LockContention { .. } => ErrorCategory::Transient,

            _ => ErrorCategory::Recoverable,
        }
    }

    /// Structured context for logging and escalation payloads.
    pub fn context(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::GraphNotFound { path } => vec![("path", path.clone())],
            Self::GraphValidation { errors } => {
                vec![("error_count", errors.len().to_string())]
            }
            Self::IssueNotFound(id) | Self::DependenciesNotResolved(id) => {
                vec![("issue_id", id.to_string())]
            }
            Self::WorkerNotFound(id) | Self::ZombieWorker(id) => {
                vec![("worker_id", id.to_string())]
            }
            Self::WorkerNotAvailable { worker_id, status } => vec![
                ("worker_id", worker_id.to_string()),
                ("status", status.clone()),
            ],
            Self::WorkOrderNotFound(id) => vec![("order_id", id.to_string())],
            Self::WorkOrderCreation { issue_id, reason } => vec![
                ("issue_id", issue_id.to_string()),
                ("reason", reason.clone()),
            ],
            Self::WorkerAssignment {
                worker_id,
                issue_id,
                reason,
            } => vec![
                ("worker_id", worker_id.to_string()),
                ("issue_id", issue_id.to_string()),
                ("reason", reason.clone()),
            ],
            Self::QueueFull { size, max_size } => vec![
                ("size", size.to_string()),
                ("max_size", max_size.to_string()),
            ],
            Self::MemoryLimit { used, limit } => {
                vec![("used", used.to_string()), ("limit", limit.to_string())]
            }
            Self::TaskPriorityTooLow {
                score,
                min_in_queue,
            } => vec![
                ("score", score.to_string()),
                ("min_in_queue", min_in_queue.to_string()),
            ],
            Self::WorkerRestart { worker_id, reason }
            | Self::StuckWorkerRecovery { worker_id, reason } => vec![
                ("worker_id", worker_id.to_string()),
                ("reason", reason.clone()),
            ],
            Self::MaxRestartsExceeded {
                worker_id,
                max_restarts,
            } => vec![
                ("worker_id", worker_id.to_string()),
                ("max_restarts", max_restarts.to_string()),
            ],
            Self::TaskReassignment { issue_id, reason } => vec![
                ("issue_id", issue_id.to_string()),
                ("reason", reason.clone()),
            ],
            Self::StuckWorkerCritical {
                worker_id,
                duration_ms,
            } => vec![
                ("worker_id", worker_id.to_string()),
                ("duration_ms", duration_ms.to_string()),
            ],
            Self::MaxRecoveryAttemptsExceeded {
                worker_id,
                max_attempts,
            } => vec![
                ("worker_id", worker_id.to_string()),
                ("max_attempts", max_attempts.to_string()),
            ],
            Self::LockContention { path, attempts } => vec![
                ("path", path.clone()),
                ("attempts", attempts.to_string()),
            ],
            Self::LockStolen {
                path,
                previous_holder,
            } => vec![
                ("path", path.clone()),
                ("previous_holder", previous_holder.clone()),
            ],
            _ => Vec::new(),
        }
    }
}

/// Result type alias for controller operations.
pub type Result<T> = std::result::Result<T, ControllerError>;
