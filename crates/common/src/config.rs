use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level controller configuration, deserialized from controller.toml.
///
/// Every section has complete defaults so a partial (or absent) file works.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub stuck: StuckConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
}

/// Worker pool parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of workers created at initialization.
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
    /// Upper bound on a single assignment before the worker is failed.
    #[serde(default = "default_worker_timeout_ms")]
    pub worker_timeout_ms: u64,
    /// Directory for work-order artifacts and controller state.
    #[serde(default = "default_work_orders_path")]
    pub work_orders_path: PathBuf,
}

fn default_max_workers() -> u32 {
    5
}
fn default_worker_timeout_ms() -> u64 {
    600_000
}
fn default_work_orders_path() -> PathBuf {
    PathBuf::from("state")
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            worker_timeout_ms: default_worker_timeout_ms(),
            work_orders_path: default_work_orders_path(),
        }
    }
}

/// Policy applied when the queue is full or over its memory budget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectionPolicy {
    #[default]
    Reject,
    DropOldest,
    DropLowestPriority,
}

/// Bounded queue parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_max_size")]
    pub max_size: usize,
    /// Ratio of max_size at which a soft-limit warning fires.
    #[serde(default = "default_soft_limit_ratio")]
    pub soft_limit_ratio: f64,
    /// Ratio of max_size at which admissions start suspending.
    #[serde(default = "default_backpressure_threshold")]
    pub backpressure_threshold: f64,
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: usize,
    #[serde(default)]
    pub rejection_policy: RejectionPolicy,
    #[serde(default = "default_true")]
    pub enable_dead_letter: bool,
    #[serde(default = "default_max_dead_letter_size")]
    pub max_dead_letter_size: usize,
    #[serde(default = "default_max_backpressure_delay_ms")]
    pub max_backpressure_delay_ms: u64,
}

fn default_queue_max_size() -> usize {
    1000
}
fn default_soft_limit_ratio() -> f64 {
    0.8
}
fn default_backpressure_threshold() -> f64 {
    0.6
}
fn default_max_memory_bytes() -> usize {
    100 * 1024 * 1024
}
fn default_true() -> bool {
    true
}
fn default_max_dead_letter_size() -> usize {
    100
}
fn default_max_backpressure_delay_ms() -> u64 {
    5000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: default_queue_max_size(),
            soft_limit_ratio: default_soft_limit_ratio(),
            backpressure_threshold: default_backpressure_threshold(),
            max_memory_bytes: default_max_memory_bytes(),
            rejection_policy: RejectionPolicy::default(),
            enable_dead_letter: default_true(),
            max_dead_letter_size: default_max_dead_letter_size(),
            max_backpressure_delay_ms: default_max_backpressure_delay_ms(),
        }
    }
}

/// Distributed (file-based) lock parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockConfig {
    /// When false, `*_with_lock` pool operations delegate directly.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_lock_retry_attempts")]
    pub lock_retry_attempts: u32,
    #[serde(default = "default_lock_retry_delay_ms")]
    pub lock_retry_delay_ms: u64,
    /// Locks older than this are presumed abandoned and may be stolen.
    #[serde(default = "default_lock_steal_threshold_ms")]
    pub lock_steal_threshold_ms: u64,
    #[serde(default = "default_holder_id_prefix")]
    pub holder_id_prefix: String,
}

fn default_lock_timeout_ms() -> u64 {
    5000
}
fn default_lock_retry_attempts() -> u32 {
    10
}
fn default_lock_retry_delay_ms() -> u64 {
    100
}
fn default_lock_steal_threshold_ms() -> u64 {
    5000
}
fn default_holder_id_prefix() -> String {
    "foreman".to_string()
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_retry_attempts: default_lock_retry_attempts(),
            lock_retry_delay_ms: default_lock_retry_delay_ms(),
            lock_steal_threshold_ms: default_lock_steal_threshold_ms(),
            holder_id_prefix: default_holder_id_prefix(),
        }
    }
}

/// Health monitor parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Expected interval between worker heartbeats.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Interval of the monitor's own tick.
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    /// Missed heartbeats before a degraded worker becomes a zombie.
    #[serde(default = "default_missed_heartbeat_threshold")]
    pub missed_heartbeat_threshold: u32,
    #[serde(default = "default_memory_threshold_bytes")]
    pub memory_threshold_bytes: u64,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_restart_cooldown_ms")]
    pub restart_cooldown_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}
fn default_health_check_interval_ms() -> u64 {
    30_000
}
fn default_missed_heartbeat_threshold() -> u32 {
    3
}
fn default_memory_threshold_bytes() -> u64 {
    1024 * 1024 * 1024
}
fn default_max_restarts() -> u32 {
    3
}
fn default_restart_cooldown_ms() -> u64 {
    60_000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            missed_heartbeat_threshold: default_missed_heartbeat_threshold(),
            memory_threshold_bytes: default_memory_threshold_bytes(),
            max_restarts: default_max_restarts(),
            restart_cooldown_ms: default_restart_cooldown_ms(),
        }
    }
}

/// Duration thresholds for one task type.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct StuckThresholds {
    pub warning_ms: u64,
    pub stuck_ms: u64,
    pub critical_ms: u64,
}

/// Stuck-worker handler parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StuckConfig {
    #[serde(default = "default_warning_threshold_ms")]
    pub warning_threshold_ms: u64,
    #[serde(default = "default_stuck_threshold_ms")]
    pub stuck_threshold_ms: u64,
    #[serde(default = "default_critical_threshold_ms")]
    pub critical_threshold_ms: u64,
    /// Per-task-type threshold overrides, keyed by issue component id.
    #[serde(default)]
    pub task_type_overrides: HashMap<String, StuckThresholds>,
    #[serde(default = "default_true")]
    pub auto_recovery_enabled: bool,
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,
    #[serde(default = "default_deadline_extension_ms")]
    pub deadline_extension_ms: u64,
    #[serde(default)]
    pub pause_on_critical: bool,
}

fn default_warning_threshold_ms() -> u64 {
    180_000
}
fn default_stuck_threshold_ms() -> u64 {
    300_000
}
fn default_critical_threshold_ms() -> u64 {
    600_000
}
fn default_max_recovery_attempts() -> u32 {
    3
}
fn default_deadline_extension_ms() -> u64 {
    60_000
}

impl Default for StuckConfig {
    fn default() -> Self {
        Self {
            warning_threshold_ms: default_warning_threshold_ms(),
            stuck_threshold_ms: default_stuck_threshold_ms(),
            critical_threshold_ms: default_critical_threshold_ms(),
            task_type_overrides: HashMap::new(),
            auto_recovery_enabled: true,
            max_recovery_attempts: default_max_recovery_attempts(),
            deadline_extension_ms: default_deadline_extension_ms(),
            pause_on_critical: false,
        }
    }
}

impl StuckConfig {
    /// Threshold triple for a task type, falling back to the defaults.
    pub fn thresholds_for(&self, task_type: Option<&str>) -> StuckThresholds {
        task_type
            .and_then(|t| self.task_type_overrides.get(t).copied())
            .unwrap_or(StuckThresholds {
                warning_ms: self.warning_threshold_ms,
                stuck_ms: self.stuck_threshold_ms,
                critical_ms: self.critical_threshold_ms,
            })
    }
}

/// Progress monitor parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default = "default_max_recent_activities")]
    pub max_recent_activities: usize,
    #[serde(default = "default_report_path")]
    pub report_path: PathBuf,
    #[serde(default = "default_true")]
    pub enable_notifications: bool,
}

fn default_polling_interval_ms() -> u64 {
    30_000
}
fn default_max_recent_activities() -> usize {
    50
}
fn default_report_path() -> PathBuf {
    PathBuf::from("reports")
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: default_polling_interval_ms(),
            max_recent_activities: default_max_recent_activities(),
            report_path: default_report_path(),
            enable_notifications: true,
        }
    }
}

/// Metrics collector parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_completion_records")]
    pub max_completion_records: usize,
    /// Histogram bucket upper bounds in milliseconds.
    #[serde(default = "default_histogram_buckets")]
    pub histogram_buckets: Vec<u64>,
    #[serde(default = "default_metrics_prefix")]
    pub metrics_prefix: String,
}

fn default_max_completion_records() -> usize {
    1000
}
fn default_histogram_buckets() -> Vec<u64> {
    vec![
        100, 500, 1000, 5000, 10_000, 30_000, 60_000, 120_000, 300_000, 600_000,
    ]
}
fn default_metrics_prefix() -> String {
    "worker_pool".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_completion_records: default_max_completion_records(),
            histogram_buckets: default_histogram_buckets(),
            metrics_prefix: default_metrics_prefix(),
        }
    }
}

/// Base scores per priority class.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PriorityWeights {
    pub p0: i64,
    pub p1: i64,
    pub p2: i64,
    pub p3: i64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            p0: 100,
            p1: 75,
            p2: 50,
            p3: 25,
        }
    }
}

/// Graph analyzer scoring parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default)]
    pub weights: PriorityWeights,
    #[serde(default = "default_critical_path_bonus")]
    pub critical_path_bonus: i64,
    #[serde(default = "default_dependent_multiplier")]
    pub dependent_multiplier: i64,
    #[serde(default = "default_quick_win_bonus")]
    pub quick_win_bonus: i64,
    /// Effort (hours) at or below which a node counts as a quick win.
    #[serde(default = "default_quick_win_threshold_hours")]
    pub quick_win_threshold_hours: f64,
}

fn default_critical_path_bonus() -> i64 {
    50
}
fn default_dependent_multiplier() -> i64 {
    10
}
fn default_quick_win_bonus() -> i64 {
    15
}
fn default_quick_win_threshold_hours() -> f64 {
    4.0
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            weights: PriorityWeights::default(),
            critical_path_bonus: default_critical_path_bonus(),
            dependent_multiplier: default_dependent_multiplier(),
            quick_win_bonus: default_quick_win_bonus(),
            quick_win_threshold_hours: default_quick_win_threshold_hours(),
        }
    }
}
