mod report;

pub use report::render_markdown;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use foreman_common::config::ProgressConfig;
use foreman_common::ids::IssueId;
use foreman_common::types::{
    ActivityEntry, ActivityKind, Bottleneck, BottleneckKind, PoolStatus, ProgressMetrics,
    QueueStatus, WorkerHealth, WorkerStatus,
};
use foreman_common::{ControllerError, Result};

use crate::events::{ControllerEvent, EventBus};
use crate::store::{atomic_write_json, atomic_write_text};

pub type PoolStatusFn = Arc<dyn Fn() -> PoolStatus + Send + Sync>;
pub type QueueStatusFn = Arc<dyn Fn() -> QueueStatus + Send + Sync>;
pub type HealthSnapshotFn = Arc<dyn Fn() -> Vec<WorkerHealth> + Send + Sync>;

const MILESTONES: [u8; 4] = [25, 50, 75, 100];

struct ProgressState {
    completed: u64,
    failed: u64,
    total_issues: Option<u64>,
    durations_ms: Vec<u64>,
    bottlenecks: HashMap<String, Bottleneck>,
    milestones: BTreeSet<u8>,
    recent: VecDeque<ActivityEntry>,
}

/// Periodic sampling of pool/queue/health snapshots into derived progress
/// metrics, bottleneck detection, milestones and persisted reports.
///
/// The monitor reads state only through snapshot closures; it never holds a
/// handle into mutable pool internals.
pub struct ProgressMonitor {
    config: ProgressConfig,
    stuck_threshold_ms: u64,
    critical_threshold_ms: u64,
    events: Arc<EventBus>,
    pool_status: PoolStatusFn,
    queue_status: QueueStatusFn,
    health_snapshot: Option<HealthSnapshotFn>,
    state: Mutex<ProgressState>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl ProgressMonitor {
    pub fn new(
        config: ProgressConfig,
        stuck_threshold_ms: u64,
        critical_threshold_ms: u64,
        events: Arc<EventBus>,
        pool_status: PoolStatusFn,
        queue_status: QueueStatusFn,
        health_snapshot: Option<HealthSnapshotFn>,
    ) -> Self {
        Self {
            config,
            stuck_threshold_ms,
            critical_threshold_ms,
            events,
            pool_status,
            queue_status,
            health_snapshot,
            state: Mutex::new(ProgressState {
                completed: 0,
                failed: 0,
                total_issues: None,
                durations_ms: Vec::new(),
                bottlenecks: HashMap::new(),
                milestones: BTreeSet::new(),
                recent: VecDeque::new(),
            }),
            shutdown: Mutex::new(None),
        }
    }

    pub fn set_total_issues(&self, total: u64) {
        self.state.lock().unwrap().total_issues = Some(total);
    }

    /// Record one completion. Counters only move through this call, never
    /// by inference from snapshots.
    pub fn record_completion(&self, issue_id: &IssueId, started_at: DateTime<Utc>, success: bool) {
        let now = Utc::now();
        let duration_ms = (now - started_at).num_milliseconds().max(0) as u64;

        {
            let mut state = self.state.lock().unwrap();
            if success {
                state.completed += 1;
            } else {
                state.failed += 1;
            }
            state.durations_ms.push(duration_ms);
        }

        self.record_activity(ActivityEntry {
            timestamp: now,
            kind: if success {
                ActivityKind::Completed
            } else {
                ActivityKind::Failed
            },
            issue_id: issue_id.clone(),
            worker_id: None,
            details: None,
        });
        self.check_milestones();
    }

    pub fn record_activity(&self, entry: ActivityEntry) {
        let mut state = self.state.lock().unwrap();
        if state.recent.len() >= self.config.max_recent_activities {
            state.recent.pop_back();
        }
        state.recent.push_front(entry);
    }

    pub fn recent_activity(&self) -> Vec<ActivityEntry> {
        self.state.lock().unwrap().recent.iter().cloned().collect()
    }

    pub fn active_bottlenecks(&self) -> Vec<Bottleneck> {
        let state = self.state.lock().unwrap();
        let mut list: Vec<Bottleneck> = state.bottlenecks.values().cloned().collect();
        list.sort_by(|a, b| a.key.cmp(&b.key));
        list
    }

    pub fn metrics(&self) -> ProgressMetrics {
        let pool = (self.pool_status)();
        let queue = (self.queue_status)();
        self.derive_metrics(&pool, &queue, Utc::now())
    }

    /// One sampling pass: derive metrics, re-evaluate bottlenecks, emit
    /// `progress_updated`, and persist the JSON and Markdown reports.
    pub async fn tick(&self) -> Result<ProgressMetrics> {
        let now = Utc::now();
        let pool = (self.pool_status)();
        let queue = (self.queue_status)();
        let health = self.health_snapshot.as_ref().map(|f| f());

        let metrics = self.derive_metrics(&pool, &queue, now);
        self.detect_bottlenecks(&pool, &queue, now);

        if self.config.enable_notifications {
            self.events
                .emit(&ControllerEvent::ProgressUpdated(metrics.clone()));
        }

        self.write_reports(&metrics, &pool, health.as_deref()).await?;
        Ok(metrics)
    }

    fn derive_metrics(
        &self,
        pool: &PoolStatus,
        queue: &QueueStatus,
        now: DateTime<Utc>,
    ) -> ProgressMetrics {
        let state = self.state.lock().unwrap();

        let in_progress = pool.working_workers as u64;
        let pending = queue.size as u64;
        let blocked = pool.error_workers as u64;

        let percentage = match state.total_issues {
            Some(total) if total > 0 => 100.0 * state.completed as f64 / total as f64,
            _ => {
                let inferred = state.completed + state.failed + in_progress + pending + blocked;
                if inferred == 0 {
                    0.0
                } else {
                    100.0 * state.completed as f64 / inferred as f64
                }
            }
        };

        let average_completion_ms = if state.durations_ms.is_empty() {
            0.0
        } else {
            state.durations_ms.iter().sum::<u64>() as f64 / state.durations_ms.len() as f64
        };

        let remaining = match state.total_issues {
            Some(total) => total.saturating_sub(state.completed),
            None => pending + in_progress,
        };
        let eta = if average_completion_ms > 0.0 && remaining > 0 && pool.total_workers > 0 {
            let effective = (pool.total_workers as u64).min(remaining).max(1);
            let remaining_ms = average_completion_ms * remaining as f64 / effective as f64;
            Some(now + chrono::Duration::milliseconds(remaining_ms as i64))
        } else {
            None
        };

        ProgressMetrics {
            completed: state.completed,
            failed: state.failed,
            in_progress,
            pending,
            blocked,
            total_issues: state.total_issues,
            percentage,
            average_completion_ms,
            eta,
        }
    }

    /// Re-evaluate bottleneck conditions. Detections persist across ticks;
    /// resolution is edge-triggered when a condition ceases.
    fn detect_bottlenecks(&self, pool: &PoolStatus, queue: &QueueStatus, now: DateTime<Utc>) {
        let mut current: HashMap<String, Bottleneck> = HashMap::new();

        for worker in &pool.workers {
            match worker.status {
                WorkerStatus::Working => {
                    let Some(started_at) = worker.started_at else {
                        continue;
                    };
                    let duration_ms = (now - started_at).num_milliseconds().max(0) as u64;
                    if duration_ms >= self.stuck_threshold_ms {
                        let severity = if duration_ms >= self.critical_threshold_ms {
                            5
                        } else {
                            4
                        };
                        let key = format!("stuck_worker:{}", worker.id);
                        current.insert(
                            key.clone(),
                            Bottleneck {
                                kind: BottleneckKind::StuckWorker,
                                key,
                                severity,
                                description: format!(
                                    "{} has been working for {} ms",
                                    worker.id, duration_ms
                                ),
                                detected_at: now,
                                worker_id: Some(worker.id.clone()),
                            },
                        );
                    }
                }
                WorkerStatus::Error => {
                    let key = format!("stuck_worker:{}", worker.id);
                    current.insert(
                        key.clone(),
                        Bottleneck {
                            kind: BottleneckKind::StuckWorker,
                            key,
                            severity: 4,
                            description: format!("{} is in the error state", worker.id),
                            detected_at: now,
                            worker_id: Some(worker.id.clone()),
                        },
                    );
                }
                WorkerStatus::Idle => {}
            }
        }

        if pool.working_workers == 0 && pool.idle_workers > 0 && queue.size > 0 {
            current.insert(
                "blocked_chain".into(),
                Bottleneck {
                    kind: BottleneckKind::BlockedChain,
                    key: "blocked_chain".into(),
                    severity: 3,
                    description: format!(
                        "{} queued issues but no worker is making progress",
                        queue.size
                    ),
                    detected_at: now,
                    worker_id: None,
                },
            );
        }

        if pool.idle_workers == 0 && queue.size > 2 * pool.total_workers {
            current.insert(
                "resource_contention".into(),
                Bottleneck {
                    kind: BottleneckKind::ResourceContention,
                    key: "resource_contention".into(),
                    severity: 2,
                    description: format!(
                        "queue depth {} exceeds twice the pool size",
                        queue.size
                    ),
                    detected_at: now,
                    worker_id: None,
                },
            );
        }

        let mut emitted = Vec::new();
        {
            let mut state = self.state.lock().unwrap();

            let resolved: Vec<String> = state
                .bottlenecks
                .keys()
                .filter(|key| !current.contains_key(*key))
                .cloned()
                .collect();
            for key in resolved {
                state.bottlenecks.remove(&key);
                emitted.push(ControllerEvent::BottleneckResolved { key });
            }

            for (key, bottleneck) in current {
                if !state.bottlenecks.contains_key(&key) {
                    emitted.push(ControllerEvent::BottleneckDetected(bottleneck.clone()));
                    state.bottlenecks.insert(key, bottleneck);
                }
            }
        }

        for event in emitted {
            self.events.emit(&event);
        }
    }

    fn check_milestones(&self) {
        let metrics = self.metrics();
        let mut emitted = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            for milestone in MILESTONES {
                if metrics.percentage >= milestone as f64 && state.milestones.insert(milestone) {
                    emitted.push(ControllerEvent::MilestoneReached {
                        percentage: milestone,
                    });
                    if milestone == 100 {
                        emitted.push(ControllerEvent::AllCompleted);
                    }
                }
            }
        }

        if self.config.enable_notifications {
            for event in emitted {
                self.events.emit(&event);
            }
        }
    }

    async fn write_reports(
        &self,
        metrics: &ProgressMetrics,
        pool: &PoolStatus,
        health: Option<&[WorkerHealth]>,
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.report_path)
            .await
            .map_err(|e| ControllerError::ReportPersistence(e.to_string()))?;

        let bottlenecks = self.active_bottlenecks();
        let recent = self.recent_activity();

        let json_report = json!({
            "generated_at": Utc::now(),
            "metrics": metrics,
            "workers": pool.workers,
            "health": health,
            "bottlenecks": bottlenecks,
            "recent_activity": recent,
        });
        let json_path = self.config.report_path.join("progress_report.json");
        atomic_write_json(&json_path, &json_report)
            .await
            .map_err(|e| ControllerError::ReportPersistence(e.to_string()))?;

        let markdown = render_markdown(metrics, pool, health, &bottlenecks, &recent);
        let md_path = self.config.report_path.join("progress_report.md");
        atomic_write_text(&md_path, &markdown)
            .await
            .map_err(|e| ControllerError::ReportPersistence(e.to_string()))?;

        Ok(())
    }

    /// Start the sampling loop. Fails if already running.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let mut shutdown = self.shutdown.lock().unwrap();
        if shutdown.is_some() {
            return Err(ControllerError::MonitorAlreadyRunning);
        }
        let (tx, mut rx) = watch::channel(false);
        *shutdown = Some(tx);

        let monitor = Arc::clone(self);
        let interval = Duration::from_millis(self.config.polling_interval_ms);
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = monitor.tick().await {
                            tracing::error!(error = %e, "Progress tick failed");
                        }
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            tracing::info!("Progress monitor shutting down");
                            break;
                        }
                    }
                }
            }
        }))
    }

    /// Stop the sampling loop. Fails if not running.
    pub fn stop(&self) -> Result<()> {
        let tx = self
            .shutdown
            .lock()
            .unwrap()
            .take()
            .ok_or(ControllerError::MonitorNotRunning)?;
        let _ = tx.send(true);
        Ok(())
    }
}
