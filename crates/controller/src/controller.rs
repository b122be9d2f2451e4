use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use foreman_common::config::ControllerConfig;
use foreman_common::ids::{IssueId, WorkerId};
use foreman_common::types::{
    ActivityEntry, ActivityKind, DependencyStatus, Escalation, Heartbeat, IssueGraph, IssueStatus,
    WorkOrder, WorkOrderContext, WorkResult,
};
use foreman_common::{ControllerError, Result};

use crate::analyzer::{AnalysisResult, GraphAnalyzer};
use crate::events::EventBus;
use crate::health::HealthMonitor;
use crate::metrics_collector::MetricsCollector;
use crate::pool::WorkerPool;
use crate::progress::ProgressMonitor;
use crate::queue::BoundedWorkQueue;
use crate::recovery::{RecoveryAction, RecoveryOutcome, RecoverySink};
use crate::stuck::{ObservedWorker, StuckWorkerHandler};

/// The opaque executor of a single work order. What execution means
/// (compilation, code generation, API calls) is entirely the adapter's
/// business; the controller observes only results and heartbeats.
#[async_trait]
pub trait WorkerAdapter: Send + Sync {
    async fn execute(&self, worker_id: &WorkerId, order: &WorkOrder) -> WorkResult;

    /// Restart the backing process of a worker.
    async fn restart_worker(&self, _worker_id: &WorkerId) -> Result<()> {
        Ok(())
    }

    /// Nudge a worker that crossed its warning threshold.
    async fn send_warning(&self, _worker_id: &WorkerId, _issue_id: Option<&IssueId>) {}

    async fn on_critical_escalation(&self, _escalation: &Escalation) {}

    async fn on_pipeline_pause(&self, _reason: &str) {}
}

/// Dispatches recovery actions to the pool and the worker adapter.
struct ControllerRecovery {
    pool: Arc<WorkerPool>,
    adapter: Arc<dyn WorkerAdapter>,
    paused: Arc<AtomicBool>,
}

#[async_trait]
impl RecoverySink for ControllerRecovery {
    async fn dispatch(&self, action: RecoveryAction) -> Result<RecoveryOutcome> {
        tracing::info!(action = action.kind(), "Dispatching recovery action");
        match action {
            RecoveryAction::SendWarning {
                worker_id,
                issue_id,
            } => {
                self.adapter
                    .send_warning(&worker_id, issue_id.as_ref())
                    .await;
                Ok(RecoveryOutcome::Handled)
            }
            RecoveryAction::ExtendDeadline {
                worker_id,
                extension_ms,
            } => {
                self.pool.extend_deadline(&worker_id, extension_ms)?;
                Ok(RecoveryOutcome::Handled)
            }
            RecoveryAction::ReassignTask { issue_id, .. } => {
                let target = self.pool.reassign_task(&issue_id).await?;
                Ok(RecoveryOutcome::Reassigned(target))
            }
            RecoveryAction::RestartWorker { worker_id } => {
                self.adapter.restart_worker(&worker_id).await.map_err(|e| {
                    ControllerError::WorkerRestart {
                        worker_id: worker_id.clone(),
                        reason: e.to_string(),
                    }
                })?;
                let interrupted = self.pool.respawn_worker(&worker_id)?;
                if let Some(issue_id) = interrupted {
                    // Hand the interrupted task to another worker, or back
                    // to the queue.
                    let _ = self.pool.reassign_task(&issue_id).await;
                }
                Ok(RecoveryOutcome::Handled)
            }
            RecoveryAction::EscalateCritical { escalation } => {
                self.adapter.on_critical_escalation(&escalation).await;
                Ok(RecoveryOutcome::Handled)
            }
            RecoveryAction::PausePipeline { reason } => {
                self.paused.store(true, Ordering::SeqCst);
                self.adapter.on_pipeline_pause(&reason).await;
                Ok(RecoveryOutcome::Handled)
            }
        }
    }
}

/// Outcome of one `Controller::run`.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub completed: Vec<IssueId>,
    pub failed: Vec<IssueId>,
    /// Blocked by a cycle or by a failed dependency.
    pub blocked: Vec<IssueId>,
}

/// The controller core: graph analysis feeding a priority queue, dispatch
/// across the worker pool, periodic health/stuck/progress monitoring, and
/// cooperative shutdown.
pub struct Controller {
    config: ControllerConfig,
    project_id: String,
    events: Arc<EventBus>,
    analyzer: GraphAnalyzer,
    queue: Arc<BoundedWorkQueue>,
    pool: Arc<WorkerPool>,
    collector: Arc<MetricsCollector>,
    health: Arc<HealthMonitor>,
    stuck: Arc<StuckWorkerHandler>,
    progress: Arc<ProgressMonitor>,
    adapter: Arc<dyn WorkerAdapter>,
    paused: Arc<AtomicBool>,
    task_types: Arc<Mutex<HashMap<IssueId, Option<String>>>>,
    shutdown_tx: watch::Sender<bool>,
    monitor_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    pub fn new(
        config: ControllerConfig,
        project_id: impl Into<String>,
        adapter: Arc<dyn WorkerAdapter>,
    ) -> Arc<Self> {
        let events = Arc::new(EventBus::new());
        let collector = Arc::new(MetricsCollector::new(config.metrics.clone()));
        let queue = Arc::new(BoundedWorkQueue::new(
            config.queue.clone(),
            Arc::clone(&events),
        ));
        let pool = Arc::new(WorkerPool::new(
            config.pool.clone(),
            config.lock.clone(),
            Arc::clone(&queue),
            Arc::clone(&events),
            Arc::clone(&collector),
        ));

        let paused = Arc::new(AtomicBool::new(false));
        let sink: Arc<dyn RecoverySink> = Arc::new(ControllerRecovery {
            pool: Arc::clone(&pool),
            adapter: Arc::clone(&adapter),
            paused: Arc::clone(&paused),
        });

        let health = Arc::new(HealthMonitor::new(
            config.health.clone(),
            Arc::clone(&events),
            Arc::clone(&sink),
        ));
        for n in 1..=config.pool.max_workers {
            health.register_worker(WorkerId::numbered(n));
        }

        let stuck = Arc::new(StuckWorkerHandler::new(
            config.stuck.clone(),
            Arc::clone(&events),
            sink,
        ));

        let progress = {
            let pool_for_status = Arc::clone(&pool);
            let queue_for_status = Arc::clone(&queue);
            let health_for_status = Arc::clone(&health);
            Arc::new(ProgressMonitor::new(
                config.progress.clone(),
                config.stuck.stuck_threshold_ms,
                config.stuck.critical_threshold_ms,
                Arc::clone(&events),
                Arc::new(move || pool_for_status.status()),
                Arc::new(move || queue_for_status.status()),
                Some(Arc::new(move || health_for_status.health_snapshot())),
            ))
        };

        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            analyzer: GraphAnalyzer::new(config.analyzer.clone()),
            config,
            project_id: project_id.into(),
            events,
            queue,
            pool,
            collector,
            health,
            stuck,
            progress,
            adapter,
            paused,
            task_types: Arc::new(Mutex::new(HashMap::new())),
            shutdown_tx,
            monitor_handles: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    pub fn progress(&self) -> &Arc<ProgressMonitor> {
        &self.progress
    }

    pub fn record_heartbeat(&self, heartbeat: &Heartbeat) {
        self.health.record_heartbeat(heartbeat);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Create storage directories and attempt to restore persisted state
    /// from an earlier run of the same project.
    pub async fn init(&self) -> Result<bool> {
        self.pool.init().await?;
        Ok(self.pool.load_state(&self.project_id).await?.is_some())
    }

    /// Spawn the periodic monitors (health, stuck, progress).
    pub fn start_monitors(self: &Arc<Self>) -> Result<()> {
        let mut handles = self.monitor_handles.lock().unwrap();

        handles.push(Arc::clone(&self.health).spawn(self.shutdown_tx.subscribe()));

        let pool = Arc::clone(&self.pool);
        let task_types = Arc::clone(&self.task_types);
        let observe: Arc<dyn Fn() -> Vec<ObservedWorker> + Send + Sync> = Arc::new(move || {
            let now = Utc::now();
            let types = task_types.lock().unwrap();
            pool.status()
                .workers
                .iter()
                .filter(|w| w.status == foreman_common::types::WorkerStatus::Working)
                .filter_map(|w| {
                    let started_at = w.started_at?;
                    Some(ObservedWorker {
                        worker_id: w.id.clone(),
                        issue_id: w.current_issue.clone(),
                        task_type: w
                            .current_issue
                            .as_ref()
                            .and_then(|i| types.get(i).cloned())
                            .flatten(),
                        duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
                    })
                })
                .collect()
        });
        handles.push(Arc::clone(&self.stuck).spawn(
            observe,
            self.config.health.health_check_interval_ms,
            self.shutdown_tx.subscribe(),
        ));

        // Timeout sweep: assignments exceeding worker_timeout are failed
        // even while the dispatch loop is parked on completions.
        let pool = Arc::clone(&self.pool);
        let mut shutdown = self.shutdown_tx.subscribe();
        let interval =
            std::time::Duration::from_millis(self.config.health.health_check_interval_ms);
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        pool.expire_timed_out(Utc::now());
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }));

        handles.push(self.progress.start()?);
        Ok(())
    }

    /// Analyze a graph without executing it.
    pub fn analyze(&self, graph: &IssueGraph) -> Result<AnalysisResult> {
        self.analyzer.analyze(graph)
    }

    /// Analyze a graph and drive it to completion.
    pub async fn run(&self, graph: IssueGraph) -> Result<RunSummary> {
        let analysis = self.analyzer.analyze(&graph)?;
        self.progress
            .set_total_issues(analysis.execution_order.len() as u64);

        {
            let mut types = self.task_types.lock().unwrap();
            types.clear();
            for (id, issue) in &analysis.issues {
                types.insert(id.clone(), issue.node.component_id.clone());
            }
        }

        let mut statuses: HashMap<IssueId, IssueStatus> = analysis
            .issues
            .iter()
            .map(|(id, issue)| (id.clone(), issue.node.status))
            .collect();

        let mut summary = RunSummary {
            completed: Vec::new(),
            failed: Vec::new(),
            blocked: analysis.blocked_by_cycle.iter().cloned().collect(),
        };

        // Everything executable that is not already completed must reach a
        // terminal state before the run ends.
        let mut outstanding = 0usize;
        for id in &analysis.execution_order {
            match statuses[id] {
                IssueStatus::Completed => summary.completed.push(id.clone()),
                _ => outstanding += 1,
            }
        }

        // Seed the queue with every ready issue.
        for id in &analysis.execution_order {
            if statuses[id] == IssueStatus::Completed {
                continue;
            }
            if deps_completed(&analysis, &statuses, id) {
                statuses.insert(id.clone(), IssueStatus::Ready);
                self.queue
                    .enqueue(id.clone(), analysis.issues[id].priority_score)
                    .await;
            }
        }

        let (done_tx, mut done_rx) =
            mpsc::unbounded_channel::<(WorkerId, WorkOrder, chrono::DateTime<Utc>, WorkResult)>();
        let mut in_flight = 0usize;

        while outstanding > 0 {
            if self.paused.load(Ordering::SeqCst) {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                continue;
            }

            self.pool.expire_timed_out(Utc::now());

            // Dispatch as long as there is an idle worker and ready work.
            while self.pool.available_slot().is_some() {
                let Some(issue_id) = self.queue.dequeue() else {
                    break;
                };
                if !deps_completed(&analysis, &statuses, &issue_id) {
                    // Lazily re-evaluated readiness: back to the queue.
                    self.queue
                        .enqueue(issue_id.clone(), analysis.issues[&issue_id].priority_score)
                        .await;
                    break;
                }

                let worker_id = match self.pool.available_slot() {
                    Some(w) => w,
                    None => {
                        self.queue
                            .enqueue(issue_id.clone(), analysis.issues[&issue_id].priority_score)
                            .await;
                        break;
                    }
                };

                let order = match self.pool.active_order_for(&issue_id) {
                    Some(order) => order,
                    None => {
                        let issue = &analysis.issues[&issue_id];
                        self.pool
                            .create_work_order(
                                &issue.node,
                                issue.priority_score,
                                order_context(&analysis, &statuses, &issue_id),
                                Vec::new(),
                            )
                            .await?
                    }
                };
                self.pool.assign_work_with_lock(&worker_id, &order.order_id).await?;
                statuses.insert(issue_id.clone(), IssueStatus::InProgress);
                self.progress.record_activity(ActivityEntry {
                    timestamp: Utc::now(),
                    kind: ActivityKind::Started,
                    issue_id: issue_id.clone(),
                    worker_id: Some(worker_id.clone()),
                    details: None,
                });

                let adapter = Arc::clone(&self.adapter);
                let tx = done_tx.clone();
                let started_at = Utc::now();
                in_flight += 1;
                tokio::spawn(async move {
                    let result = adapter.execute(&worker_id, &order).await;
                    let _ = tx.send((worker_id, order, started_at, result));
                });
            }

            if in_flight == 0 {
                // Nothing running and nothing dispatchable: the rest cannot
                // make progress (failed dependencies or errored workers).
                break;
            }

            let Some((worker_id, order, started_at, result)) = done_rx.recv().await else {
                break;
            };
            in_flight -= 1;

            self.pool
                .complete_work_with_lock(&worker_id, &result)
                .await?;
            self.progress
                .record_completion(&order.issue_id, started_at, result.success);

            outstanding = outstanding.saturating_sub(1);
            if result.success {
                statuses.insert(order.issue_id.clone(), IssueStatus::Completed);
                summary.completed.push(order.issue_id.clone());

                // Newly-ready dependents join the queue.
                for dependent in &analysis.issues[&order.issue_id].dependents {
                    if statuses.get(dependent) == Some(&IssueStatus::Pending)
                        && analysis.execution_order.contains(dependent)
                        && deps_completed(&analysis, &statuses, dependent)
                    {
                        statuses.insert(dependent.clone(), IssueStatus::Ready);
                        self.queue
                            .enqueue(
                                dependent.clone(),
                                analysis.issues[dependent].priority_score,
                            )
                            .await;
                    }
                }
            } else {
                statuses.insert(order.issue_id.clone(), IssueStatus::Failed);
                summary.failed.push(order.issue_id.clone());
                outstanding = self.block_dependents(
                    &analysis,
                    &mut statuses,
                    &order.issue_id,
                    &mut summary,
                    outstanding,
                );
            }
        }

        self.pool.save_state_with_lock(&self.project_id).await?;
        tracing::info!(
            completed = summary.completed.len(),
            failed = summary.failed.len(),
            blocked = summary.blocked.len(),
            "Run finished"
        );
        Ok(summary)
    }

    /// A failed issue permanently blocks its transitive dependents for this
    /// run. Returns the adjusted outstanding count.
    fn block_dependents(
        &self,
        analysis: &AnalysisResult,
        statuses: &mut HashMap<IssueId, IssueStatus>,
        failed: &IssueId,
        summary: &mut RunSummary,
        mut outstanding: usize,
    ) -> usize {
        let mut frontier = vec![failed.clone()];
        while let Some(id) = frontier.pop() {
            for dependent in &analysis.issues[&id].dependents {
                let status = statuses.get(dependent).copied();
                if matches!(status, Some(IssueStatus::Pending) | Some(IssueStatus::Ready)) {
                    statuses.insert(dependent.clone(), IssueStatus::Blocked);
                    summary.blocked.push(dependent.clone());
                    let _ = self.queue.remove(dependent);
                    if analysis.execution_order.contains(dependent) {
                        outstanding = outstanding.saturating_sub(1);
                    }
                    self.progress.record_activity(ActivityEntry {
                        timestamp: Utc::now(),
                        kind: ActivityKind::Blocked,
                        issue_id: dependent.clone(),
                        worker_id: None,
                        details: Some(format!("dependency {} failed", failed)),
                    });
                    frontier.push(dependent.clone());
                }
            }
        }
        outstanding
    }

    /// Cooperative shutdown: stop monitor timers, persist final state.
    /// Held distributed locks are released by `with_lock` scoping.
    pub async fn shutdown(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.progress.stop() {
            tracing::debug!(error = %e, "Progress monitor was not running");
        }

        let handles: Vec<JoinHandle<()>> = self.monitor_handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        self.pool.save_state_with_lock(&self.project_id).await?;
        tracing::info!("Controller shut down");
        Ok(())
    }
}

fn deps_completed(
    analysis: &AnalysisResult,
    statuses: &HashMap<IssueId, IssueStatus>,
    id: &IssueId,
) -> bool {
    analysis.issues[id]
        .dependencies
        .iter()
        .all(|dep| statuses.get(dep) == Some(&IssueStatus::Completed))
}

fn order_context(
    analysis: &AnalysisResult,
    statuses: &HashMap<IssueId, IssueStatus>,
    id: &IssueId,
) -> WorkOrderContext {
    let issue = &analysis.issues[id];
    WorkOrderContext {
        sds_component: issue.node.component_id.clone(),
        srs_feature: None,
        prd_requirement: None,
        related_files: Vec::new(),
        dependencies_status: issue
            .dependencies
            .iter()
            .map(|dep| DependencyStatus {
                issue_id: dep.clone(),
                status: statuses
                    .get(dep)
                    .copied()
                    .unwrap_or(IssueStatus::Pending)
                    .as_str()
                    .to_string(),
            })
            .collect(),
    }
}
