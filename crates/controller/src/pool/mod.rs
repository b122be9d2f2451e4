mod locked;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use foreman_common::config::{LockConfig, PoolConfig};
use foreman_common::ids::{IssueId, OrderId, WorkerId};
use foreman_common::types::{
    ControllerState, IssueNode, PoolSnapshot, PoolStatus, Worker, WorkerStatus, WorkOrder,
    WorkOrderContext, WorkQueueEntry, WorkResult,
};
use foreman_common::{ControllerError, Result};

use crate::events::{ControllerEvent, EventBus};
use crate::lock::FileLock;
use crate::metrics_collector::MetricsCollector;
use crate::queue::BoundedWorkQueue;
use crate::store::StateStore;

type CompletionCallback = Box<dyn Fn(&WorkOrder, &WorkResult) + Send + Sync>;

struct PoolInner {
    workers: Vec<Worker>,
    orders: HashMap<OrderId, WorkOrder>,
    /// Issue → its single active (assigned or unassigned, uncompleted) order.
    active_by_issue: HashMap<IssueId, OrderId>,
    assigned_order: HashMap<WorkerId, OrderId>,
    completed_orders: BTreeSet<OrderId>,
    failed_orders: BTreeSet<OrderId>,
    order_counter: u64,
}

/// The worker pool owns all workers and work orders and is the single
/// writer of pool state. External components observe via snapshot copies;
/// health and stuck-worker recovery go through the pool's primitives.
///
/// The interior mutex is never held across an await; persistence happens
/// outside it and event dispatch happens after it is released.
pub struct WorkerPool {
    config: PoolConfig,
    queue: Arc<BoundedWorkQueue>,
    events: Arc<EventBus>,
    collector: Arc<MetricsCollector>,
    store: StateStore,
    distributed_lock: Option<FileLock>,
    inner: Mutex<PoolInner>,
    completion_callback: Mutex<Option<CompletionCallback>>,
}

impl WorkerPool {
    /// Create the pool with `max_workers` idle workers named
    /// `worker-1..worker-N`. Identities are stable across restarts.
    pub fn new(
        config: PoolConfig,
        lock_config: LockConfig,
        queue: Arc<BoundedWorkQueue>,
        events: Arc<EventBus>,
        collector: Arc<MetricsCollector>,
    ) -> Self {
        let workers = (1..=config.max_workers)
            .map(|n| Worker::idle(WorkerId::numbered(n)))
            .collect();
        let store = StateStore::new(&config.work_orders_path);
        let distributed_lock = lock_config.enabled.then(|| FileLock::new(lock_config));

        Self {
            config,
            queue,
            events,
            collector,
            store,
            distributed_lock,
            inner: Mutex::new(PoolInner {
                workers,
                orders: HashMap::new(),
                active_by_issue: HashMap::new(),
                assigned_order: HashMap::new(),
                completed_orders: BTreeSet::new(),
                failed_orders: BTreeSet::new(),
                order_counter: 0,
            }),
            completion_callback: Mutex::new(None),
        }
    }

    /// Create the storage directories.
    pub async fn init(&self) -> Result<()> {
        self.store.init().await
    }

    pub fn set_completion_callback(&self, callback: CompletionCallback) {
        *self.completion_callback.lock().unwrap() = Some(callback);
    }

    pub fn queue(&self) -> &Arc<BoundedWorkQueue> {
        &self.queue
    }

    /// Lowest-numbered idle worker, if any.
    pub fn available_slot(&self) -> Option<WorkerId> {
        let inner = self.inner.lock().unwrap();
        inner
            .workers
            .iter()
            .find(|w| w.status == WorkerStatus::Idle)
            .map(|w| w.id.clone())
    }

    /// Create and persist a work order for `node`.
    ///
    /// The monotonic counter yields `WO-001`, `WO-002`, ... If persistence
    /// fails the order is rolled back and `WorkOrderCreation` is raised.
    pub async fn create_work_order(
        &self,
        node: &IssueNode,
        priority: i64,
        context: WorkOrderContext,
        acceptance_criteria: Vec<String>,
    ) -> Result<WorkOrder> {
        let (order, reserved) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.active_by_issue.contains_key(&node.id) {
                return Err(ControllerError::WorkOrderCreation {
                    issue_id: node.id.clone(),
                    reason: "issue already has an active work order".into(),
                });
            }
            inner.order_counter += 1;
            let reserved = inner.order_counter;
            let order = WorkOrder {
                order_id: OrderId::numbered(reserved),
                issue_id: node.id.clone(),
                created_at: Utc::now(),
                priority,
                context,
                acceptance_criteria,
            };
            inner
                .active_by_issue
                .insert(node.id.clone(), order.order_id.clone());
            inner.orders.insert(order.order_id.clone(), order.clone());
            (order, reserved)
        };

        if let Err(e) = self.store.write_work_order(&order).await {
            let mut inner = self.inner.lock().unwrap();
            inner.orders.remove(&order.order_id);
            inner.active_by_issue.remove(&order.issue_id);
            if inner.order_counter == reserved {
                inner.order_counter -= 1;
            }
            return Err(e);
        }

        tracing::info!(order_id = %order.order_id, issue_id = %order.issue_id, "Work order created");
        self.events.emit(&ControllerEvent::TaskCreated {
            order_id: order.order_id.clone(),
            issue_id: order.issue_id.clone(),
        });
        Ok(order)
    }

    /// Assign an order to an idle worker.
    pub fn assign_work(&self, worker_id: &WorkerId, order_id: &OrderId) -> Result<()> {
        let (issue_id, event) = {
            let mut inner = self.inner.lock().unwrap();

            let order = inner
                .orders
                .get(order_id)
                .cloned()
                .ok_or_else(|| ControllerError::WorkOrderNotFound(order_id.clone()))?;
            let worker = worker_mut(&mut inner, worker_id)?;

            if worker.status != WorkerStatus::Idle {
                return Err(ControllerError::WorkerNotAvailable {
                    worker_id: worker_id.clone(),
                    status: worker.status.as_str().to_string(),
                });
            }

            worker.status = WorkerStatus::Working;
            worker.current_issue = Some(order.issue_id.clone());
            worker.started_at = Some(Utc::now());
            inner
                .assigned_order
                .insert(worker_id.clone(), order_id.clone());

            let event = ControllerEvent::TaskAssigned {
                worker_id: worker_id.clone(),
                issue_id: order.issue_id.clone(),
                order_id: order_id.clone(),
            };
            (order.issue_id, event)
        };

        // The issue may still sit in the queue when assignment came from a
        // direct slot pick rather than a dequeue.
        self.queue.remove(&issue_id);
        self.collector.record_task_started(worker_id);
        self.update_gauges();
        tracing::info!(worker_id = %worker_id, issue_id = %issue_id, order_id = %order_id, "Work assigned");
        self.events.emit(&event);
        Ok(())
    }

    /// Record the outcome for an assigned order and idle the worker.
    ///
    /// Outcome recording is a single step: terminal set, metrics record and
    /// callback all happen from this one path. Calling it twice for the
    /// same order is a no-op.
    pub fn complete_work(&self, worker_id: &WorkerId, result: &WorkResult) -> Result<()> {
        let outcome = {
            let mut inner = self.inner.lock().unwrap();

            if inner.completed_orders.contains(&result.order_id)
                || inner.failed_orders.contains(&result.order_id)
            {
                return Ok(());
            }

            let order = inner
                .orders
                .get(&result.order_id)
                .cloned()
                .ok_or_else(|| ControllerError::WorkOrderNotFound(result.order_id.clone()))?;

            {
                let worker = worker_mut(&mut inner, worker_id)?;
                if worker.current_issue.as_ref() != Some(&order.issue_id) {
                    return Err(ControllerError::WorkerAssignment {
                        worker_id: worker_id.clone(),
                        issue_id: order.issue_id.clone(),
                        reason: "order is not assigned to this worker".into(),
                    });
                }
            }

            let started_at = {
                let worker = worker_mut(&mut inner, worker_id)?;
                let started_at = worker.started_at.unwrap_or_else(Utc::now);
                worker.status = WorkerStatus::Idle;
                worker.current_issue = None;
                worker.started_at = None;
                worker.completed_tasks += 1;
                worker.last_error = None;
                started_at
            };

            inner.assigned_order.remove(worker_id);
            inner.active_by_issue.remove(&order.issue_id);
            if result.success {
                inner.completed_orders.insert(result.order_id.clone());
            } else {
                inner.failed_orders.insert(result.order_id.clone());
            }

            let completed_at = Utc::now();
            let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
            (order, started_at, completed_at, duration_ms)
        };

        let (order, started_at, completed_at, duration_ms) = outcome;
        self.collector
            .record_completion(foreman_common::types::CompletionRecord {
                order_id: order.order_id.clone(),
                issue_id: order.issue_id.clone(),
                worker_id: worker_id.clone(),
                started_at,
                completed_at,
                duration_ms,
                success: result.success,
            });
        self.update_gauges();

        let event = if result.success {
            ControllerEvent::TaskCompleted {
                worker_id: worker_id.clone(),
                issue_id: order.issue_id.clone(),
                order_id: order.order_id.clone(),
                duration_ms,
            }
        } else {
            ControllerEvent::TaskFailed {
                worker_id: worker_id.clone(),
                issue_id: order.issue_id.clone(),
                order_id: order.order_id.clone(),
                error: result.error.clone().unwrap_or_else(|| "unknown".into()),
            }
        };
        tracing::info!(
            worker_id = %worker_id,
            order_id = %order.order_id,
            success = result.success,
            duration_ms,
            "Work completed"
        );
        self.events.emit(&event);

        if let Some(callback) = self.completion_callback.lock().unwrap().as_ref() {
            callback(&order, result);
        }
        Ok(())
    }

    /// Move the worker to the error state and record the order as failed.
    pub fn fail_work(&self, worker_id: &WorkerId, order_id: &OrderId, error: &str) -> Result<()> {
        let order = {
            let mut inner = self.inner.lock().unwrap();

            let order = inner
                .orders
                .get(order_id)
                .cloned()
                .ok_or_else(|| ControllerError::WorkOrderNotFound(order_id.clone()))?;

            let worker = worker_mut(&mut inner, worker_id)?;
            worker.status = WorkerStatus::Error;
            worker.current_issue = None;
            worker.started_at = None;
            worker.last_error = Some(error.to_string());

            inner.assigned_order.remove(worker_id);
            inner.active_by_issue.remove(&order.issue_id);
            inner.failed_orders.insert(order_id.clone());
            order
        };

        self.update_gauges();
        tracing::warn!(worker_id = %worker_id, order_id = %order_id, error, "Work failed");
        self.events.emit(&ControllerEvent::TaskFailed {
            worker_id: worker_id.clone(),
            issue_id: order.issue_id.clone(),
            order_id: order_id.clone(),
            error: error.to_string(),
        });

        let result = WorkResult::failure(order_id.clone(), error);
        if let Some(callback) = self.completion_callback.lock().unwrap().as_ref() {
            callback(&order, &result);
        }
        Ok(())
    }

    /// Return a worker to idle without recording a completion.
    pub fn release_worker(&self, worker_id: &WorkerId) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            let worker = worker_mut(&mut inner, worker_id)?;
            worker.status = WorkerStatus::Idle;
            worker.current_issue = None;
            worker.started_at = None;
            worker.last_error = None;
            inner.assigned_order.remove(worker_id);
        }
        self.update_gauges();
        Ok(())
    }

    /// Alias kept for recovery collaborators.
    pub fn reset_worker(&self, worker_id: &WorkerId) -> Result<()> {
        self.release_worker(worker_id)
    }

    /// Reset a worker to a fresh idle state, returning any interrupted
    /// issue so the caller can reassign it. Identity and completed-task
    /// count survive the respawn.
    pub fn respawn_worker(&self, worker_id: &WorkerId) -> Result<Option<IssueId>> {
        let interrupted = {
            let mut inner = self.inner.lock().unwrap();
            let worker = worker_mut(&mut inner, worker_id)?;
            let interrupted = worker.current_issue.take();
            worker.status = WorkerStatus::Idle;
            worker.started_at = None;
            worker.last_error = None;
            inner.assigned_order.remove(worker_id);
            interrupted
        };

        self.update_gauges();
        tracing::info!(worker_id = %worker_id, "Worker respawned");
        self.events.emit(&ControllerEvent::WorkerRestarted {
            worker_id: worker_id.clone(),
        });
        Ok(interrupted)
    }

    /// Mark a worker unresponsive. It stays in the error state until a
    /// respawn succeeds.
    pub fn mark_worker_zombie(&self, worker_id: &WorkerId) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            let worker = worker_mut(&mut inner, worker_id)?;
            worker.status = WorkerStatus::Error;
            worker.last_error = Some("zombie".into());
        }
        self.update_gauges();
        Ok(())
    }

    /// Move an issue's active order to the lowest-numbered idle worker, or
    /// re-queue it at the original priority when none is available.
    pub async fn reassign_task(&self, issue_id: &IssueId) -> Result<Option<WorkerId>> {
        enum Outcome {
            Assigned(WorkerId, OrderId),
            Requeue(WorkOrder),
        }

        let outcome = {
            let mut inner = self.inner.lock().unwrap();

            let order_id = inner
                .active_by_issue
                .get(issue_id)
                .cloned()
                .ok_or_else(|| ControllerError::TaskReassignment {
                    issue_id: issue_id.clone(),
                    reason: "no active work order for issue".into(),
                })?;
            let order = inner.orders[&order_id].clone();

            let from_worker = inner
                .assigned_order
                .iter()
                .find(|(_, oid)| **oid == order_id)
                .map(|(w, _)| w.clone());

            if let Some(ref from) = from_worker {
                inner.assigned_order.remove(from);
                let worker = worker_mut(&mut inner, from)?;
                worker.current_issue = None;
                worker.started_at = None;
                // A working worker is released; an errored or zombie worker
                // keeps its state until respawned.
                if worker.status == WorkerStatus::Working {
                    worker.status = WorkerStatus::Idle;
                }
            }

            let target = inner
                .workers
                .iter()
                .find(|w| w.status == WorkerStatus::Idle && Some(&w.id) != from_worker.as_ref())
                .map(|w| w.id.clone());

            match target {
                Some(target_id) => {
                    let worker = worker_mut(&mut inner, &target_id)?;
                    worker.status = WorkerStatus::Working;
                    worker.current_issue = Some(issue_id.clone());
                    worker.started_at = Some(Utc::now());
                    inner
                        .assigned_order
                        .insert(target_id.clone(), order_id.clone());
                    Outcome::Assigned(target_id, order_id)
                }
                None => {
                    inner.active_by_issue.remove(issue_id);
                    Outcome::Requeue(order)
                }
            }
        };

        self.update_gauges();
        match outcome {
            Outcome::Assigned(target_id, order_id) => {
                tracing::info!(issue_id = %issue_id, worker_id = %target_id, "Task reassigned");
                self.events.emit(&ControllerEvent::TaskAssigned {
                    worker_id: target_id.clone(),
                    issue_id: issue_id.clone(),
                    order_id,
                });
                Ok(Some(target_id))
            }
            Outcome::Requeue(order) => {
                let entry = WorkQueueEntry {
                    issue_id: issue_id.clone(),
                    priority_score: order.priority,
                    queued_at: Utc::now(),
                    attempts: 1,
                };
                self.queue.enqueue_entry(entry).await;
                tracing::info!(issue_id = %issue_id, "No idle worker, task re-queued");
                self.events.emit(&ControllerEvent::TaskRequeued {
                    issue_id: issue_id.clone(),
                    reason: "no_idle_worker".into(),
                });
                Ok(None)
            }
        }
    }

    /// Push a worker's deadline out: its observed start becomes now plus
    /// the extension, buying time before the next stuck evaluation.
    pub fn extend_deadline(&self, worker_id: &WorkerId, extension_ms: u64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let worker = worker_mut(&mut inner, worker_id)?;
        worker.started_at = Some(Utc::now() + ChronoDuration::milliseconds(extension_ms as i64));
        Ok(())
    }

    /// Fail every assignment that has exceeded the worker timeout and
    /// release its worker. Returns the expired `(worker, order)` pairs.
    pub fn expire_timed_out(&self, now: DateTime<Utc>) -> Vec<(WorkerId, OrderId)> {
        let timeout = ChronoDuration::milliseconds(self.config.worker_timeout_ms as i64);
        let mut expired = Vec::new();
        let mut events = Vec::new();

        {
            let mut inner = self.inner.lock().unwrap();
            let timed_out: Vec<WorkerId> = inner
                .workers
                .iter()
                .filter(|w| {
                    w.status == WorkerStatus::Working
                        && w.started_at.map_or(false, |s| now - s > timeout)
                })
                .map(|w| w.id.clone())
                .collect();

            for worker_id in timed_out {
                let Some(order_id) = inner.assigned_order.remove(&worker_id) else {
                    continue;
                };
                let issue_id = inner.orders[&order_id].issue_id.clone();
                inner.active_by_issue.remove(&issue_id);
                inner.failed_orders.insert(order_id.clone());

                if let Ok(worker) = worker_mut(&mut inner, &worker_id) {
                    worker.status = WorkerStatus::Idle;
                    worker.current_issue = None;
                    worker.started_at = None;
                    worker.last_error = Some("worker timeout exceeded".into());
                }

                events.push(ControllerEvent::TaskFailed {
                    worker_id: worker_id.clone(),
                    issue_id,
                    order_id: order_id.clone(),
                    error: "worker timeout exceeded".into(),
                });
                expired.push((worker_id, order_id));
            }
        }

        if !expired.is_empty() {
            self.update_gauges();
            for event in &events {
                self.events.emit(event);
            }
            metrics::counter!("pool.timeouts").increment(expired.len() as u64);
        }
        expired
    }

    pub fn work_order(&self, order_id: &OrderId) -> Option<WorkOrder> {
        self.inner.lock().unwrap().orders.get(order_id).cloned()
    }

    pub fn active_order_for(&self, issue_id: &IssueId) -> Option<WorkOrder> {
        let inner = self.inner.lock().unwrap();
        inner
            .active_by_issue
            .get(issue_id)
            .and_then(|oid| inner.orders.get(oid))
            .cloned()
    }

    pub fn status(&self) -> PoolStatus {
        let inner = self.inner.lock().unwrap();
        let mut status = PoolStatus {
            total_workers: inner.workers.len(),
            ..PoolStatus::default()
        };
        for worker in &inner.workers {
            match worker.status {
                WorkerStatus::Idle => status.idle_workers += 1,
                WorkerStatus::Working => status.working_workers += 1,
                WorkerStatus::Error => status.error_workers += 1,
            }
        }
        status.workers = inner.workers.clone();
        status
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let inner = self.inner.lock().unwrap();
        PoolSnapshot {
            workers: inner.workers.clone(),
            order_counter: inner.order_counter,
        }
    }

    pub fn terminal_orders(&self) -> (Vec<OrderId>, Vec<OrderId>) {
        let inner = self.inner.lock().unwrap();
        (
            inner.completed_orders.iter().cloned().collect(),
            inner.failed_orders.iter().cloned().collect(),
        )
    }

    /// Persist an atomic snapshot of pool and queue state.
    pub async fn save_state(&self, project_id: &str) -> Result<()> {
        let (completed, failed) = self.terminal_orders();
        let state = ControllerState {
            project_id: project_id.to_string(),
            last_updated: Utc::now(),
            pool: self.snapshot(),
            queue: self.queue.snapshot(),
            completed_order_ids: completed,
            failed_order_ids: failed,
        };
        self.store.write_state(&state).await?;
        tracing::debug!(project_id, "Controller state saved");
        Ok(())
    }

    /// Restore pool and queue state from disk. A state written for a
    /// different project is rejected (returns None). Orders whose
    /// artifacts have been deleted are silently absent.
    pub async fn load_state(&self, project_id: &str) -> Result<Option<ControllerState>> {
        let Some(state) = self.store.read_state().await? else {
            return Ok(None);
        };
        if state.project_id != project_id {
            tracing::warn!(
                expected = project_id,
                found = %state.project_id,
                "Ignoring controller state for different project"
            );
            return Ok(None);
        }

        let orders = self.store.list_work_orders().await?;

        {
            let mut inner = self.inner.lock().unwrap();
            inner.workers = state.pool.workers.clone();
            inner.order_counter = state.pool.order_counter;
            inner.completed_orders = state.completed_order_ids.iter().cloned().collect();
            inner.failed_orders = state.failed_order_ids.iter().cloned().collect();

            inner.orders = orders
                .into_iter()
                .map(|o| (o.order_id.clone(), o))
                .collect();

            inner.active_by_issue = inner
                .orders
                .values()
                .filter(|o| {
                    !inner.completed_orders.contains(&o.order_id)
                        && !inner.failed_orders.contains(&o.order_id)
                })
                .map(|o| (o.issue_id.clone(), o.order_id.clone()))
                .collect();

            inner.assigned_order = inner
                .workers
                .iter()
                .filter(|w| w.status == WorkerStatus::Working)
                .filter_map(|w| {
                    let issue = w.current_issue.as_ref()?;
                    let order_id = inner.active_by_issue.get(issue)?;
                    Some((w.id.clone(), order_id.clone()))
                })
                .collect();
        }

        self.queue.restore(state.queue.clone());
        self.update_gauges();
        tracing::info!(project_id, "Controller state restored");
        Ok(Some(state))
    }

    fn update_gauges(&self) {
        let status = self.status();
        self.collector.update_pool_gauges(&status);
        self.collector.update_queue_gauges(&self.queue.status());
    }
}

fn worker_mut<'a>(inner: &'a mut PoolInner, worker_id: &WorkerId) -> Result<&'a mut Worker> {
    inner
        .workers
        .iter_mut()
        .find(|w| &w.id == worker_id)
        .ok_or_else(|| ControllerError::WorkerNotFound(worker_id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_common::config::QueueConfig;
    use foreman_common::types::{IssuePriority, IssueStatus};

    fn node(id: &str) -> IssueNode {
        IssueNode {
            id: IssueId::from(id),
            title: format!("Issue {}", id),
            priority: IssuePriority::P1,
            effort: 1.0,
            status: IssueStatus::Ready,
            url: None,
            component_id: None,
        }
    }

    fn pool_in(dir: &std::path::Path, max_workers: u32) -> WorkerPool {
        let events = Arc::new(EventBus::new());
        let queue = Arc::new(BoundedWorkQueue::new(
            QueueConfig::default(),
            Arc::clone(&events),
        ));
        let collector = Arc::new(MetricsCollector::new(Default::default()));
        WorkerPool::new(
            PoolConfig {
                max_workers,
                worker_timeout_ms: 600_000,
                work_orders_path: dir.to_path_buf(),
            },
            LockConfig::default(),
            queue,
            events,
            collector,
        )
    }

    #[tokio::test]
    async fn test_initial_pool_is_all_idle_and_numbered() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(dir.path(), 3);

        let status = pool.status();
        assert_eq!(status.total_workers, 3);
        assert_eq!(status.idle_workers, 3);
        assert_eq!(pool.available_slot(), Some(WorkerId::numbered(1)));
    }

    #[tokio::test]
    async fn test_assign_complete_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(dir.path(), 2);
        pool.init().await.unwrap();

        let order = pool
            .create_work_order(&node("A"), 50, Default::default(), vec![])
            .await
            .unwrap();
        assert_eq!(order.order_id, OrderId::numbered(1));

        let worker = pool.available_slot().unwrap();
        pool.assign_work(&worker, &order.order_id).unwrap();

        let status = pool.status();
        assert_eq!(status.working_workers, 1);
        assert!(status.workers.iter().all(|w| w.invariant_holds()));

        pool.complete_work(&worker, &WorkResult::success(order.order_id.clone()))
            .unwrap();

        let status = pool.status();
        assert_eq!(status.idle_workers, 2);
        assert_eq!(status.workers[0].completed_tasks, 1);
        let (completed, failed) = pool.terminal_orders();
        assert_eq!(completed, vec![order.order_id]);
        assert!(failed.is_empty());
    }

    #[tokio::test]
    async fn test_complete_work_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(dir.path(), 1);
        pool.init().await.unwrap();

        let order = pool
            .create_work_order(&node("A"), 50, Default::default(), vec![])
            .await
            .unwrap();
        let worker = WorkerId::numbered(1);
        pool.assign_work(&worker, &order.order_id).unwrap();

        let result = WorkResult::success(order.order_id.clone());
        pool.complete_work(&worker, &result).unwrap();
        pool.complete_work(&worker, &result).unwrap();

        assert_eq!(pool.status().workers[0].completed_tasks, 1);
    }

    #[tokio::test]
    async fn test_assign_to_busy_worker_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(dir.path(), 1);
        pool.init().await.unwrap();

        let first = pool
            .create_work_order(&node("A"), 50, Default::default(), vec![])
            .await
            .unwrap();
        let second = pool
            .create_work_order(&node("B"), 50, Default::default(), vec![])
            .await
            .unwrap();

        let worker = WorkerId::numbered(1);
        pool.assign_work(&worker, &first.order_id).unwrap();
        let err = pool.assign_work(&worker, &second.order_id).unwrap_err();
        assert!(matches!(err, ControllerError::WorkerNotAvailable { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_active_order_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(dir.path(), 1);
        pool.init().await.unwrap();

        pool.create_work_order(&node("A"), 50, Default::default(), vec![])
            .await
            .unwrap();
        let err = pool
            .create_work_order(&node("A"), 50, Default::default(), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::WorkOrderCreation { .. }));
    }

    #[tokio::test]
    async fn test_fail_work_moves_worker_to_error() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(dir.path(), 1);
        pool.init().await.unwrap();

        let order = pool
            .create_work_order(&node("A"), 50, Default::default(), vec![])
            .await
            .unwrap();
        let worker = WorkerId::numbered(1);
        pool.assign_work(&worker, &order.order_id).unwrap();
        pool.fail_work(&worker, &order.order_id, "adapter crashed")
            .unwrap();

        let status = pool.status();
        assert_eq!(status.error_workers, 1);
        assert_eq!(
            status.workers[0].last_error.as_deref(),
            Some("adapter crashed")
        );
        let (_, failed) = pool.terminal_orders();
        assert_eq!(failed, vec![order.order_id]);

        pool.release_worker(&worker).unwrap();
        assert_eq!(pool.status().idle_workers, 1);
        assert!(pool.status().workers[0].last_error.is_none());
    }

    #[tokio::test]
    async fn test_reassign_to_idle_worker() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(dir.path(), 2);
        pool.init().await.unwrap();

        let order = pool
            .create_work_order(&node("A"), 50, Default::default(), vec![])
            .await
            .unwrap();
        pool.assign_work(&WorkerId::numbered(1), &order.order_id)
            .unwrap();

        let target = pool.reassign_task(&IssueId::from("A")).await.unwrap();
        assert_eq!(target, Some(WorkerId::numbered(2)));

        let status = pool.status();
        assert_eq!(status.working_workers, 1);
        assert_eq!(
            status.workers[1].current_issue,
            Some(IssueId::from("A"))
        );
        assert!(status.workers[0].current_issue.is_none());
    }

    #[tokio::test]
    async fn test_reassign_without_idle_worker_requeues() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(dir.path(), 1);
        pool.init().await.unwrap();

        let order = pool
            .create_work_order(&node("A"), 77, Default::default(), vec![])
            .await
            .unwrap();
        let worker = WorkerId::numbered(1);
        pool.assign_work(&worker, &order.order_id).unwrap();
        // Zombie workers stay errored, so the only worker is unavailable.
        pool.mark_worker_zombie(&worker).unwrap();

        let target = pool.reassign_task(&IssueId::from("A")).await.unwrap();
        assert_eq!(target, None);
        assert!(pool.queue().contains(&IssueId::from("A")));

        let snapshot = pool.queue().snapshot();
        assert_eq!(snapshot.entries[0].priority_score, 77);
        assert_eq!(snapshot.entries[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_expire_timed_out_assignment() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = pool_in(dir.path(), 1);
        pool.config.worker_timeout_ms = 1000;
        pool.init().await.unwrap();

        let order = pool
            .create_work_order(&node("A"), 50, Default::default(), vec![])
            .await
            .unwrap();
        let worker = WorkerId::numbered(1);
        pool.assign_work(&worker, &order.order_id).unwrap();

        // Not yet expired.
        assert!(pool.expire_timed_out(Utc::now()).is_empty());

        let later = Utc::now() + ChronoDuration::milliseconds(1500);
        let expired = pool.expire_timed_out(later);
        assert_eq!(expired, vec![(worker.clone(), order.order_id.clone())]);

        let status = pool.status();
        assert_eq!(status.idle_workers, 1);
        let (_, failed) = pool.terminal_orders();
        assert_eq!(failed, vec![order.order_id]);
    }

    #[tokio::test]
    async fn test_respawn_returns_interrupted_issue() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(dir.path(), 1);
        pool.init().await.unwrap();

        let order = pool
            .create_work_order(&node("A"), 50, Default::default(), vec![])
            .await
            .unwrap();
        let worker = WorkerId::numbered(1);
        pool.assign_work(&worker, &order.order_id).unwrap();
        pool.mark_worker_zombie(&worker).unwrap();

        let interrupted = pool.respawn_worker(&worker).unwrap();
        assert_eq!(interrupted, Some(IssueId::from("A")));
        assert_eq!(pool.status().idle_workers, 1);
    }
}
