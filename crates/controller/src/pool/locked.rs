use std::path::PathBuf;

use foreman_common::ids::{IssueId, OrderId, WorkerId};
use foreman_common::types::{ControllerState, WorkResult};
use foreman_common::Result;

use super::WorkerPool;

/// Distributed-lock variants of the state-mutating pool operations.
///
/// When locking is disabled these delegate directly; when enabled they
/// serialize against other processes on the shared `pool_state` path.
impl WorkerPool {
    fn lock_target(&self) -> PathBuf {
        self.config.work_orders_path.join("pool_state")
    }

    pub async fn assign_work_with_lock(
        &self,
        worker_id: &WorkerId,
        order_id: &OrderId,
    ) -> Result<()> {
        match &self.distributed_lock {
            Some(lock) => {
                lock.with_lock(&self.lock_target(), || async {
                    self.assign_work(worker_id, order_id)
                })
                .await
            }
            None => self.assign_work(worker_id, order_id),
        }
    }

    pub async fn complete_work_with_lock(
        &self,
        worker_id: &WorkerId,
        result: &WorkResult,
    ) -> Result<()> {
        match &self.distributed_lock {
            Some(lock) => {
                lock.with_lock(&self.lock_target(), || async {
                    self.complete_work(worker_id, result)
                })
                .await
            }
            None => self.complete_work(worker_id, result),
        }
    }

    pub async fn fail_work_with_lock(
        &self,
        worker_id: &WorkerId,
        order_id: &OrderId,
        error: &str,
    ) -> Result<()> {
        match &self.distributed_lock {
            Some(lock) => {
                lock.with_lock(&self.lock_target(), || async {
                    self.fail_work(worker_id, order_id, error)
                })
                .await
            }
            None => self.fail_work(worker_id, order_id, error),
        }
    }

    pub async fn reassign_task_with_lock(&self, issue_id: &IssueId) -> Result<Option<WorkerId>> {
        match &self.distributed_lock {
            Some(lock) => {
                lock.with_lock(&self.lock_target(), || self.reassign_task(issue_id))
                    .await
            }
            None => self.reassign_task(issue_id).await,
        }
    }

    pub async fn save_state_with_lock(&self, project_id: &str) -> Result<()> {
        match &self.distributed_lock {
            Some(lock) => {
                lock.with_lock(&self.lock_target(), || self.save_state(project_id))
                    .await
            }
            None => self.save_state(project_id).await,
        }
    }

    /// Reload shared state, merge terminal order sets (the external side
    /// wins on conflict), and re-persist the merged view.
    pub async fn synchronize_state(&self, project_id: &str) -> Result<()> {
        let sync = || async {
            if let Some(shared) = self.store.read_state().await? {
                if shared.project_id == project_id {
                    self.merge_terminal_sets(&shared);
                } else {
                    tracing::warn!(
                        expected = project_id,
                        found = %shared.project_id,
                        "Shared state belongs to a different project, not merging"
                    );
                }
            }
            self.save_state(project_id).await
        };

        match &self.distributed_lock {
            Some(lock) => lock.with_lock(&self.lock_target(), sync).await,
            None => sync().await,
        }
    }

    fn merge_terminal_sets(&self, external: &ControllerState) {
        let mut inner = self.inner.lock().unwrap();
        for id in &external.completed_order_ids {
            inner.failed_orders.remove(id);
            inner.completed_orders.insert(id.clone());
        }
        for id in &external.failed_order_ids {
            inner.completed_orders.remove(id);
            inner.failed_orders.insert(id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use foreman_common::config::{LockConfig, PoolConfig, QueueConfig};
    use foreman_common::types::{
        IssueNode, IssuePriority, IssueStatus, PoolSnapshot, QueueSnapshot,
    };

    use super::*;
    use crate::events::EventBus;
    use crate::metrics_collector::MetricsCollector;
    use crate::queue::BoundedWorkQueue;
    use crate::store::StateStore;

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

    fn pool_with_lock(dir: &std::path::Path, enabled: bool) -> WorkerPool {
        let events = Arc::new(EventBus::new());
        let queue = Arc::new(BoundedWorkQueue::new(
            QueueConfig::default(),
            Arc::clone(&events),
        ));
        WorkerPool::new(
            PoolConfig {
                max_workers: 2,
                worker_timeout_ms: 600_000,
                work_orders_path: dir.to_path_buf(),
            },
            LockConfig {
                enabled,
                lock_retry_attempts: 3,
                lock_retry_delay_ms: 5,
                ..LockConfig::default()
            },
            queue,
            events,
            Arc::new(MetricsCollector::new(Default::default())),
        )
    }

    #[tokio::test]
    async fn test_locked_variants_leave_no_lock_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with_lock(dir.path(), true);
        pool.init().await.unwrap();

        let order = pool
            .create_work_order(&node("A"), 50, Default::default(), vec![])
            .await
            .unwrap();
        pool.assign_work_with_lock(&WorkerId::numbered(1), &order.order_id)
            .await
            .unwrap();
        pool.complete_work_with_lock(
            &WorkerId::numbered(1),
            &WorkResult::success(order.order_id),
        )
        .await
        .unwrap();
        pool.save_state_with_lock("proj").await.unwrap();

        assert!(!dir.path().join("pool_state.lock").exists());
        assert!(dir.path().join("controller_state.json").exists());
    }

    #[tokio::test]
    async fn test_synchronize_merges_external_terminal_sets() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with_lock(dir.path(), true);
        pool.init().await.unwrap();

        // Local: WO-001 completed.
        let order = pool
            .create_work_order(&node("A"), 50, Default::default(), vec![])
            .await
            .unwrap();
        pool.assign_work(&WorkerId::numbered(1), &order.order_id)
            .unwrap();
        pool.complete_work(
            &WorkerId::numbered(1),
            &WorkResult::success(order.order_id.clone()),
        )
        .unwrap();

        // A cooperating process persisted WO-001 as failed and WO-002 as
        // completed; its view wins.
        let external = ControllerState {
            project_id: "proj".into(),
            last_updated: Utc::now(),
            pool: PoolSnapshot::default(),
            queue: QueueSnapshot::default(),
            completed_order_ids: vec![OrderId::numbered(2)],
            failed_order_ids: vec![order.order_id.clone()],
        };
        StateStore::new(dir.path()).write_state(&external).await.unwrap();

        pool.synchronize_state("proj").await.unwrap();

        let (completed, failed) = pool.terminal_orders();
        assert_eq!(completed, vec![OrderId::numbered(2)]);
        assert_eq!(failed, vec![order.order_id]);
    }
}
