//! Controller end-to-end runs with a stub worker adapter.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use foreman_common::config::ControllerConfig;
use foreman_common::ids::{IssueId, WorkerId};
use foreman_common::types::{
    DependencyEdge, IssueGraph, IssueNode, IssuePriority, IssueStatus, WorkOrder, WorkResult,
};

use foreman_controller::controller::{Controller, WorkerAdapter};

fn node(id: &str, priority: IssuePriority, effort: f64) -> IssueNode {
    IssueNode {
        id: IssueId::from(id),
        title: format!("Issue {}", id),
        priority,
        effort,
        status: IssueStatus::Pending,
        url: None,
        component_id: None,
    }
}

fn edge(from: &str, to: &str) -> DependencyEdge {
    DependencyEdge {
        from: IssueId::from(from),
        to: IssueId::from(to),
    }
}

fn test_config(dir: &std::path::Path, max_workers: u32) -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.pool.max_workers = max_workers;
    config.pool.work_orders_path = dir.join("state");
    config.progress.report_path = dir.join("reports");
    config
}

struct RecordingAdapter {
    started: Mutex<Vec<IssueId>>,
    failing: HashSet<IssueId>,
    delay: Duration,
}

impl RecordingAdapter {
    fn new(delay_ms: u64) -> Self {
        Self {
            started: Mutex::new(Vec::new()),
            failing: HashSet::new(),
            delay: Duration::from_millis(delay_ms),
        }
    }

    fn failing(mut self, id: &str) -> Self {
        self.failing.insert(IssueId::from(id));
        self
    }

    fn started(&self) -> Vec<IssueId> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerAdapter for RecordingAdapter {
    async fn execute(&self, _worker_id: &WorkerId, order: &WorkOrder) -> WorkResult {
        self.started.lock().unwrap().push(order.issue_id.clone());
        tokio::time::sleep(self.delay).await;
        if self.failing.contains(&order.issue_id) {
            WorkResult::failure(order.order_id.clone(), "stubbed failure")
        } else {
            WorkResult::success(order.order_id.clone())
        }
    }
}

/// While A runs, C stays blocked even though a second worker is free.
#[tokio::test]
async fn linear_chain_executes_serially_despite_free_worker() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(RecordingAdapter::new(10));
    let controller = Controller::new(test_config(dir.path(), 2), "proj", Arc::clone(&adapter) as Arc<dyn WorkerAdapter>);
    controller.init().await.unwrap();

    let graph = IssueGraph {
        nodes: vec![
            node("A", IssuePriority::P1, 1.0),
            node("B", IssuePriority::P1, 1.0),
            node("C", IssuePriority::P1, 1.0),
        ],
        edges: vec![edge("B", "A"), edge("C", "B")],
    };

    let summary = controller.run(graph).await.unwrap();

    assert_eq!(adapter.started(), vec![
        IssueId::from("A"),
        IssueId::from("B"),
        IssueId::from("C"),
    ]);
    assert_eq!(summary.completed.len(), 3);
    assert!(summary.failed.is_empty());
    assert!(summary.blocked.is_empty());
}

/// Fanout dispatch order follows priority scores; `all_completed`
/// fires exactly once.
#[tokio::test]
async fn fanout_dispatches_by_priority_and_completes_once() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(RecordingAdapter::new(10));
    let controller = Controller::new(test_config(dir.path(), 2), "proj", Arc::clone(&adapter) as Arc<dyn WorkerAdapter>);
    controller.init().await.unwrap();

    let all_completed = Arc::new(AtomicUsize::new(0));
    {
        let all_completed = Arc::clone(&all_completed);
        controller.events().subscribe(move |event| {
            if event.kind() == "all_completed" {
                all_completed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });
    }

    let graph = IssueGraph {
        nodes: vec![
            node("A", IssuePriority::P0, 2.0),
            node("B", IssuePriority::P1, 1.0),
            node("C", IssuePriority::P2, 1.0),
        ],
        edges: vec![],
    };

    let summary = controller.run(graph).await.unwrap();

    let started = adapter.started();
    // Two workers: A and B go out first, in score order; C follows after a
    // completion frees a slot.
    assert_eq!(started[0], IssueId::from("A"));
    assert_eq!(started[1], IssueId::from("B"));
    assert_eq!(started[2], IssueId::from("C"));
    assert_eq!(summary.completed.len(), 3);
    assert_eq!(all_completed.load(Ordering::SeqCst), 1);
}

/// A failed issue blocks its transitive dependents; unrelated work still
/// completes.
#[tokio::test]
async fn failure_blocks_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(RecordingAdapter::new(5).failing("A"));
    let controller = Controller::new(test_config(dir.path(), 2), "proj", Arc::clone(&adapter) as Arc<dyn WorkerAdapter>);
    controller.init().await.unwrap();

    let graph = IssueGraph {
        nodes: vec![
            node("A", IssuePriority::P1, 1.0),
            node("B", IssuePriority::P1, 1.0),
            node("C", IssuePriority::P1, 1.0),
            node("D", IssuePriority::P1, 1.0),
        ],
        // B depends on A (fails); C depends on B; D is independent.
        edges: vec![edge("B", "A"), edge("C", "B")],
    };

    let summary = controller.run(graph).await.unwrap();

    assert_eq!(summary.failed, vec![IssueId::from("A")]);
    assert_eq!(summary.completed, vec![IssueId::from("D")]);
    let blocked: HashSet<&str> = summary.blocked.iter().map(|i| i.as_str()).collect();
    assert_eq!(blocked, HashSet::from(["B", "C"]));
}

/// Cycle members never execute; the rest of the graph still does.
#[tokio::test]
async fn cycle_members_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(RecordingAdapter::new(5));
    let controller = Controller::new(test_config(dir.path(), 2), "proj", Arc::clone(&adapter) as Arc<dyn WorkerAdapter>);
    controller.init().await.unwrap();

    let graph = IssueGraph {
        nodes: vec![
            node("A", IssuePriority::P1, 1.0),
            node("B", IssuePriority::P1, 1.0),
            node("C", IssuePriority::P1, 1.0),
            node("D", IssuePriority::P1, 1.0),
        ],
        edges: vec![edge("A", "B"), edge("B", "A"), edge("C", "A")],
    };

    let summary = controller.run(graph).await.unwrap();

    assert_eq!(adapter.started(), vec![IssueId::from("D")]);
    assert_eq!(summary.completed, vec![IssueId::from("D")]);
    let blocked: HashSet<&str> = summary.blocked.iter().map(|i| i.as_str()).collect();
    assert_eq!(blocked, HashSet::from(["A", "B", "C"]));
}

/// maxWorkers = 1 degrades to strictly serial dispatch in priority order.
#[tokio::test]
async fn single_worker_is_serial_in_priority_order() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(RecordingAdapter::new(5));
    let controller = Controller::new(test_config(dir.path(), 1), "proj", Arc::clone(&adapter) as Arc<dyn WorkerAdapter>);
    controller.init().await.unwrap();

    let graph = IssueGraph {
        nodes: vec![
            node("low", IssuePriority::P3, 1.0),
            node("high", IssuePriority::P0, 1.0),
            node("mid", IssuePriority::P2, 1.0),
        ],
        edges: vec![],
    };

    let summary = controller.run(graph).await.unwrap();

    assert_eq!(adapter.started(), vec![
        IssueId::from("high"),
        IssueId::from("mid"),
        IssueId::from("low"),
    ]);
    assert_eq!(summary.completed.len(), 3);
}

/// Work-order artifacts and the controller state file land on disk.
#[tokio::test]
async fn run_persists_orders_and_state() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = Arc::new(RecordingAdapter::new(5));
    let controller = Controller::new(test_config(dir.path(), 1), "proj", Arc::clone(&adapter) as Arc<dyn WorkerAdapter>);
    controller.init().await.unwrap();

    let graph = IssueGraph {
        nodes: vec![node("A", IssuePriority::P1, 1.0)],
        edges: vec![],
    };
    controller.run(graph).await.unwrap();

    assert!(dir.path().join("state/work_orders/WO-001.json").exists());
    assert!(dir.path().join("state/controller_state.json").exists());

    let raw = std::fs::read_to_string(dir.path().join("state/controller_state.json")).unwrap();
    assert!(raw.contains("\"project_id\": \"proj\""));
    assert!(raw.contains("WO-001"));
}
