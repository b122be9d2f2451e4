//! Literal end-to-end scenarios for the analyzer, queue, health monitor
//! and stuck-worker handler, driven with injected clocks and durations
//! rather than real sleeps.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use foreman_common::config::{
    AnalyzerConfig, HealthConfig, QueueConfig, RejectionPolicy, StuckConfig,
};
use foreman_common::ids::{IssueId, WorkerId};
use foreman_common::types::{
    DependencyEdge, Heartbeat, HeartbeatStatus, HealthStatus, IssueGraph, IssueNode,
    IssuePriority, IssueStatus,
};
use foreman_common::Result;

use foreman_controller::analyzer::GraphAnalyzer;
use foreman_controller::events::EventBus;
use foreman_controller::health::HealthMonitor;
use foreman_controller::queue::BoundedWorkQueue;
use foreman_controller::recovery::{RecoveryAction, RecoveryOutcome, RecoverySink};
use foreman_controller::stuck::{ObservedWorker, StuckWorkerHandler};

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

/// Linear chain: A <- B <- C, all P1, effort 1 each.
#[test]
fn linear_chain_order_groups_and_critical_path() {
    let graph = IssueGraph {
        nodes: vec![
            node("A", IssuePriority::P1, 1.0),
            node("B", IssuePriority::P1, 1.0),
            node("C", IssuePriority::P1, 1.0),
        ],
        edges: vec![edge("B", "A"), edge("C", "B")],
    };

    let result = GraphAnalyzer::new(AnalyzerConfig::default())
        .analyze(&graph)
        .unwrap();

    let order: Vec<&str> = result.execution_order.iter().map(|i| i.as_str()).collect();
    assert_eq!(order, vec!["A", "B", "C"]);

    let groups: Vec<Vec<&str>> = result
        .parallel_groups
        .iter()
        .map(|g| g.issues.iter().map(|i| i.as_str()).collect())
        .collect();
    assert_eq!(groups, vec![vec!["A"], vec!["B"], vec!["C"]]);

    let path: Vec<&str> = result.critical_path.path.iter().map(|i| i.as_str()).collect();
    assert_eq!(path, vec!["A", "B", "C"]);
    assert_eq!(result.critical_path.total_effort, 3.0);

    // With no cycles, the execution order is a complete topological order.
    assert_eq!(result.execution_order.len(), graph.nodes.len());
}

/// Parallel fanout: independent A (P0), B (P1), C (P2).
#[test]
fn parallel_fanout_priority_order() {
    let graph = IssueGraph {
        nodes: vec![
            node("A", IssuePriority::P0, 2.0),
            node("B", IssuePriority::P1, 1.0),
            node("C", IssuePriority::P2, 1.0),
        ],
        edges: vec![],
    };

    let result = GraphAnalyzer::new(AnalyzerConfig::default())
        .analyze(&graph)
        .unwrap();

    let score = |id: &str| result.issues[&IssueId::from(id)].priority_score;
    assert!(score("A") > score("B"));
    assert!(score("B") > score("C"));

    let order: Vec<&str> = result.prioritized_queue.iter().map(|i| i.as_str()).collect();
    assert_eq!(order, vec!["A", "B", "C"]);

    // One parallel group at depth 0 holding all three.
    assert_eq!(result.parallel_groups.len(), 1);
    assert_eq!(result.parallel_groups[0].issues.len(), 3);
}

/// Cycle tolerance: A and B depend on each other, C depends on A,
/// D is independent.
#[test]
fn cycle_tolerance_blocks_only_cycle_reachable_nodes() {
    let graph = IssueGraph {
        nodes: vec![
            node("A", IssuePriority::P1, 1.0),
            node("B", IssuePriority::P1, 1.0),
            node("C", IssuePriority::P1, 1.0),
            node("D", IssuePriority::P1, 1.0),
        ],
        edges: vec![edge("A", "B"), edge("B", "A"), edge("C", "A")],
    };

    // Analysis does not error.
    let result = GraphAnalyzer::new(AnalyzerConfig::default())
        .analyze(&graph)
        .unwrap();

    assert_eq!(result.cycles.len(), 1);
    let cycle: Vec<&str> = result.cycles[0].nodes.iter().map(|i| i.as_str()).collect();
    assert_eq!(cycle, vec!["A", "B", "A"]);

    let blocked: Vec<&str> = result.blocked_by_cycle.iter().map(|i| i.as_str()).collect();
    assert_eq!(blocked, vec!["A", "B", "C"]);

    let order: Vec<&str> = result.execution_order.iter().map(|i| i.as_str()).collect();
    assert_eq!(order, vec!["D"]);
}

/// Backpressure and rejection on a size-10 queue with the reject
/// policy. All threshold checks use the pre-admission ratio.
#[tokio::test]
async fn backpressure_and_rejection_thresholds() {
    let events = Arc::new(EventBus::new());
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let log = Arc::clone(&log);
        events.subscribe(move |event| {
            match event.kind() {
                "soft_limit_warning" => log.lock().unwrap().push("soft"),
                "backpressure_activated" => log.lock().unwrap().push("bp_on"),
                "backpressure_deactivated" => log.lock().unwrap().push("bp_off"),
                _ => {}
            }
            Ok(())
        });
    }

    let queue = BoundedWorkQueue::new(
        QueueConfig {
            max_size: 10,
            soft_limit_ratio: 0.8,
            backpressure_threshold: 0.6,
            rejection_policy: RejectionPolicy::Reject,
            ..QueueConfig::default()
        },
        events,
    );

    // First six admissions: no backpressure, no soft limit.
    for i in 1..=6 {
        let result = queue.enqueue(IssueId::from(format!("t{}", i)), 50).await;
        assert!(result.success);
        assert!(!result.backpressure_applied, "enqueue {} backpressured", i);
    }
    assert!(log.lock().unwrap().is_empty());

    // 7th: ratio 0.6 → suspends with backpressure, fires activation once.
    let result = queue.enqueue(IssueId::from("t7"), 50).await;
    assert!(result.success);
    assert!(result.backpressure_applied);
    assert_eq!(result.delay_ms, Some(100));
    assert_eq!(*log.lock().unwrap(), vec!["bp_on"]);

    // 8th: still below the soft limit.
    queue.enqueue(IssueId::from("t8"), 50).await;
    assert!(!log.lock().unwrap().contains(&"soft"));

    // 9th: ratio 0.8 → soft-limit warning fires.
    queue.enqueue(IssueId::from("t9"), 50).await;
    assert_eq!(*log.lock().unwrap(), vec!["bp_on", "soft"]);

    queue.enqueue(IssueId::from("t10"), 50).await;

    // 11th: the queue is full → rejected with queue_full.
    let result = queue.enqueue(IssueId::from("t11"), 50).await;
    assert!(!result.success);
    assert_eq!(result.reason.as_deref(), Some("queue_full"));
    assert_eq!(queue.len(), 10);

    // Draining far enough re-arms both edges.
    for _ in 0..8 {
        queue.dequeue();
    }
    assert_eq!(*log.lock().unwrap(), vec!["bp_on", "soft", "bp_off"]);
}

struct PoolStub {
    reassigned: Mutex<Vec<IssueId>>,
    restarts: AtomicUsize,
}

#[async_trait]
impl RecoverySink for PoolStub {
    async fn dispatch(&self, action: RecoveryAction) -> Result<RecoveryOutcome> {
        match action {
            RecoveryAction::ReassignTask { issue_id, .. } => {
                self.reassigned.lock().unwrap().push(issue_id);
                Ok(RecoveryOutcome::Reassigned(None))
            }
            RecoveryAction::RestartWorker { .. } => {
                self.restarts.fetch_add(1, Ordering::SeqCst);
                Ok(RecoveryOutcome::Handled)
            }
            _ => Ok(RecoveryOutcome::Handled),
        }
    }
}

/// Zombie detection: heartbeat interval 1 s, threshold 3, silence for
/// 3.5 s. Exactly one zombie event, the in-flight task reassigned, one
/// restart attempt, and the cooldown blocks a second attempt.
#[tokio::test]
async fn zombie_detection_reassign_and_cooldown() {
    let events = Arc::new(EventBus::new());
    let zombie_events = Arc::new(AtomicUsize::new(0));
    {
        let zombie_events = Arc::clone(&zombie_events);
        events.subscribe(move |event| {
            if event.kind() == "zombie_detected" {
                zombie_events.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });
    }

    let sink = Arc::new(PoolStub {
        reassigned: Mutex::new(Vec::new()),
        restarts: AtomicUsize::new(0),
    });
    let monitor = HealthMonitor::new(
        HealthConfig {
            heartbeat_interval_ms: 1000,
            missed_heartbeat_threshold: 3,
            restart_cooldown_ms: 60_000,
            max_restarts: 3,
            ..HealthConfig::default()
        },
        events,
        Arc::clone(&sink) as Arc<dyn RecoverySink>,
    );

    let t0 = Utc::now();
    monitor.record_heartbeat(&Heartbeat {
        worker_id: WorkerId::numbered(1),
        timestamp: t0,
        current_task: Some(IssueId::from("ISSUE-42")),
        progress: Some(40.0),
        memory_usage: 64 * 1024 * 1024,
        cpu_usage: Some(12.0),
        status: HeartbeatStatus::Busy,
    });

    // 3.5 s of silence, then the periodic tick inspects the worker.
    monitor
        .tick_at(t0 + ChronoDuration::milliseconds(3500))
        .await;

    assert_eq!(zombie_events.load(Ordering::SeqCst), 1);
    assert_eq!(
        *sink.reassigned.lock().unwrap(),
        vec![IssueId::from("ISSUE-42")]
    );
    assert_eq!(sink.restarts.load(Ordering::SeqCst), 1);

    // The restart succeeded, so the worker is healthy again; a second
    // zombie cycle within the cooldown window attempts no restart.
    let state = monitor.worker_state(&WorkerId::numbered(1)).unwrap();
    assert_eq!(state.health_status, HealthStatus::Healthy);

    monitor
        .tick_at(t0 + ChronoDuration::milliseconds(8000))
        .await;
    assert_eq!(sink.restarts.load(Ordering::SeqCst), 1);
}

/// Stuck escalation: warning 60 s, stuck 120 s, critical 300 s,
/// max recovery attempts 3, pause on critical.
#[tokio::test]
async fn stuck_escalation_progression() {
    let events = Arc::new(EventBus::new());
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let log = Arc::clone(&log);
        events.subscribe(move |event| {
            if matches!(
                event.kind(),
                "worker_warning" | "worker_stuck" | "worker_critical" | "critical_escalation"
            ) {
                log.lock().unwrap().push(event.kind().to_string());
            }
            Ok(())
        });
    }

    #[derive(Default)]
    struct ActionLog {
        actions: Mutex<Vec<&'static str>>,
        pauses: AtomicUsize,
    }

    #[async_trait]
    impl RecoverySink for ActionLog {
        async fn dispatch(&self, action: RecoveryAction) -> Result<RecoveryOutcome> {
            if matches!(action, RecoveryAction::PausePipeline { .. }) {
                self.pauses.fetch_add(1, Ordering::SeqCst);
            }
            self.actions.lock().unwrap().push(action.kind());
            Ok(RecoveryOutcome::Handled)
        }
    }

    let sink = Arc::new(ActionLog::default());
    let handler = StuckWorkerHandler::new(
        StuckConfig {
            warning_threshold_ms: 60_000,
            stuck_threshold_ms: 120_000,
            critical_threshold_ms: 300_000,
            max_recovery_attempts: 3,
            pause_on_critical: true,
            ..StuckConfig::default()
        },
        events,
        Arc::clone(&sink) as Arc<dyn RecoverySink>,
    );

    let observed = |duration_ms: u64| ObservedWorker {
        worker_id: WorkerId::numbered(1),
        issue_id: Some(IssueId::from("ISSUE-9")),
        task_type: None,
        duration_ms,
    };

    // 65 s: warning → send_warning.
    handler.check(&[observed(65_000)]).await;
    // 125 s: stuck, attempt 0 → extend_deadline (startedAt reset drops the
    // observed duration below the thresholds).
    handler.check(&[observed(125_000)]).await;
    handler.check(&[observed(5_000)]).await;
    // Stuck again at 125 s of the extended deadline: attempt 1 → reassign.
    handler.check(&[observed(125_000)]).await;
    handler.check(&[observed(1_000)]).await;

    // The next worker reaches critical three times; each attempt restarts.
    for _ in 0..3 {
        handler.check(&[observed(310_000)]).await;
    }
    // Budget exhausted: critical escalation, pipeline paused.
    handler.check(&[observed(320_000)]).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "worker_warning",
            "worker_stuck",
            "worker_stuck",
            "worker_critical",
            "worker_critical",
            "worker_critical",
            "worker_critical",
            "critical_escalation",
        ]
    );
    assert_eq!(
        *sink.actions.lock().unwrap(),
        vec![
            "send_warning",
            "extend_deadline",
            "reassign_task",
            "restart_worker",
            "restart_worker",
            "restart_worker",
            "pause_pipeline",
        ]
    );
    assert_eq!(sink.pauses.load(Ordering::SeqCst), 1);

    // Further critical observations stay suppressed.
    handler.check(&[observed(330_000)]).await;
    assert_eq!(
        log.lock().unwrap().iter().filter(|k| *k == "critical_escalation").count(),
        1
    );
}
