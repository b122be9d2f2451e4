use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use foreman_common::config::{StuckConfig, StuckThresholds};
use foreman_common::ids::{IssueId, WorkerId};
use foreman_common::types::{Escalation, EscalationLevel, RecoveryActionKind, RecoveryAttempt};

use crate::events::{ControllerEvent, EventBus};
use crate::recovery::{RecoveryAction, RecoverySink};

/// A working worker as observed from a pool snapshot.
#[derive(Clone, Debug)]
pub struct ObservedWorker {
    pub worker_id: WorkerId,
    pub issue_id: Option<IssueId>,
    /// Task type used for threshold overrides (issue component id).
    pub task_type: Option<String>,
    pub duration_ms: u64,
}

#[derive(Default)]
struct StuckState {
    last_level: Option<EscalationLevel>,
    attempts_by_level: HashMap<EscalationLevel, u32>,
    attempts: Vec<RecoveryAttempt>,
    critical_escalated: bool,
}

/// Duration-based escalation with progressive recovery.
///
/// Escalation events fire only on level transitions; repeated ticks at the
/// same level are suppressed. Recovery is requested through the controller's
/// `RecoverySink` — the handler never touches worker state itself.
pub struct StuckWorkerHandler {
    config: StuckConfig,
    events: Arc<EventBus>,
    sink: Arc<dyn RecoverySink>,
    state: Mutex<HashMap<WorkerId, StuckState>>,
}

/// Escalation level for a duration against a threshold triple.
pub fn level_for(duration_ms: u64, thresholds: &StuckThresholds) -> Option<EscalationLevel> {
    if duration_ms >= thresholds.critical_ms {
        Some(EscalationLevel::Critical)
    } else if duration_ms >= thresholds.stuck_ms {
        Some(EscalationLevel::Stuck)
    } else if duration_ms >= thresholds.warning_ms {
        Some(EscalationLevel::Warning)
    } else {
        None
    }
}

impl StuckWorkerHandler {
    pub fn new(config: StuckConfig, events: Arc<EventBus>, sink: Arc<dyn RecoverySink>) -> Self {
        Self {
            config,
            events,
            sink,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate every observed worker once.
    pub async fn check(&self, workers: &[ObservedWorker]) {
        self.check_at(workers, Utc::now()).await;
    }

    pub async fn check_at(&self, workers: &[ObservedWorker], now: DateTime<Utc>) {
        for worker in workers {
            self.check_worker(worker, now).await;
        }
    }

    async fn check_worker(&self, worker: &ObservedWorker, now: DateTime<Utc>) {
        let thresholds = self.config.thresholds_for(worker.task_type.as_deref());
        let level = level_for(worker.duration_ms, &thresholds);

        let transition = {
            let mut state = self.state.lock().unwrap();
            let entry = state.entry(worker.worker_id.clone()).or_default();

            if level == entry.last_level {
                None
            } else {
                let previous = entry.last_level;
                entry.last_level = level;
                level.map(|l| (l, previous, *entry.attempts_by_level.entry(l).or_insert(0)))
            }
        };

        let Some((level, previous, attempt)) = transition else {
            return;
        };

        let action = self.progression_action(level, attempt);
        let escalation = Escalation {
            worker_id: worker.worker_id.clone(),
            issue_id: worker.issue_id.clone(),
            level,
            duration_ms: worker.duration_ms,
            recovery_attempts: attempt,
            timestamp: now,
            suggested_action: action,
        };

        tracing::warn!(
            worker_id = %worker.worker_id,
            level = level.as_str(),
            previous = ?previous.map(|p| p.as_str()),
            duration_ms = worker.duration_ms,
            attempt,
            suggested_action = action.as_str(),
            "Worker escalation"
        );
        metrics::counter!("stuck.escalations", "level" => level.as_str()).increment(1);
        self.events
            .emit(&ControllerEvent::WorkerEscalated(escalation.clone()));

        if self.config.auto_recovery_enabled {
            self.recover(worker, level, attempt, escalation).await;
        }
    }

    fn progression_action(&self, level: EscalationLevel, attempt: u32) -> RecoveryActionKind {
        match level {
            EscalationLevel::Warning => RecoveryActionKind::SendWarning,
            EscalationLevel::Stuck => match attempt {
                0 => RecoveryActionKind::ExtendDeadline,
                1 => RecoveryActionKind::ReassignTask,
                _ => RecoveryActionKind::RestartWorker,
            },
            EscalationLevel::Critical => {
                if attempt < self.config.max_recovery_attempts {
                    RecoveryActionKind::RestartWorker
                } else {
                    RecoveryActionKind::EscalateCritical
                }
            }
        }
    }

    async fn recover(
        &self,
        worker: &ObservedWorker,
        level: EscalationLevel,
        attempt: u32,
        escalation: Escalation,
    ) {
        let action_kind = escalation.suggested_action;
        let action = match action_kind {
            RecoveryActionKind::SendWarning => {
                if attempt > 0 {
                    return;
                }
                RecoveryAction::SendWarning {
                    worker_id: worker.worker_id.clone(),
                    issue_id: worker.issue_id.clone(),
                }
            }
            RecoveryActionKind::ExtendDeadline => RecoveryAction::ExtendDeadline {
                worker_id: worker.worker_id.clone(),
                extension_ms: self.config.deadline_extension_ms,
            },
            RecoveryActionKind::ReassignTask => match &worker.issue_id {
                Some(issue_id) => RecoveryAction::ReassignTask {
                    issue_id: issue_id.clone(),
                    from_worker: worker.worker_id.clone(),
                },
                None => return,
            },
            RecoveryActionKind::RestartWorker => RecoveryAction::RestartWorker {
                worker_id: worker.worker_id.clone(),
            },
            RecoveryActionKind::EscalateCritical => {
                self.escalate_critical(&worker.worker_id, escalation).await;
                return;
            }
        };

        let result = self.sink.dispatch(action).await;
        let success = result.is_ok();
        let error = result.err().map(|e| e.to_string());

        {
            let mut state = self.state.lock().unwrap();
            let entry = state.entry(worker.worker_id.clone()).or_default();
            entry.attempts.push(RecoveryAttempt {
                worker_id: worker.worker_id.clone(),
                issue_id: worker.issue_id.clone(),
                attempt_number: attempt,
                action: action_kind,
                success,
                error,
            });
            *entry.attempts_by_level.entry(level).or_insert(0) += 1;

            // A successful restart clears the escalation history; the next
            // threshold crossing starts over.
            if success && action_kind == RecoveryActionKind::RestartWorker {
                entry.last_level = None;
            }
        }
    }

    /// Emit `critical_escalation` exactly once per worker, optionally
    /// pausing the pipeline.
    async fn escalate_critical(&self, worker_id: &WorkerId, escalation: Escalation) {
        {
            let mut state = self.state.lock().unwrap();
            let entry = state.entry(worker_id.clone()).or_default();
            if entry.critical_escalated {
                return;
            }
            entry.critical_escalated = true;
        }

        tracing::error!(worker_id = %worker_id, "Critical escalation");
        metrics::counter!("stuck.critical_escalations").increment(1);
        self.events
            .emit(&ControllerEvent::CriticalEscalation(escalation));

        if self.config.pause_on_critical {
            if let Err(e) = self
                .sink
                .dispatch(RecoveryAction::PausePipeline {
                    reason: format!("critical escalation on {}", worker_id),
                })
                .await
            {
                tracing::error!(error = %e, "Pipeline pause failed");
            }
        }
    }

    pub fn recovery_attempts(&self, worker_id: &WorkerId) -> Vec<RecoveryAttempt> {
        self.state
            .lock()
            .unwrap()
            .get(worker_id)
            .map(|s| s.attempts.clone())
            .unwrap_or_default()
    }

    /// Forget a worker's escalation history (e.g. after respawn).
    pub fn reset_worker(&self, worker_id: &WorkerId) {
        self.state.lock().unwrap().remove(worker_id);
    }

    /// Periodic check loop over a pool snapshot closure, with watch-channel
    /// shutdown.
    pub fn spawn(
        self: Arc<Self>,
        observe: Arc<dyn Fn() -> Vec<ObservedWorker> + Send + Sync>,
        interval_ms: u64,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let interval = Duration::from_millis(interval_ms);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let workers = observe();
                        self.check(&workers).await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            tracing::info!("Stuck-worker handler shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use foreman_common::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::recovery::RecoveryOutcome;

    #[derive(Default)]
    struct RecordingSink {
        dispatched: Mutex<Vec<&'static str>>,
        pauses: AtomicUsize,
    }

    #[async_trait]
    impl RecoverySink for RecordingSink {
        async fn dispatch(&self, action: RecoveryAction) -> Result<RecoveryOutcome> {
            if matches!(action, RecoveryAction::PausePipeline { .. }) {
                self.pauses.fetch_add(1, Ordering::SeqCst);
            }
            self.dispatched.lock().unwrap().push(action.kind());
            Ok(RecoveryOutcome::Handled)
        }
    }

    fn observed(duration_ms: u64) -> ObservedWorker {
        ObservedWorker {
            worker_id: WorkerId::numbered(1),
            issue_id: Some(IssueId::from("ISSUE-1")),
            task_type: None,
            duration_ms,
        }
    }

    fn config() -> StuckConfig {
        StuckConfig {
            warning_threshold_ms: 60_000,
            stuck_threshold_ms: 120_000,
            critical_threshold_ms: 300_000,
            max_recovery_attempts: 3,
            ..StuckConfig::default()
        }
    }

    fn handler(sink: Arc<RecordingSink>) -> (Arc<StuckWorkerHandler>, Arc<EventBus>) {
        let events = Arc::new(EventBus::new());
        let handler = Arc::new(StuckWorkerHandler::new(
            config(),
            Arc::clone(&events),
            sink,
        ));
        (handler, events)
    }

    #[test]
    fn test_level_derivation() {
        let t = StuckThresholds {
            warning_ms: 60_000,
            stuck_ms: 120_000,
            critical_ms: 300_000,
        };
        assert_eq!(level_for(59_999, &t), None);
        assert_eq!(level_for(60_000, &t), Some(EscalationLevel::Warning));
        assert_eq!(level_for(125_000, &t), Some(EscalationLevel::Stuck));
        assert_eq!(level_for(300_000, &t), Some(EscalationLevel::Critical));
    }

    #[tokio::test]
    async fn test_same_level_is_suppressed() {
        let sink = Arc::new(RecordingSink::default());
        let (handler, events) = handler(Arc::clone(&sink));

        let warnings = Arc::new(AtomicUsize::new(0));
        {
            let warnings = Arc::clone(&warnings);
            events.subscribe(move |event| {
                if event.kind() == "worker_warning" {
                    warnings.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            });
        }

        handler.check(&[observed(65_000)]).await;
        handler.check(&[observed(70_000)]).await;
        handler.check(&[observed(80_000)]).await;

        assert_eq!(warnings.load(Ordering::SeqCst), 1);
        assert_eq!(*sink.dispatched.lock().unwrap(), vec!["send_warning"]);
    }

    #[tokio::test]
    async fn test_stuck_progression_extend_then_reassign() {
        let sink = Arc::new(RecordingSink::default());
        let (handler, events) = handler(Arc::clone(&sink));

        let stuck_events = Arc::new(AtomicUsize::new(0));
        {
            let stuck_events = Arc::clone(&stuck_events);
            events.subscribe(move |event| {
                if event.kind() == "worker_stuck" {
                    stuck_events.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            });
        }

        // 65s: warning. 125s: stuck, attempt 0 → extend_deadline.
        handler.check(&[observed(65_000)]).await;
        handler.check(&[observed(125_000)]).await;

        // Deadline extension reset the observed duration; the worker later
        // gets stuck again → attempt 1 → reassign_task.
        handler.check(&[observed(10_000)]).await;
        handler.check(&[observed(125_000)]).await;

        assert_eq!(stuck_events.load(Ordering::SeqCst), 2);
        assert_eq!(
            *sink.dispatched.lock().unwrap(),
            vec!["send_warning", "extend_deadline", "reassign_task"]
        );
    }

    #[tokio::test]
    async fn test_critical_restarts_then_escalates_once() {
        let sink = Arc::new(RecordingSink::default());
        let (handler, events) = handler(Arc::clone(&sink));

        let critical_escalations = Arc::new(AtomicUsize::new(0));
        {
            let critical_escalations = Arc::clone(&critical_escalations);
            events.subscribe(move |event| {
                if event.kind() == "critical_escalation" {
                    critical_escalations.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            });
        }

        // Each successful restart resets last_level, so each later critical
        // observation is a new transition with the next attempt number.
        for _ in 0..3 {
            handler.check(&[observed(310_000)]).await;
        }
        let restarts = sink
            .dispatched
            .lock()
            .unwrap()
            .iter()
            .filter(|a| **a == "restart_worker")
            .count();
        assert_eq!(restarts, 3);
        assert_eq!(critical_escalations.load(Ordering::SeqCst), 0);

        // Attempt budget exhausted → critical escalation, exactly once.
        handler.check(&[observed(320_000)]).await;
        handler.check(&[observed(330_000)]).await;
        assert_eq!(critical_escalations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pause_on_critical_invokes_pipeline_pause() {
        let sink = Arc::new(RecordingSink::default());
        let events = Arc::new(EventBus::new());
        let mut cfg = config();
        cfg.pause_on_critical = true;
        cfg.max_recovery_attempts = 0;
        let handler = StuckWorkerHandler::new(cfg, events, Arc::clone(&sink) as Arc<dyn RecoverySink>);

        handler.check(&[observed(310_000)]).await;
        assert_eq!(sink.pauses.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_task_type_override_changes_thresholds() {
        let sink = Arc::new(RecordingSink::default());
        let events = Arc::new(EventBus::new());
        let mut cfg = config();
        cfg.task_type_overrides.insert(
            "slow-jobs".into(),
            StuckThresholds {
                warning_ms: 600_000,
                stuck_ms: 1_200_000,
                critical_ms: 3_000_000,
            },
        );
        let handler = StuckWorkerHandler::new(cfg, events, Arc::clone(&sink) as Arc<dyn RecoverySink>);

        let mut worker = observed(310_000);
        worker.task_type = Some("slow-jobs".into());
        handler.check(&[worker]).await;

        // Under the override 310s is not even a warning.
        assert!(sink.dispatched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recovery_attempts_recorded() {
        let sink = Arc::new(RecordingSink::default());
        let (handler, _events) = handler(sink);

        handler.check(&[observed(65_000)]).await;
        handler.check(&[observed(125_000)]).await;

        let attempts = handler.recovery_attempts(&WorkerId::numbered(1));
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].action, RecoveryActionKind::SendWarning);
        assert_eq!(attempts[1].action, RecoveryActionKind::ExtendDeadline);
        assert!(attempts.iter().all(|a| a.success));
    }
}
