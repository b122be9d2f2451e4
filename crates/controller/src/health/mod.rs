use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use foreman_common::config::HealthConfig;
use foreman_common::ids::{IssueId, WorkerId};
use foreman_common::types::{Heartbeat, HealthState, HealthStatus, WorkerHealth};

use crate::events::{ControllerEvent, EventBus};
use crate::recovery::{RecoveryAction, RecoverySink};

/// Zombie recovery work computed under the state lock, executed after it
/// is released.
struct PendingRecovery {
    worker_id: WorkerId,
    current_task: Option<IssueId>,
    newly_zombie: bool,
}

/// Heartbeat-driven liveness tracking with zombie detection and restart.
///
/// Holds only a derived view per worker; recovery goes through the
/// controller's `RecoverySink`, never by mutating workers directly.
pub struct HealthMonitor {
    config: HealthConfig,
    events: Arc<EventBus>,
    sink: Arc<dyn RecoverySink>,
    state: Mutex<HashMap<WorkerId, HealthState>>,
    /// Workers whose `worker_restart_failed` terminal event already fired.
    terminal: Mutex<HashSet<WorkerId>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, events: Arc<EventBus>, sink: Arc<dyn RecoverySink>) -> Self {
        Self {
            config,
            events,
            sink,
            state: Mutex::new(HashMap::new()),
            terminal: Mutex::new(HashSet::new()),
        }
    }

    /// Track a worker from the start rather than waiting for its first
    /// heartbeat.
    pub fn register_worker(&self, worker_id: WorkerId) {
        self.state
            .lock()
            .unwrap()
            .entry(worker_id)
            .or_insert_with(HealthState::default);
    }

    /// Record a heartbeat. Unknown workers auto-register; a degraded worker
    /// is promoted back to healthy. A zombie keeps its state until a
    /// restart succeeds.
    pub fn record_heartbeat(&self, heartbeat: &Heartbeat) {
        let mut emitted = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            let entry = state
                .entry(heartbeat.worker_id.clone())
                .or_insert_with(HealthState::default);

            entry.last_heartbeat = Some(match entry.last_heartbeat {
                Some(existing) => existing.max(heartbeat.timestamp),
                None => heartbeat.timestamp,
            });
            entry.missed_heartbeats = 0;
            entry.current_task = heartbeat.current_task.clone();
            if entry.health_status == HealthStatus::Degraded {
                entry.health_status = HealthStatus::Healthy;
            }

            if heartbeat.memory_usage > self.config.memory_threshold_bytes {
                emitted.push(ControllerEvent::MemoryThresholdExceeded {
                    worker_id: heartbeat.worker_id.clone(),
                    memory_usage: heartbeat.memory_usage,
                });
            }
        }

        for event in emitted {
            self.events.emit(&event);
        }
    }

    pub fn health_snapshot(&self) -> Vec<WorkerHealth> {
        let state = self.state.lock().unwrap();
        let mut snapshot: Vec<WorkerHealth> = state
            .iter()
            .map(|(worker_id, s)| WorkerHealth {
                worker_id: worker_id.clone(),
                state: s.clone(),
            })
            .collect();
        snapshot.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        snapshot
    }

    pub fn worker_state(&self, worker_id: &WorkerId) -> Option<HealthState> {
        self.state.lock().unwrap().get(worker_id).cloned()
    }

    pub async fn tick(&self) {
        self.tick_at(Utc::now()).await;
    }

    /// One inspection pass at time `now`: update missed counts, run the
    /// state machine, recover zombies.
    pub async fn tick_at(&self, now: DateTime<Utc>) {
        let mut emitted = Vec::new();
        let mut pending: Vec<PendingRecovery> = Vec::new();

        {
            let mut state = self.state.lock().unwrap();
            for (worker_id, entry) in state.iter_mut() {
                if entry.health_status == HealthStatus::Restarting {
                    continue;
                }

                let missed = match entry.last_heartbeat {
                    Some(last) => {
                        let elapsed_ms = (now - last).num_milliseconds().max(0) as u64;
                        (elapsed_ms / self.config.heartbeat_interval_ms) as u32
                    }
                    None => entry.missed_heartbeats + 1,
                };
                entry.missed_heartbeats = missed;

                if entry.health_status == HealthStatus::Healthy && missed >= 1 {
                    entry.health_status = HealthStatus::Degraded;
                    tracing::warn!(worker_id = %worker_id, missed, "Worker degraded");
                }

                let newly_zombie = entry.health_status == HealthStatus::Degraded
                    && missed >= self.config.missed_heartbeat_threshold;
                if newly_zombie {
                    entry.health_status = HealthStatus::Zombie;
                    tracing::error!(worker_id = %worker_id, missed, "Worker is a zombie");
                    metrics::counter!("health.zombies_detected").increment(1);
                    emitted.push(ControllerEvent::ZombieDetected {
                        worker_id: worker_id.clone(),
                        missed_heartbeats: missed,
                    });
                }

                if entry.health_status == HealthStatus::Zombie {
                    pending.push(PendingRecovery {
                        worker_id: worker_id.clone(),
                        current_task: entry.current_task.clone(),
                        newly_zombie,
                    });
                }
            }
        }

        for event in emitted {
            self.events.emit(&event);
        }
        for recovery in pending {
            self.recover_zombie(recovery, now).await;
        }
    }

    async fn recover_zombie(&self, recovery: PendingRecovery, now: DateTime<Utc>) {
        let worker_id = recovery.worker_id;

        // Reassign the in-flight task only on the detection edge, not on
        // every subsequent tick the worker stays a zombie.
        if recovery.newly_zombie {
            if let Some(task) = recovery.current_task {
                if let Err(e) = self
                    .sink
                    .dispatch(RecoveryAction::ReassignTask {
                        issue_id: task.clone(),
                        from_worker: worker_id.clone(),
                    })
                    .await
                {
                    tracing::error!(worker_id = %worker_id, issue_id = %task, error = %e, "Task reassignment failed");
                }
                let mut state = self.state.lock().unwrap();
                if let Some(entry) = state.get_mut(&worker_id) {
                    entry.current_task = None;
                }
            }
        }

        // Restart, gated by the attempt budget and the cooldown.
        let attempt = {
            let mut state = self.state.lock().unwrap();
            let Some(entry) = state.get_mut(&worker_id) else {
                return;
            };

            if entry.restart_count >= self.config.max_restarts {
                drop(state);
                let newly_terminal = self.terminal.lock().unwrap().insert(worker_id.clone());
                if newly_terminal {
                    tracing::error!(
                        worker_id = %worker_id,
                        max_restarts = self.config.max_restarts,
                        "Max restarts exceeded, worker is a terminal zombie"
                    );
                    self.events.emit(&ControllerEvent::WorkerRestartFailed {
                        worker_id: worker_id.clone(),
                        restart_count: self.config.max_restarts,
                    });
                }
                return;
            }

            if let Some(last) = entry.last_restart_at {
                let since_ms = (now - last).num_milliseconds().max(0) as u64;
                if since_ms < self.config.restart_cooldown_ms {
                    return;
                }
            }

            entry.health_status = HealthStatus::Restarting;
            entry.restart_count += 1;
            entry.last_restart_at = Some(now);
            entry.restart_count
        };

        tracing::info!(worker_id = %worker_id, attempt, "Attempting worker restart");
        let result = self
            .sink
            .dispatch(RecoveryAction::RestartWorker {
                worker_id: worker_id.clone(),
            })
            .await;

        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.get_mut(&worker_id) else {
            return;
        };
        match result {
            Ok(_) => {
                entry.health_status = HealthStatus::Healthy;
                entry.missed_heartbeats = 0;
                entry.last_heartbeat = None;
                metrics::counter!("health.restarts").increment(1);
            }
            Err(e) => {
                tracing::error!(worker_id = %worker_id, error = %e, "Worker restart failed");
                entry.health_status = HealthStatus::Zombie;
            }
        }
    }

    /// Periodic tick loop with watch-channel shutdown.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let interval = Duration::from_millis(self.config.health_check_interval_ms);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        self.tick().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            tracing::info!("Health monitor shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}
