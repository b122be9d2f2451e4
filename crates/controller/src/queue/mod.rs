use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use foreman_common::config::{QueueConfig, RejectionPolicy};
use foreman_common::ids::IssueId;
use foreman_common::types::{DeadLetterEntry, QueueSnapshot, QueueStatus, WorkQueueEntry};

use crate::events::{ControllerEvent, EventBus};

/// Fixed per-entry bookkeeping overhead added to the id length when
/// estimating queue memory.
const ENTRY_OVERHEAD_BYTES: usize = 64;

/// Outcome of an enqueue attempt.
#[derive(Clone, Debug, Serialize)]
pub struct EnqueueResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub backpressure_applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

impl EnqueueResult {
    fn admitted(backpressure_applied: bool, delay_ms: Option<u64>) -> Self {
        Self {
            success: true,
            reason: None,
            backpressure_applied,
            delay_ms,
        }
    }

    fn rejected(reason: &str, backpressure_applied: bool, delay_ms: Option<u64>) -> Self {
        Self {
            success: false,
            reason: Some(reason.to_string()),
            backpressure_applied,
            delay_ms,
        }
    }
}

struct QueueState {
    entries: Vec<WorkQueueEntry>,
    dead_letter: VecDeque<DeadLetterEntry>,
    estimated_memory: usize,
    backpressure_active: bool,
    soft_limit_active: bool,
}

/// Priority-ordered bounded queue with backpressure and a dead-letter list.
///
/// The queue owns its entries exclusively. All limit checks use the
/// pre-admission fill ratio, so the entry that crosses a threshold is the
/// one that observes it.
pub struct BoundedWorkQueue {
    config: QueueConfig,
    events: Arc<EventBus>,
    state: Mutex<QueueState>,
}

impl BoundedWorkQueue {
    pub fn new(config: QueueConfig, events: Arc<EventBus>) -> Self {
        Self {
            config,
            events,
            state: Mutex::new(QueueState {
                entries: Vec::new(),
                dead_letter: VecDeque::new(),
                estimated_memory: 0,
                backpressure_active: false,
                soft_limit_active: false,
            }),
        }
    }

    /// Admit an issue at the given priority score.
    ///
    /// May suspend for up to `max_backpressure_delay_ms` when the queue is
    /// above the backpressure threshold. Enqueueing an id that is already
    /// present succeeds without duplication.
    pub async fn enqueue(&self, issue_id: IssueId, priority_score: i64) -> EnqueueResult {
        let entry = WorkQueueEntry {
            issue_id,
            priority_score,
            queued_at: Utc::now(),
            attempts: 0,
        };
        self.enqueue_entry(entry).await
    }

    /// Like `enqueue`, preserving the entry's attempt count (re-queues).
    pub async fn enqueue_entry(&self, entry: WorkQueueEntry) -> EnqueueResult {
        let mut emitted = Vec::new();
        let delay = {
            let mut state = self.state.lock().unwrap();

            if state.entries.iter().any(|e| e.issue_id == entry.issue_id) {
                return EnqueueResult::admitted(false, None);
            }

            let ratio = state.entries.len() as f64 / self.config.max_size as f64;

            if ratio >= self.config.soft_limit_ratio && !state.soft_limit_active {
                state.soft_limit_active = true;
                emitted.push(ControllerEvent::SoftLimitWarning {
                    size: state.entries.len(),
                    max_size: self.config.max_size,
                });
            }

            if ratio >= self.config.backpressure_threshold {
                if !state.backpressure_active {
                    state.backpressure_active = true;
                    emitted.push(ControllerEvent::BackpressureActivated { ratio });
                }
                Some(self.backpressure_delay(ratio))
            } else {
                None
            }
        };

        for event in emitted.drain(..) {
            self.events.emit(&event);
        }

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let delay_ms = delay.map(|d| d.as_millis() as u64);
        let backpressure_applied = delay.is_some();

        let result = {
            let mut state = self.state.lock().unwrap();

            // Re-check after the suspension: another producer may have
            // admitted this id in the meantime.
            if state.entries.iter().any(|e| e.issue_id == entry.issue_id) {
                return EnqueueResult::admitted(backpressure_applied, delay_ms);
            }

            let entry_bytes = estimate_bytes(&entry);
            let over_memory =
                state.estimated_memory + entry_bytes > self.config.max_memory_bytes;
            let full = state.entries.len() >= self.config.max_size;

            if full || over_memory {
                match self.config.rejection_policy {
                    RejectionPolicy::Reject => {
                        let reason = if full { "queue_full" } else { "memory_limit" };
                        EnqueueResult::rejected(reason, backpressure_applied, delay_ms)
                    }
                    RejectionPolicy::DropOldest => {
                        if let Some(pos) = oldest_position(&state.entries) {
                            let dropped = state.entries.remove(pos);
                            state.estimated_memory = state
                                .estimated_memory
                                .saturating_sub(estimate_bytes(&dropped));
                            push_dead_letter(
                                &mut state,
                                &self.config,
                                dropped,
                                "dropped_for_newer",
                            );
                        }
                        admit(&mut state, entry, entry_bytes);
                        EnqueueResult::admitted(backpressure_applied, delay_ms)
                    }
                    RejectionPolicy::DropLowestPriority => {
                        match lowest_priority_position(&state.entries) {
                            Some(pos)
                                if entry.priority_score
                                    > state.entries[pos].priority_score =>
                            {
                                let dropped = state.entries.remove(pos);
                                state.estimated_memory = state
                                    .estimated_memory
                                    .saturating_sub(estimate_bytes(&dropped));
                                push_dead_letter(
                                    &mut state,
                                    &self.config,
                                    dropped,
                                    "dropped_for_higher_priority",
                                );
                                admit(&mut state, entry, entry_bytes);
                                EnqueueResult::admitted(backpressure_applied, delay_ms)
                            }
                            _ => EnqueueResult::rejected(
                                "lower_priority_than_queue",
                                backpressure_applied,
                                delay_ms,
                            ),
                        }
                    }
                }
            } else {
                admit(&mut state, entry, entry_bytes);
                EnqueueResult::admitted(backpressure_applied, delay_ms)
            }
        };

        metrics::gauge!("queue.depth").set(self.len() as f64);
        result
    }

    /// Remove and return the highest-priority entry (ties: earliest
    /// queued_at). Atomic; there is no separate peek-then-remove form.
    pub fn dequeue(&self) -> Option<IssueId> {
        let (popped, emitted) = {
            let mut state = self.state.lock().unwrap();
            let pos = best_position(&state.entries)?;
            let entry = state.entries.remove(pos);
            state.estimated_memory = state
                .estimated_memory
                .saturating_sub(estimate_bytes(&entry));
            let emitted = self.relax_thresholds(&mut state);
            (entry, emitted)
        };

        for event in emitted {
            self.events.emit(&event);
        }
        metrics::gauge!("queue.depth").set(self.len() as f64);
        Some(popped.issue_id)
    }

    /// Remove a specific issue (used when an assignment bypasses dequeue).
    pub fn remove(&self, issue_id: &IssueId) -> Option<WorkQueueEntry> {
        let (removed, emitted) = {
            let mut state = self.state.lock().unwrap();
            let pos = state.entries.iter().position(|e| &e.issue_id == issue_id)?;
            let entry = state.entries.remove(pos);
            state.estimated_memory = state
                .estimated_memory
                .saturating_sub(estimate_bytes(&entry));
            let emitted = self.relax_thresholds(&mut state);
            (entry, emitted)
        };

        for event in emitted {
            self.events.emit(&event);
        }
        Some(removed)
    }

    /// Move a dead-letter entry back into the main queue if it admits it.
    pub async fn retry_from_dead_letter(&self, issue_id: &IssueId) -> Option<EnqueueResult> {
        let mut entry = {
            let mut state = self.state.lock().unwrap();
            let pos = state
                .dead_letter
                .iter()
                .position(|d| &d.entry.issue_id == issue_id)?;
            state.dead_letter.remove(pos).map(|d| d.entry)?
        };
        entry.attempts += 1;

        let result = self.enqueue_entry(entry.clone()).await;
        if !result.success {
            // Re-park the entry rather than losing it.
            let mut state = self.state.lock().unwrap();
            push_dead_letter(&mut state, &self.config, entry, "retry_rejected");
        }
        Some(result)
    }

    pub fn contains(&self, issue_id: &IssueId) -> bool {
        self.state
            .lock()
            .unwrap()
            .entries
            .iter()
            .any(|e| &e.issue_id == issue_id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dead_letter_len(&self) -> usize {
        self.state.lock().unwrap().dead_letter.len()
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.state.lock().unwrap();
        QueueStatus {
            size: state.entries.len(),
            max_size: self.config.max_size,
            dead_letter_size: state.dead_letter.len(),
            backpressure_active: state.backpressure_active,
        }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock().unwrap();
        QueueSnapshot {
            entries: state.entries.clone(),
            dead_letter: state.dead_letter.iter().cloned().collect(),
        }
    }

    /// Replace the queue contents from a persisted snapshot.
    pub fn restore(&self, snapshot: QueueSnapshot) {
        let mut state = self.state.lock().unwrap();
        state.estimated_memory = snapshot.entries.iter().map(estimate_bytes).sum();
        state.entries = snapshot.entries;
        state.dead_letter = snapshot.dead_letter.into();
    }

    fn backpressure_delay(&self, ratio: f64) -> Duration {
        let exponent = (ratio - self.config.backpressure_threshold) * 10.0;
        let delay_ms = (2f64.powf(exponent) * 100.0) as u64;
        Duration::from_millis(delay_ms.min(self.config.max_backpressure_delay_ms))
    }

    /// Clear edge-triggered flags once the fill ratio drops back below the
    /// thresholds, emitting the deactivation event.
    fn relax_thresholds(&self, state: &mut QueueState) -> Vec<ControllerEvent> {
        let ratio = state.entries.len() as f64 / self.config.max_size as f64;
        let mut emitted = Vec::new();

        if state.backpressure_active && ratio < self.config.backpressure_threshold {
            state.backpressure_active = false;
            emitted.push(ControllerEvent::BackpressureDeactivated { ratio });
        }
        if state.soft_limit_active && ratio < self.config.soft_limit_ratio {
            state.soft_limit_active = false;
        }

        emitted
    }
}

fn estimate_bytes(entry: &WorkQueueEntry) -> usize {
    entry.issue_id.as_str().len() + ENTRY_OVERHEAD_BYTES
}

fn admit(state: &mut QueueState, entry: WorkQueueEntry, entry_bytes: usize) {
    state.estimated_memory += entry_bytes;
    state.entries.push(entry);
}

fn push_dead_letter(
    state: &mut QueueState,
    config: &QueueConfig,
    entry: WorkQueueEntry,
    reason: &str,
) {
    if !config.enable_dead_letter {
        return;
    }
    if state.dead_letter.len() >= config.max_dead_letter_size {
        state.dead_letter.pop_front();
    }
    tracing::debug!(issue_id = %entry.issue_id, reason, "Entry moved to dead letter");
    state.dead_letter.push_back(DeadLetterEntry {
        entry,
        moved_at: Utc::now(),
        reason: reason.to_string(),
    });
    metrics::counter!("queue.dead_letter.moved").increment(1);
}

/// Index of the entry `dequeue` should take: highest score, then earliest
/// queued_at. Ordering across equal-priority independent enqueues is not
/// otherwise stable.
fn best_position(entries: &[WorkQueueEntry]) -> Option<usize> {
    entries
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            a.priority_score
                .cmp(&b.priority_score)
                .then_with(|| b.queued_at.cmp(&a.queued_at))
        })
        .map(|(i, _)| i)
}

fn oldest_position(entries: &[WorkQueueEntry]) -> Option<usize> {
    entries
        .iter()
        .enumerate()
        .min_by_key(|(_, e)| e.queued_at)
        .map(|(i, _)| i)
}

/// Index of the lowest-score entry; among equals, the most recently queued
/// is the one displaced.
fn lowest_priority_position(entries: &[WorkQueueEntry]) -> Option<usize> {
    entries
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            a.priority_score
                .cmp(&b.priority_score)
                .then_with(|| b.queued_at.cmp(&a.queued_at))
        })
        .map(|(i, _)| i)
}
