use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use foreman_common::config::MetricsConfig;
use foreman_common::ids::WorkerId;
use foreman_common::types::{CompletionRecord, PoolStatus, QueueStatus};
use foreman_common::Result;

/// Supported export encodings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Prometheus,
    OpenMetrics,
    Json,
}

/// Aggregate duration statistics over the stored completion records.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CompletionStats {
    pub count: u64,
    pub success_rate: f64,
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Point-in-time bundle of every collected metric.
#[derive(Clone, Debug, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub tasks_started: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub total_workers: usize,
    pub idle_workers: usize,
    pub working_workers: usize,
    pub error_workers: usize,
    /// Active workers over total, 0 when the pool is empty.
    pub utilization: f64,
    pub queue_depth: usize,
    pub queue_ratio: f64,
    pub dead_letter_size: usize,
    pub backpressure_active: bool,
    pub completion: CompletionStats,
    pub recent_records: Vec<CompletionRecord>,
    pub per_worker_completions: BTreeMap<WorkerId, u64>,
}

struct CollectorInner {
    tasks_started: u64,
    tasks_completed: u64,
    tasks_failed: u64,
    /// Cumulative counts per configured bucket bound; the +Inf bucket is
    /// `duration_count`.
    bucket_counts: Vec<u64>,
    duration_sum_ms: u64,
    duration_count: u64,
    records: VecDeque<CompletionRecord>,
    per_worker: BTreeMap<WorkerId, u64>,
    total_workers: usize,
    idle_workers: usize,
    working_workers: usize,
    error_workers: usize,
    queue_depth: usize,
    queue_ratio: f64,
    dead_letter_size: usize,
    backpressure_active: bool,
}

/// Domain metrics: counters, gauges, a task-duration histogram, and the
/// FIFO-capped completion record buffer backing percentile statistics.
pub struct MetricsCollector {
    config: MetricsConfig,
    inner: Mutex<CollectorInner>,
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        let buckets = config.histogram_buckets.len();
        Self {
            config,
            inner: Mutex::new(CollectorInner {
                tasks_started: 0,
                tasks_completed: 0,
                tasks_failed: 0,
                bucket_counts: vec![0; buckets],
                duration_sum_ms: 0,
                duration_count: 0,
                records: VecDeque::new(),
                per_worker: BTreeMap::new(),
                total_workers: 0,
                idle_workers: 0,
                working_workers: 0,
                error_workers: 0,
                queue_depth: 0,
                queue_ratio: 0.0,
                dead_letter_size: 0,
                backpressure_active: false,
            }),
        }
    }

    pub fn record_task_started(&self, worker_id: &WorkerId) {
        if !self.config.enabled {
            return;
        }
        self.inner.lock().unwrap().tasks_started += 1;
        metrics::counter!("pool.tasks.started").increment(1);
        tracing::debug!(worker_id = %worker_id, "Task start recorded");
    }

    pub fn record_completion(&self, record: CompletionRecord) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();

        if record.success {
            inner.tasks_completed += 1;
            metrics::counter!("pool.tasks.completed").increment(1);
        } else {
            inner.tasks_failed += 1;
            metrics::counter!("pool.tasks.failed").increment(1);
        }

        inner.duration_sum_ms += record.duration_ms;
        inner.duration_count += 1;
        for (i, bound) in self.config.histogram_buckets.iter().enumerate() {
            if record.duration_ms <= *bound {
                inner.bucket_counts[i] += 1;
            }
        }

        *inner.per_worker.entry(record.worker_id.clone()).or_insert(0) += 1;

        if inner.records.len() >= self.config.max_completion_records {
            inner.records.pop_front();
        }
        inner.records.push_back(record);
    }

    pub fn update_pool_gauges(&self, status: &PoolStatus) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_workers = status.total_workers;
        inner.idle_workers = status.idle_workers;
        inner.working_workers = status.working_workers;
        inner.error_workers = status.error_workers;

        let utilization = utilization(status.working_workers, status.total_workers);
        metrics::gauge!("pool.utilization").set(utilization);
    }

    pub fn update_queue_gauges(&self, status: &QueueStatus) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue_depth = status.size;
        inner.queue_ratio = if status.max_size == 0 {
            0.0
        } else {
            status.size as f64 / status.max_size as f64
        };
        inner.dead_letter_size = status.dead_letter_size;
        inner.backpressure_active = status.backpressure_active;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock().unwrap();

        let mut durations: Vec<u64> = inner.records.iter().map(|r| r.duration_ms).collect();
        durations.sort_unstable();

        let completion = if durations.is_empty() {
            CompletionStats::default()
        } else {
            let count = inner.records.len() as u64;
            let successes = inner.records.iter().filter(|r| r.success).count() as u64;
            CompletionStats {
                count,
                success_rate: successes as f64 / count as f64,
                avg_ms: durations.iter().sum::<u64>() as f64 / durations.len() as f64,
                min_ms: durations[0],
                max_ms: durations[durations.len() - 1],
                p50_ms: percentile(&durations, 50.0),
                p95_ms: percentile(&durations, 95.0),
                p99_ms: percentile(&durations, 99.0),
            }
        };

        MetricsSnapshot {
            timestamp: Utc::now(),
            tasks_started: inner.tasks_started,
            tasks_completed: inner.tasks_completed,
            tasks_failed: inner.tasks_failed,
            total_workers: inner.total_workers,
            idle_workers: inner.idle_workers,
            working_workers: inner.working_workers,
            error_workers: inner.error_workers,
            utilization: utilization(inner.working_workers, inner.total_workers),
            queue_depth: inner.queue_depth,
            queue_ratio: inner.queue_ratio,
            dead_letter_size: inner.dead_letter_size,
            backpressure_active: inner.backpressure_active,
            completion,
            recent_records: inner.records.iter().cloned().collect(),
            per_worker_completions: inner.per_worker.clone(),
        }
    }

    /// Render the collected metrics in the requested format.
    pub fn export(&self, format: ExportFormat) -> Result<String> {
        match format {
            ExportFormat::Json => {
                let snapshot = self.snapshot();
                Ok(serde_json::to_string_pretty(&snapshot)?)
            }
            ExportFormat::Prometheus | ExportFormat::OpenMetrics => {
                let mut out = self.render_exposition();
                if format == ExportFormat::OpenMetrics {
                    out.push_str("# EOF\n");
                }
                Ok(out)
            }
        }
    }

    fn render_exposition(&self) -> String {
        let inner = self.inner.lock().unwrap();
        let prefix = &self.config.metrics_prefix;
        let mut out = String::new();

        let counter = |out: &mut String, name: &str, help: &str, value: u64| {
            let _ = writeln!(out, "# HELP {}_{} {}", prefix, name, help);
            let _ = writeln!(out, "# TYPE {}_{} counter", prefix, name);
            let _ = writeln!(out, "{}_{} {}", prefix, name, value);
        };
        let gauge = |out: &mut String, name: &str, help: &str, value: f64| {
            let _ = writeln!(out, "# HELP {}_{} {}", prefix, name, help);
            let _ = writeln!(out, "# TYPE {}_{} gauge", prefix, name);
            let _ = writeln!(out, "{}_{} {}", prefix, name, value);
        };

        counter(
            &mut out,
            "tasks_started_total",
            "Tasks started",
            inner.tasks_started,
        );
        counter(
            &mut out,
            "tasks_completed_total",
            "Tasks completed successfully",
            inner.tasks_completed,
        );
        counter(
            &mut out,
            "tasks_failed_total",
            "Tasks failed",
            inner.tasks_failed,
        );

        let _ = writeln!(out, "# HELP {}_workers Worker count per state", prefix);
        let _ = writeln!(out, "# TYPE {}_workers gauge", prefix);
        let _ = writeln!(out, "{}_workers{{state=\"idle\"}} {}", prefix, inner.idle_workers);
        let _ = writeln!(
            out,
            "{}_workers{{state=\"working\"}} {}",
            prefix, inner.working_workers
        );
        let _ = writeln!(
            out,
            "{}_workers{{state=\"error\"}} {}",
            prefix, inner.error_workers
        );

        gauge(
            &mut out,
            "utilization",
            "Active workers over total",
            utilization(inner.working_workers, inner.total_workers),
        );
        gauge(
            &mut out,
            "queue_depth",
            "Entries in the work queue",
            inner.queue_depth as f64,
        );
        gauge(
            &mut out,
            "queue_ratio",
            "Queue fill ratio",
            inner.queue_ratio,
        );
        gauge(
            &mut out,
            "dead_letter_size",
            "Entries in the dead-letter list",
            inner.dead_letter_size as f64,
        );
        gauge(
            &mut out,
            "backpressure_active",
            "Whether backpressure is active (0/1)",
            if inner.backpressure_active { 1.0 } else { 0.0 },
        );

        let _ = writeln!(
            out,
            "# HELP {}_task_duration_ms Task duration distribution",
            prefix
        );
        let _ = writeln!(out, "# TYPE {}_task_duration_ms histogram", prefix);
        for (i, bound) in self.config.histogram_buckets.iter().enumerate() {
            let _ = writeln!(
                out,
                "{}_task_duration_ms_bucket{{le=\"{}\"}} {}",
                prefix, bound, inner.bucket_counts[i]
            );
        }
        let _ = writeln!(
            out,
            "{}_task_duration_ms_bucket{{le=\"+Inf\"}} {}",
            prefix, inner.duration_count
        );
        let _ = writeln!(
            out,
            "{}_task_duration_ms_sum {}",
            prefix, inner.duration_sum_ms
        );
        let _ = writeln!(
            out,
            "{}_task_duration_ms_count {}",
            prefix, inner.duration_count
        );

        let _ = writeln!(
            out,
            "# HELP {}_worker_completions Completions per worker",
            prefix
        );
        let _ = writeln!(out, "# TYPE {}_worker_completions counter", prefix);
        for (worker, count) in &inner.per_worker {
            let _ = writeln!(
                out,
                "{}_worker_completions{{worker=\"{}\"}} {}",
                prefix, worker, count
            );
        }

        out
    }
}

fn utilization(working: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        working as f64 / total as f64
    }
}

/// Linear-interpolated percentile over a sorted slice.
fn percentile(sorted: &[u64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let idx = (p / 100.0) * (sorted.len() - 1) as f64;
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        sorted[lo] as f64
    } else {
        let fraction = idx - lo as f64;
        sorted[lo] as f64 + (sorted[hi] - sorted[lo]) as f64 * fraction
    }
}
