use std::fmt::Write as _;

use foreman_common::types::{
    ActivityEntry, Bottleneck, PoolStatus, ProgressMetrics, WorkerHealth,
};

/// Render the Markdown progress report.
///
/// Section order is part of the report contract: Summary, Workers,
/// Worker Health (when available), Bottlenecks, Recent Activity.
pub fn render_markdown(
    metrics: &ProgressMetrics,
    pool: &PoolStatus,
    health: Option<&[WorkerHealth]>,
    bottlenecks: &[Bottleneck],
    recent: &[ActivityEntry],
) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Progress Report\n");

    let _ = writeln!(out, "## Summary\n");
    let _ = writeln!(out, "- Completed: {}", metrics.completed);
    let _ = writeln!(out, "- Failed: {}", metrics.failed);
    let _ = writeln!(out, "- In progress: {}", metrics.in_progress);
    let _ = writeln!(out, "- Pending: {}", metrics.pending);
    let _ = writeln!(out, "- Blocked: {}", metrics.blocked);
    let _ = writeln!(out, "- Progress: {:.1}%", metrics.percentage);
    if metrics.average_completion_ms > 0.0 {
        let _ = writeln!(
            out,
            "- Average completion: {:.0} ms",
            metrics.average_completion_ms
        );
    }
    if let Some(eta) = metrics.eta {
        let _ = writeln!(out, "- ETA: {}", eta.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Workers\n");
    let _ = writeln!(out, "| Worker | Status | Current Issue | Completed |");
    let _ = writeln!(out, "|---|---|---|---|");
    for worker in &pool.workers {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            worker.id,
            worker.status.as_str(),
            worker
                .current_issue
                .as_ref()
                .map(|i| i.to_string())
                .unwrap_or_else(|| "-".into()),
            worker.completed_tasks,
        );
    }
    let _ = writeln!(out);

    if let Some(health) = health {
        let _ = writeln!(out, "## Worker Health\n");
        let _ = writeln!(out, "| Worker | Health | Missed | Restarts |");
        let _ = writeln!(out, "|---|---|---|---|");
        for entry in health {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} |",
                entry.worker_id,
                entry.state.health_status.as_str(),
                entry.state.missed_heartbeats,
                entry.state.restart_count,
            );
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "## Bottlenecks\n");
    if bottlenecks.is_empty() {
        let _ = writeln!(out, "None detected.");
    } else {
        for b in bottlenecks {
            let _ = writeln!(
                out,
                "- **{}** (severity {}): {}",
                b.kind.as_str(),
                b.severity,
                b.description
            );
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Recent Activity\n");
    if recent.is_empty() {
        let _ = writeln!(out, "No activity recorded.");
    } else {
        for entry in recent {
            let _ = writeln!(
                out,
                "- {} — {} {}{}",
                entry.timestamp.format("%H:%M:%S"),
                entry.kind.as_str(),
                entry.issue_id,
                entry
                    .worker_id
                    .as_ref()
                    .map(|w| format!(" ({})", w))
                    .unwrap_or_default(),
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use foreman_common::ids::{IssueId, WorkerId};
    use foreman_common::types::{ActivityKind, Worker};

    #[test]
    fn test_sections_appear_in_order() {
        let metrics = ProgressMetrics {
            completed: 2,
            pending: 1,
            percentage: 50.0,
            ..ProgressMetrics::default()
        };
        let pool = PoolStatus {
            total_workers: 1,
            idle_workers: 1,
            workers: vec![Worker::idle(WorkerId::numbered(1))],
            ..PoolStatus::default()
        };
        let recent = vec![ActivityEntry {
            timestamp: Utc::now(),
            kind: ActivityKind::Completed,
            issue_id: IssueId::from("A"),
            worker_id: Some(WorkerId::numbered(1)),
            details: None,
        }];

        let report = render_markdown(&metrics, &pool, None, &[], &recent);

        let summary = report.find("## Summary").unwrap();
        let workers = report.find("## Workers").unwrap();
        let bottlenecks = report.find("## Bottlenecks").unwrap();
        let activity = report.find("## Recent Activity").unwrap();
        assert!(summary < workers && workers < bottlenecks && bottlenecks < activity);
        assert!(!report.contains("## Worker Health"));
        assert!(report.contains("| worker-1 | idle | - | 0 |"));
    }

    #[test]
    fn test_health_section_when_available() {
        let report = render_markdown(
            &ProgressMetrics::default(),
            &PoolStatus::default(),
            Some(&[]),
            &[],
            &[],
        );
        let workers = report.find("## Workers").unwrap();
        let health = report.find("## Worker Health").unwrap();
        let bottlenecks = report.find("## Bottlenecks").unwrap();
        assert!(workers < health && health < bottlenecks);
    }
}
