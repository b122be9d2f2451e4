use foreman_common::config::ControllerConfig;

use super::loader::ConfigError;

/// Validate the complete controller configuration.
///
/// Checks sane ranges on numeric parameters and the ordering constraints
/// between related thresholds. All failures are aggregated so operators can
/// fix a config file in one pass.
pub fn validate(config: &ControllerConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_pool(config, &mut errors);
    validate_queue(config, &mut errors);
    validate_lock(config, &mut errors);
    validate_health(config, &mut errors);
    validate_stuck(config, &mut errors);
    validate_progress(config, &mut errors);
    validate_metrics(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors.join("; ")))
    }
}

fn validate_pool(config: &ControllerConfig, errors: &mut Vec<String>) {
    let p = &config.pool;

    if p.max_workers == 0 {
        errors.push("pool.max_workers must be > 0".into());
    }
    if p.worker_timeout_ms == 0 {
        errors.push("pool.worker_timeout_ms must be > 0".into());
    }
    if p.work_orders_path.as_os_str().is_empty() {
        errors.push("pool.work_orders_path must not be empty".into());
    }
}

fn validate_queue(config: &ControllerConfig, errors: &mut Vec<String>) {
    let q = &config.queue;

    if q.max_size == 0 {
        errors.push("queue.max_size must be > 0".into());
    }
    if !(0.0..=1.0).contains(&q.soft_limit_ratio) || q.soft_limit_ratio == 0.0 {
        errors.push("queue.soft_limit_ratio must be in (0, 1]".into());
    }
    if !(0.0..=1.0).contains(&q.backpressure_threshold) || q.backpressure_threshold == 0.0 {
        errors.push("queue.backpressure_threshold must be in (0, 1]".into());
    }
    if q.backpressure_threshold > q.soft_limit_ratio {
        errors.push("queue.backpressure_threshold must be <= soft_limit_ratio".into());
    }
    if q.max_memory_bytes == 0 {
        errors.push("queue.max_memory_bytes must be > 0".into());
    }
    if q.enable_dead_letter && q.max_dead_letter_size == 0 {
        errors.push("queue.max_dead_letter_size must be > 0 when dead letter is enabled".into());
    }
}

fn validate_lock(config: &ControllerConfig, errors: &mut Vec<String>) {
    let l = &config.lock;

    if !l.enabled {
        return;
    }
    if l.lock_retry_attempts == 0 {
        errors.push("lock.lock_retry_attempts must be > 0".into());
    }
    if l.lock_retry_delay_ms == 0 {
        errors.push("lock.lock_retry_delay_ms must be > 0".into());
    }
    if l.lock_steal_threshold_ms == 0 {
        errors.push("lock.lock_steal_threshold_ms must be > 0".into());
    }
    if l.holder_id_prefix.is_empty() {
        errors.push("lock.holder_id_prefix must not be empty".into());
    }
}

fn validate_health(config: &ControllerConfig, errors: &mut Vec<String>) {
    let h = &config.health;

    if h.heartbeat_interval_ms == 0 {
        errors.push("health.heartbeat_interval_ms must be > 0".into());
    }
    if h.health_check_interval_ms == 0 {
        errors.push("health.health_check_interval_ms must be > 0".into());
    }
    if h.missed_heartbeat_threshold == 0 {
        errors.push("health.missed_heartbeat_threshold must be > 0".into());
    }
}

fn validate_stuck(config: &ControllerConfig, errors: &mut Vec<String>) {
    let s = &config.stuck;

    if s.warning_threshold_ms == 0 {
        errors.push("stuck.warning_threshold_ms must be > 0".into());
    }
    if s.warning_threshold_ms >= s.stuck_threshold_ms {
        errors.push("stuck.warning_threshold_ms must be < stuck_threshold_ms".into());
    }
    if s.stuck_threshold_ms >= s.critical_threshold_ms {
        errors.push("stuck.stuck_threshold_ms must be < critical_threshold_ms".into());
    }
    for (task_type, t) in &s.task_type_overrides {
        if t.warning_ms >= t.stuck_ms || t.stuck_ms >= t.critical_ms {
            errors.push(format!(
                "stuck.task_type_overrides.{} thresholds must be strictly increasing",
                task_type
            ));
        }
    }
}

fn validate_progress(config: &ControllerConfig, errors: &mut Vec<String>) {
    let p = &config.progress;

    if p.polling_interval_ms == 0 {
        errors.push("progress.polling_interval_ms must be > 0".into());
    }
    if p.max_recent_activities == 0 {
        errors.push("progress.max_recent_activities must be > 0".into());
    }
    if p.report_path.as_os_str().is_empty() {
        errors.push("progress.report_path must not be empty".into());
    }
}

fn validate_metrics(config: &ControllerConfig, errors: &mut Vec<String>) {
    let m = &config.metrics;

    if !m.enabled {
        return;
    }
    if m.max_completion_records == 0 {
        errors.push("metrics.max_completion_records must be > 0".into());
    }
    if m.histogram_buckets.is_empty() {
        errors.push("metrics.histogram_buckets must not be empty".into());
    }
    if m.histogram_buckets.windows(2).any(|w| w[0] >= w[1]) {
        errors.push("metrics.histogram_buckets must be strictly increasing".into());
    }
    if m.metrics_prefix.is_empty() {
        errors.push("metrics.metrics_prefix must not be empty".into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&ControllerConfig::default()).is_ok());
    }

    #[test]
    fn test_errors_are_aggregated() {
        let mut config = ControllerConfig::default();
        config.pool.max_workers = 0;
        config.queue.max_size = 0;
        config.stuck.warning_threshold_ms = 500_000;

        match validate(&config).unwrap_err() {
            ConfigError::Validation(message) => {
                assert!(message.contains("pool.max_workers"));
                assert!(message.contains("queue.max_size"));
                assert!(message.contains("warning_threshold_ms"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_histogram_buckets_must_increase() {
        let mut config = ControllerConfig::default();
        config.metrics.histogram_buckets = vec![100, 100, 200];
        assert!(validate(&config).is_err());
    }
}
