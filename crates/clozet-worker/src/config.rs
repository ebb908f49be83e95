//! Worker configuration.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// How often the worker scans for orphaned stream entries
    pub claim_interval: Duration,
    /// Minimum idle time before an unacked entry can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// How often the job sweeps run
    pub sweep_interval: Duration,
    /// Age after which a `pending` job is dispatched again
    pub pending_requeue_after: Duration,
    /// Age after which a `processing` job is considered abandoned
    pub processing_stale_after: Duration,
    /// Age after which a completed, uncharged job is charged by the sweep
    pub uncharged_grace: Duration,
    /// Jobs handled per sweep and status
    pub sweep_batch_size: usize,
    /// Port of the Prometheus listener, when metrics are enabled
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            shutdown_timeout: Duration::from_secs(30),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_millis(300_000), // 5 minutes
            sweep_interval: Duration::from_secs(60),
            pending_requeue_after: Duration::from_secs(120),
            processing_stale_after: Duration::from_secs(900),
            uncharged_grace: Duration::from_secs(300),
            sweep_batch_size: 50,
            metrics_port: None,
        }
    }
}

fn parsed<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|s| s.parse().ok())
}

fn secs(var: &str, default: Duration) -> Duration {
    parsed(var).map(Duration::from_secs).unwrap_or(default)
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let metrics_enabled = std::env::var("METRICS_ENABLED")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            max_concurrent_jobs: parsed::<usize>("WORKER_MAX_CONCURRENT_JOBS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            shutdown_timeout: secs("WORKER_SHUTDOWN_TIMEOUT_SECS", defaults.shutdown_timeout),
            claim_interval: secs("WORKER_CLAIM_INTERVAL_SECS", defaults.claim_interval),
            claim_min_idle: parsed("WORKER_CLAIM_MIN_IDLE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.claim_min_idle),
            sweep_interval: secs("WORKER_SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            pending_requeue_after: secs(
                "WORKER_PENDING_REQUEUE_SECS",
                defaults.pending_requeue_after,
            ),
            processing_stale_after: secs(
                "WORKER_PROCESSING_STALE_SECS",
                defaults.processing_stale_after,
            ),
            uncharged_grace: secs("WORKER_UNCHARGED_GRACE_SECS", defaults.uncharged_grace),
            sweep_batch_size: parsed("WORKER_SWEEP_BATCH_SIZE").unwrap_or(defaults.sweep_batch_size),
            metrics_port: metrics_enabled
                .then(|| parsed("WORKER_METRICS_PORT").unwrap_or(9091)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 5] = [
        "WORKER_MAX_CONCURRENT_JOBS",
        "WORKER_CLAIM_MIN_IDLE_MS",
        "WORKER_PROCESSING_STALE_SECS",
        "METRICS_ENABLED",
        "WORKER_METRICS_PORT",
    ];

    fn clear() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear();
        let config = WorkerConfig::from_env();
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.claim_min_idle, Duration::from_secs(300));
        assert_eq!(config.pending_requeue_after, Duration::from_secs(120));
        assert_eq!(config.processing_stale_after, Duration::from_secs(900));
        assert_eq!(config.uncharged_grace, Duration::from_secs(300));
        assert!(config.metrics_port.is_none());
    }

    #[test]
    #[serial]
    fn test_overrides_and_bad_values() {
        clear();
        std::env::set_var("WORKER_MAX_CONCURRENT_JOBS", "0");
        std::env::set_var("WORKER_CLAIM_MIN_IDLE_MS", "1500");
        std::env::set_var("WORKER_PROCESSING_STALE_SECS", "soon");
        std::env::set_var("METRICS_ENABLED", "TRUE");

        let config = WorkerConfig::from_env();
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.claim_min_idle, Duration::from_millis(1500));
        assert_eq!(config.processing_stale_after, Duration::from_secs(900));
        assert_eq!(config.metrics_port, Some(9091));
        clear();
    }
}
