//! Launcher configuration loaded from the environment

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use workload_engine::pipeline::{BuildConfig, MutexPolicy};
use workload_engine::worker::{BackpressureConfig, ControllerConfig, PollerConfig};
use workload_engine::{BackoffPolicy, RetryPolicy, WorkloadType};

/// Error returned when an environment variable is missing or malformed
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Process-level configuration for the launcher binary
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub database_url: String,
    /// Base URL of the execution substrate API
    pub substrate_url: String,
    pub substrate_timeout: Duration,
    /// Stable across restarts so claims of a restarted process stay its own
    pub dataplane_id: String,
    /// One default and one high-priority queue is started per group
    pub dataplane_groups: Vec<String>,
    pub poll_interval: Duration,
    pub poll_batch_size: usize,
    pub redelivery_window: Duration,
    pub default_queue_parallelism: usize,
    pub high_priority_queue_parallelism: usize,
    pub executor_max_concurrency: usize,
    pub executor_high_watermark: f64,
    pub executor_low_watermark: f64,
    pub mutex_wait_timeout: Duration,
    pub consumer_check_interval: Duration,
    pub consumer_report_interval: Duration,
    pub retry_successive_failure_limit: u32,
    pub retry_total_failure_limit: u32,
    pub retry_backoff_min: Duration,
    pub retry_backoff_max: Duration,
    pub workload_images: HashMap<WorkloadType, String>,
}

impl LauncherConfig {
    /// Load configuration from process environment variables
    ///
    /// Environment variables:
    /// - `DATABASE_URL` (required)
    /// - `SUBSTRATE_URL` (required)
    /// - `SUBSTRATE_TIMEOUT_SECS` (default: 10)
    /// - `DATAPLANE_ID` (default: `HOSTNAME`, then "dataplane-{uuid}")
    /// - `DATAPLANE_GROUPS`: comma-separated (default: "default")
    /// - `POLL_INTERVAL_MS` (default: 1000)
    /// - `POLL_BATCH_SIZE` (default: 10)
    /// - `REDELIVERY_WINDOW_SECS` (default: 300)
    /// - `DEFAULT_QUEUE_PARALLELISM` (default: 10)
    /// - `HIGH_PRIORITY_QUEUE_PARALLELISM` (default: 5)
    /// - `EXECUTOR_MAX_CONCURRENCY` (default: 100)
    /// - `EXECUTOR_HIGH_WATERMARK` (default: 1.0), `EXECUTOR_LOW_WATERMARK` (default: 0.8)
    /// - `MUTEX_WAIT_TIMEOUT_SECS` (default: 30)
    /// - `CONSUMER_CHECK_INTERVAL_SECS` (default: 10)
    /// - `CONSUMER_REPORT_INTERVAL_SECS` (default: 60)
    /// - `RETRY_SUCCESSIVE_FAILURE_LIMIT` (default: 5)
    /// - `RETRY_TOTAL_FAILURE_LIMIT` (default: 10)
    /// - `RETRY_BACKOFF_MIN_SECS` (default: 10), `RETRY_BACKOFF_MAX_SECS` (default: 1800)
    /// - `WORKLOAD_IMAGES`: `type=image` pairs, e.g. `sync=registry/sync:1,check=registry/check:1`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let groups = vars.list("DATAPLANE_GROUPS");
        let dataplane_groups = if groups.is_empty() {
            vec!["default".to_string()]
        } else {
            groups
        };

        Ok(Self {
            database_url: vars
                .get("DATABASE_URL")
                .ok_or(ConfigError::Missing("DATABASE_URL"))?,
            substrate_url: vars
                .get("SUBSTRATE_URL")
                .ok_or(ConfigError::Missing("SUBSTRATE_URL"))?,
            substrate_timeout: Duration::from_secs(vars.parse("SUBSTRATE_TIMEOUT_SECS", 10)?),
            dataplane_id: vars
                .get("DATAPLANE_ID")
                .or_else(|| vars.get("HOSTNAME"))
                .unwrap_or_else(|| format!("dataplane-{}", uuid::Uuid::now_v7())),
            dataplane_groups,
            poll_interval: Duration::from_millis(vars.parse("POLL_INTERVAL_MS", 1000)?),
            poll_batch_size: vars.parse("POLL_BATCH_SIZE", 10)?,
            redelivery_window: Duration::from_secs(vars.parse("REDELIVERY_WINDOW_SECS", 300)?),
            default_queue_parallelism: vars.parse("DEFAULT_QUEUE_PARALLELISM", 10)?,
            high_priority_queue_parallelism: vars.parse("HIGH_PRIORITY_QUEUE_PARALLELISM", 5)?,
            executor_max_concurrency: vars.parse("EXECUTOR_MAX_CONCURRENCY", 100)?,
            executor_high_watermark: vars.parse("EXECUTOR_HIGH_WATERMARK", 1.0)?,
            executor_low_watermark: vars.parse("EXECUTOR_LOW_WATERMARK", 0.8)?,
            mutex_wait_timeout: Duration::from_secs(vars.parse("MUTEX_WAIT_TIMEOUT_SECS", 30)?),
            consumer_check_interval: Duration::from_secs(
                vars.parse("CONSUMER_CHECK_INTERVAL_SECS", 10)?,
            ),
            consumer_report_interval: Duration::from_secs(
                vars.parse("CONSUMER_REPORT_INTERVAL_SECS", 60)?,
            ),
            retry_successive_failure_limit: vars.parse("RETRY_SUCCESSIVE_FAILURE_LIMIT", 5)?,
            retry_total_failure_limit: vars.parse("RETRY_TOTAL_FAILURE_LIMIT", 10)?,
            retry_backoff_min: Duration::from_secs(vars.parse("RETRY_BACKOFF_MIN_SECS", 10)?),
            retry_backoff_max: Duration::from_secs(vars.parse("RETRY_BACKOFF_MAX_SECS", 1800)?),
            workload_images: vars.images("WORKLOAD_IMAGES")?,
        })
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig::new()
            .with_poll_interval(self.poll_interval)
            .with_batch_size(self.poll_batch_size)
            .with_redelivery_window(self.redelivery_window)
    }

    pub fn build_config(&self) -> BuildConfig {
        self.workload_images
            .iter()
            .fold(BuildConfig::new(), |config, (workload_type, image)| {
                config.with_image(*workload_type, image.clone())
            })
    }

    pub fn backpressure_config(&self) -> BackpressureConfig {
        BackpressureConfig::new()
            .with_high_watermark(self.executor_high_watermark)
            .with_low_watermark(self.executor_low_watermark)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_successive_complete_failure_limit(self.retry_successive_failure_limit)
            .with_total_complete_failure_limit(self.retry_total_failure_limit)
            .with_complete_failure_backoff(
                BackoffPolicy::new(self.retry_backoff_min, self.retry_backoff_max).with_base(3),
            )
    }

    pub fn mutex_policy(&self) -> MutexPolicy {
        MutexPolicy::wait(self.mutex_wait_timeout)
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig::new()
            .with_check_interval(self.consumer_check_interval)
            .with_report_interval(self.consumer_report_interval)
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn images(&self, key: &'static str) -> Result<HashMap<WorkloadType, String>, ConfigError> {
        let mut images = HashMap::new();
        for pair in self.list(key) {
            let invalid = |reason: String| ConfigError::Invalid {
                key,
                value: pair.clone(),
                reason,
            };
            let (workload_type, image) = pair
                .split_once('=')
                .ok_or_else(|| invalid("expected type=image".to_string()))?;
            let workload_type = workload_type.trim().parse::<WorkloadType>().map_err(invalid)?;
            images.insert(workload_type, image.trim().to_string());
        }
        Ok(images)
    }
}
