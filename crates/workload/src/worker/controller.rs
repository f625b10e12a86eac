//! Worker pool controller
//!
//! Two fixed-schedule loops that sit above the launch queues:
//!
//! - the consumer check turns every queue of a dataplane group on or off
//!   according to [`Flag::QueueConsumerEnabled`]
//! - the status report publishes, per queue, whether polling is suspended,
//!   plus the enqueued depth per group and priority
//!
//! Concurrency limits are static per queue; only on/off is dynamic.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::flags::{FeatureFlagClient, Flag, FlagContext};
use crate::metrics::{attrs, names, MetricClient};
use crate::persistence::WorkloadQueueStore;
use crate::substrate::ExecutionSubstrate;
use crate::worker::queue::LaunchQueue;

/// Controller schedule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerConfig {
    /// Interval between consumer-enabled checks
    #[serde(with = "crate::duration_millis")]
    pub check_interval: Duration,

    /// Interval between status reports
    #[serde(with = "crate::duration_millis")]
    pub report_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            report_interval: Duration::from_secs(60),
        }
    }
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }
}

pub struct WorkerPoolController {
    config: ControllerConfig,
    queues: Vec<Arc<LaunchQueue>>,
    flags: Arc<dyn FeatureFlagClient>,
    substrate: Arc<dyn ExecutionSubstrate>,
    metrics: Arc<dyn MetricClient>,
    store: Arc<dyn WorkloadQueueStore>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPoolController {
    pub fn new(
        config: ControllerConfig,
        queues: Vec<Arc<LaunchQueue>>,
        flags: Arc<dyn FeatureFlagClient>,
        substrate: Arc<dyn ExecutionSubstrate>,
        metrics: Arc<dyn MetricClient>,
        store: Arc<dyn WorkloadQueueStore>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            queues,
            flags,
            substrate,
            metrics,
            store,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn queues(&self) -> &[Arc<LaunchQueue>] {
        &self.queues
    }

    /// Queues grouped by dataplane group
    fn queues_by_group(&self) -> BTreeMap<&str, Vec<&Arc<LaunchQueue>>> {
        let mut groups: BTreeMap<&str, Vec<&Arc<LaunchQueue>>> = BTreeMap::new();
        for queue in &self.queues {
            groups.entry(queue.dataplane_group()).or_default().push(queue);
        }
        groups
    }

    /// Apply the consumer-enabled flag to every queue
    ///
    /// The substrate is compared against the flag on every call, so a
    /// suspend or resume that failed is sent again on the next check.
    pub async fn check_enabled(&self) {
        for (group, queues) in self.queues_by_group() {
            let enabled = self
                .flags
                .is_enabled(Flag::QueueConsumerEnabled, &FlagContext::group(group))
                .await;

            for queue in queues {
                if enabled && queue.is_suspended() {
                    queue.resume();
                    info!(queue = %queue.name(), %group, "Queue consumer enabled");
                } else if !enabled && !queue.is_suspended() {
                    queue.suspend();
                    info!(queue = %queue.name(), %group, "Queue consumer disabled");
                }
                self.sync_substrate(queue.name(), !enabled).await;
            }
        }
    }

    async fn sync_substrate(&self, queue_name: &str, suspend: bool) {
        match self.substrate.is_suspended(queue_name).await {
            Ok(current) if current == suspend => return,
            Ok(_) => {}
            Err(e) => debug!(queue = %queue_name, "Substrate polling state unknown: {}", e),
        }

        let result = if suspend {
            self.substrate.suspend_polling(queue_name).await
        } else {
            self.substrate.resume_polling(queue_name).await
        };
        match result {
            Ok(()) => debug!(queue = %queue_name, suspend, "Substrate polling updated"),
            Err(e) => warn!(
                queue = %queue_name,
                suspend,
                "Failed to update substrate polling, retrying next check: {}",
                e
            ),
        }
    }

    /// Publish polling state per queue and depth per group and priority
    pub async fn report_status(&self) {
        for queue in &self.queues {
            let suspended = queue.is_suspended();
            let priority = queue.priority().to_string();
            self.metrics.gauge(
                names::QUEUE_POLLING_SUSPENDED,
                u64::from(suspended),
                &[
                    (attrs::QUEUE, queue.name()),
                    (attrs::DATAPLANE_GROUP, queue.dataplane_group()),
                    (attrs::PRIORITY, priority.as_str()),
                ],
            );
            debug!(queue = %queue.name(), suspended, in_flight = queue.in_flight(), "Queue status");
        }

        match self.store.queue_stats().await {
            Ok(stats) => {
                for entry in stats {
                    let priority = entry.priority.to_string();
                    self.metrics.gauge(
                        names::QUEUE_DEPTH,
                        entry.enqueued_count,
                        &[
                            (attrs::DATAPLANE_GROUP, entry.dataplane_group.as_str()),
                            (attrs::PRIORITY, priority.as_str()),
                        ],
                    );
                }
            }
            Err(e) => warn!("Failed to read queue stats: {}", e),
        }
    }

    /// Start both loops; the first tick of each runs immediately
    pub fn start(self: &Arc<Self>) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }
        self.shutdown_tx.send_replace(false);

        let controller = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(controller.config.check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => controller.check_enabled().await,
                }
            }
            debug!("Consumer check loop exited");
        }));

        let controller = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(controller.config.report_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => controller.report_status().await,
                }
            }
            debug!("Status report loop exited");
        }));

        info!(
            queues = self.queues.len(),
            check_interval = ?self.config.check_interval,
            report_interval = ?self.config.report_interval,
            "Worker pool controller started"
        );
    }

    /// Stop both loops; the queues themselves are left running
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Controller loop ended abnormally: {}", e);
            }
        }
    }
}
