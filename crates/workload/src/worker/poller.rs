//! Periodic queue polling
//!
//! A [`QueuePoller`] owns one background task per binding. On every tick it
//! claims a batch from the store and pushes the workloads one at a time into
//! a bounded channel whose receiving end is handed out as a stream.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::metrics::{attrs, names, MetricClient};
use crate::persistence::{PollRequest, StoreError, WorkloadQueueStore};
use crate::workload::{Workload, WorkloadPriority};

/// Polling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// Fixed interval between polls
    #[serde(with = "crate::duration_millis")]
    pub poll_interval: Duration,

    /// Maximum workloads claimed per poll
    pub batch_size: usize,

    /// Lease granted to each claimed item
    #[serde(with = "crate::duration_millis")]
    pub redelivery_window: Duration,

    /// Capacity of the hand-off channel to pipeline workers
    pub channel_capacity: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch_size: 10,
            redelivery_window: Duration::from_secs(5 * 60),
            channel_capacity: 20,
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_redelivery_window(mut self, window: Duration) -> Self {
        self.redelivery_window = window;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn validate(&self) -> Result<(), PollerError> {
        if self.poll_interval.is_zero() {
            return Err(PollerError::InvalidConfig(
                "poll_interval must be greater than zero".into(),
            ));
        }
        if self.redelivery_window.is_zero() {
            return Err(PollerError::InvalidConfig(
                "redelivery_window must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Poller errors
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid poller configuration: {0}")]
    InvalidConfig(String),
}

struct Binding {
    group: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Queue poller for one dataplane group and, optionally, one priority
///
/// # Example
///
/// ```ignore
/// use futures::StreamExt;
/// use workload_engine::worker::{PollerConfig, QueuePoller};
///
/// let poller = QueuePoller::new(store, metrics, PollerConfig::default());
/// let mut workloads = poller.initialize("us-east")?;
/// while let Some(workload) = workloads.next().await {
///     // hand off to the launch pipeline
/// }
/// ```
pub struct QueuePoller {
    store: Arc<dyn WorkloadQueueStore>,
    metrics: Arc<dyn MetricClient>,
    config: PollerConfig,
    priority: Option<WorkloadPriority>,
    suspended_tx: watch::Sender<bool>,
    binding: Mutex<Option<Binding>>,
}

impl QueuePoller {
    pub fn new(
        store: Arc<dyn WorkloadQueueStore>,
        metrics: Arc<dyn MetricClient>,
        config: PollerConfig,
    ) -> Self {
        let (suspended_tx, _) = watch::channel(false);
        Self {
            store,
            metrics,
            config,
            priority: None,
            suspended_tx,
            binding: Mutex::new(None),
        }
    }

    /// Restrict polling to one priority
    pub fn with_priority(mut self, priority: WorkloadPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Group of the current binding
    pub fn group(&self) -> Option<String> {
        self.binding.lock().as_ref().map(|b| b.group.clone())
    }

    /// Bind to a dataplane group and start polling
    ///
    /// Re-binding stops the previous polling task; its stream ends once the
    /// items it already fetched have been drained.
    #[instrument(skip(self), fields(priority = ?self.priority))]
    pub fn initialize(&self, group: &str) -> Result<ReceiverStream<Workload>, PollerError> {
        self.config.validate()?;

        let mut binding = self.binding.lock();
        if let Some(previous) = binding.take() {
            debug!(group = %previous.group, "Stopping previous poll loop");
            previous.cancel.cancel();
        }

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.store),
            Arc::clone(&self.metrics),
            self.config.clone(),
            group.to_string(),
            self.priority,
            self.suspended_tx.subscribe(),
            cancel.clone(),
            tx,
        ));

        info!(%group, "Queue poller initialized");
        *binding = Some(Binding {
            group: group.to_string(),
            cancel,
            handle,
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Stop polling at the next tick; already-fetched workloads are still delivered
    pub fn suspend_polling(&self) {
        if !self.suspended_tx.send_replace(true) {
            info!(group = ?self.group(), "Polling suspended");
        }
    }

    pub fn resume_polling(&self) {
        if self.suspended_tx.send_replace(false) {
            info!(group = ?self.group(), "Polling resumed");
        }
    }

    pub fn is_suspended(&self) -> bool {
        *self.suspended_tx.borrow()
    }

    /// Stop the poll loop and wait for it to exit
    pub async fn shutdown(&self) {
        let binding = self.binding.lock().take();
        if let Some(binding) = binding {
            binding.cancel.cancel();
            if let Err(e) = binding.handle.await {
                warn!("Poll loop ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for QueuePoller {
    fn drop(&mut self) {
        if let Some(binding) = self.binding.get_mut().take() {
            binding.cancel.cancel();
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn poll_loop(
    store: Arc<dyn WorkloadQueueStore>,
    metrics: Arc<dyn MetricClient>,
    config: PollerConfig,
    group: String,
    priority: Option<WorkloadPriority>,
    suspended_rx: watch::Receiver<bool>,
    cancel: CancellationToken,
    tx: mpsc::Sender<Workload>,
) {
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let priority_label = priority.map(|p| p.to_string()).unwrap_or_else(|| "any".into());
    let labels = [
        (attrs::DATAPLANE_GROUP, group.as_str()),
        (attrs::PRIORITY, priority_label.as_str()),
    ];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if *suspended_rx.borrow() {
            trace!(%group, "Polling suspended, skipping tick");
            continue;
        }

        let mut request = PollRequest::new(config.batch_size, config.redelivery_window)
            .for_group(group.clone());
        if let Some(priority) = priority {
            request = request.with_priority(priority);
        }

        metrics.count(names::POLL_COUNT, 1, &labels);
        let workloads = match store.poll(request).await {
            Ok(workloads) => workloads,
            Err(e) => {
                warn!(%group, "Queue poll failed, retrying next tick: {}", e);
                metrics.count(names::POLL_ERROR, 1, &labels);
                continue;
            }
        };

        if workloads.is_empty() {
            trace!(%group, "No workloads claimed");
            continue;
        }

        debug!(%group, count = workloads.len(), "Claimed workloads");
        metrics.count(names::POLL_CLAIMED, workloads.len() as u64, &labels);

        for workload in workloads {
            // Leased items are handed over even if cancellation arrives mid-batch
            if tx.send(workload).await.is_err() {
                debug!(%group, "Workload stream dropped, stopping poll loop");
                return;
            }
        }
    }

    debug!(%group, "Poll loop exited");
}
