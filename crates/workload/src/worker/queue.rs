//! One launch queue: a poller feeding a bounded pool of pipeline invocations

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, instrument, warn};

use crate::metrics::MetricClient;
use crate::persistence::WorkloadQueueStore;
use crate::pipeline::{LaunchPipeline, PipelineError, PipelineOutcome};
use crate::substrate::launch_queue_name;
use crate::worker::poller::{PollerConfig, PollerError, QueuePoller};
use crate::workload::{Workload, WorkloadPriority};

/// Configuration for one (dataplane group, priority) queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaunchQueueConfig {
    pub dataplane_group: String,

    pub priority: WorkloadPriority,

    /// Maximum concurrent pipeline invocations
    pub parallelism: usize,

    pub poller: PollerConfig,

    /// How long shutdown waits for in-flight invocations
    #[serde(with = "crate::duration_millis")]
    pub shutdown_timeout: Duration,
}

impl LaunchQueueConfig {
    pub fn new(dataplane_group: impl Into<String>, priority: WorkloadPriority) -> Self {
        Self {
            dataplane_group: dataplane_group.into(),
            priority,
            parallelism: 10,
            poller: PollerConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchQueueError {
    #[error("launch queue {0} is already running")]
    AlreadyRunning(String),

    #[error("poller error: {0}")]
    Poller(#[from] PollerError),

    #[error("launch queue {queue} still had {remaining} invocations in flight at shutdown")]
    ShutdownTimeout { queue: String, remaining: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchQueueStatus {
    Stopped,
    Running,
    Draining,
}

/// Outcome counts since the queue was created
#[derive(Debug, Default)]
pub struct LaunchQueueStats {
    launched: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    requeued: AtomicU64,
    abandoned: AtomicU64,
}

impl LaunchQueueStats {
    fn record(&self, outcome: PipelineOutcome) {
        let counter = match outcome {
            PipelineOutcome::Launched => &self.launched,
            PipelineOutcome::Skipped => &self.skipped,
            PipelineOutcome::Failed(_) => &self.failed,
            PipelineOutcome::Requeued(_) => &self.requeued,
            PipelineOutcome::Abandoned => &self.abandoned,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn launched(&self) -> u64 {
        self.launched.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn requeued(&self) -> u64 {
        self.requeued.load(Ordering::Relaxed)
    }

    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    /// Invocations that have finished, whatever their outcome
    pub fn completed(&self) -> u64 {
        self.launched() + self.skipped() + self.failed() + self.requeued() + self.abandoned()
    }
}

/// Poller plus semaphore-limited pipeline fan-out for one queue
///
/// Each delivered workload runs in its own task. A panic inside the pipeline
/// is caught at the task boundary and handed to the failure handler as an
/// unclassified error, so it is never written to the workload record.
pub struct LaunchQueue {
    name: String,
    config: LaunchQueueConfig,
    poller: QueuePoller,
    pipeline: Arc<LaunchPipeline>,
    active: Arc<Semaphore>,
    stats: Arc<LaunchQueueStats>,
    status: RwLock<LaunchQueueStatus>,
    shutdown_tx: watch::Sender<bool>,
    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
}

impl LaunchQueue {
    pub fn new(
        config: LaunchQueueConfig,
        store: Arc<dyn WorkloadQueueStore>,
        metrics: Arc<dyn MetricClient>,
        pipeline: Arc<LaunchPipeline>,
    ) -> Self {
        let poller =
            QueuePoller::new(store, metrics, config.poller.clone()).with_priority(config.priority);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            name: launch_queue_name(&config.dataplane_group, config.priority),
            active: Arc::new(Semaphore::new(config.parallelism)),
            config,
            poller,
            pipeline,
            stats: Arc::new(LaunchQueueStats::default()),
            status: RwLock::new(LaunchQueueStatus::Stopped),
            shutdown_tx,
            dispatch_handle: Mutex::new(None),
        }
    }

    /// Substrate queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &LaunchQueueConfig {
        &self.config
    }

    pub fn dataplane_group(&self) -> &str {
        &self.config.dataplane_group
    }

    pub fn priority(&self) -> WorkloadPriority {
        self.config.priority
    }

    pub fn status(&self) -> LaunchQueueStatus {
        *self.status.read()
    }

    pub fn stats(&self) -> &LaunchQueueStats {
        &self.stats
    }

    /// Pipeline invocations currently running
    pub fn in_flight(&self) -> usize {
        self.config.parallelism - self.active.available_permits()
    }

    /// Start polling and dispatching
    #[instrument(skip(self), fields(queue = %self.name))]
    pub fn start(&self) -> Result<(), LaunchQueueError> {
        {
            let mut status = self.status.write();
            if *status != LaunchQueueStatus::Stopped {
                return Err(LaunchQueueError::AlreadyRunning(self.name.clone()));
            }
            *status = LaunchQueueStatus::Running;
        }

        let stream = match self.poller.initialize(&self.config.dataplane_group) {
            Ok(stream) => stream,
            Err(e) => {
                *self.status.write() = LaunchQueueStatus::Stopped;
                return Err(e.into());
            }
        };
        self.shutdown_tx.send_replace(false);

        let handle = tokio::spawn(dispatch_loop(
            self.name.clone(),
            stream,
            Arc::clone(&self.pipeline),
            Arc::clone(&self.active),
            Arc::clone(&self.stats),
            self.shutdown_tx.subscribe(),
        ));
        *self.dispatch_handle.lock() = Some(handle);

        info!(
            queue = %self.name,
            parallelism = self.config.parallelism,
            "Launch queue started"
        );
        Ok(())
    }

    pub fn suspend(&self) {
        self.poller.suspend_polling();
    }

    pub fn resume(&self) {
        self.poller.resume_polling();
    }

    pub fn is_suspended(&self) -> bool {
        self.poller.is_suspended()
    }

    /// Stop polling, then wait for in-flight invocations to finish
    ///
    /// Workloads fetched but not yet dispatched stay leased and are
    /// redelivered once their lease lapses.
    #[instrument(skip(self), fields(queue = %self.name))]
    pub async fn shutdown(&self) -> Result<(), LaunchQueueError> {
        {
            let mut status = self.status.write();
            if *status == LaunchQueueStatus::Stopped {
                return Ok(());
            }
            *status = LaunchQueueStatus::Draining;
        }

        info!(queue = %self.name, "Draining launch queue");
        self.shutdown_tx.send_replace(true);
        self.poller.shutdown().await;

        let handle = self.dispatch_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(queue = %self.name, "Dispatch loop ended abnormally: {}", e);
            }
        }

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        loop {
            let remaining = self.in_flight();
            if remaining == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(queue = %self.name, remaining, "Shutdown timeout reached");
                *self.status.write() = LaunchQueueStatus::Stopped;
                return Err(LaunchQueueError::ShutdownTimeout {
                    queue: self.name.clone(),
                    remaining,
                });
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        *self.status.write() = LaunchQueueStatus::Stopped;
        info!(queue = %self.name, "Launch queue stopped");
        Ok(())
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    // A dropped sender counts as a shutdown request
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn dispatch_loop(
    queue: String,
    mut workloads: ReceiverStream<Workload>,
    pipeline: Arc<LaunchPipeline>,
    active: Arc<Semaphore>,
    stats: Arc<LaunchQueueStats>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let workload = tokio::select! {
            _ = shutdown_requested(&mut shutdown_rx) => break,
            next = workloads.next() => match next {
                Some(workload) => workload,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = shutdown_requested(&mut shutdown_rx) => {
                debug!(
                    %queue,
                    workload_id = %workload.id,
                    "Shutdown before dispatch, leaving lease to lapse"
                );
                break;
            }
            permit = Arc::clone(&active).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let pipeline = Arc::clone(&pipeline);
        let stats = Arc::clone(&stats);
        let queue = queue.clone();

        tokio::spawn(async move {
            let workload_id = workload.id.clone();
            let run = tokio::spawn({
                let pipeline = Arc::clone(&pipeline);
                async move { pipeline.run(workload).await }
            });

            let outcome = match run.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(%queue, %workload_id, "Pipeline task failed: {}", e);
                    let error = PipelineError::from(anyhow::anyhow!(
                        "pipeline task for workload {workload_id} failed: {e}"
                    ));
                    pipeline.failure_handler().accept(&error).await;
                    PipelineOutcome::Abandoned
                }
            };

            debug!(%queue, %workload_id, ?outcome, "Pipeline invocation finished");
            stats.record(outcome);
            drop(permit);
        });
    }

    debug!(%queue, "Dispatch loop exited");
}
