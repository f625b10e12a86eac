//! Process wiring: one pipeline, a launch queue per group and priority, and
//! the controller that gates them

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use workload_engine::flags::FeatureFlagClient;
use workload_engine::metrics::MetricClient;
use workload_engine::pipeline::{LaunchPipeline, PipelineConfig, PipelineDeps};
use workload_engine::substrate::ExecutionSubstrate;
use workload_engine::worker::{
    BackpressureState, LaunchQueue, LaunchQueueConfig, WorkerPoolController,
};
use workload_engine::{WorkloadPriority, WorkloadQueueStore};

use crate::config::LauncherConfig;

/// Collaborators the launcher runs against
#[derive(Clone)]
pub struct LauncherDeps {
    pub store: Arc<dyn WorkloadQueueStore>,
    pub substrate: Arc<dyn ExecutionSubstrate>,
    pub flags: Arc<dyn FeatureFlagClient>,
    pub metrics: Arc<dyn MetricClient>,
}

pub struct Launcher {
    substrate: Arc<dyn ExecutionSubstrate>,
    backpressure: Arc<BackpressureState>,
    controller: Arc<WorkerPoolController>,
}

impl Launcher {
    pub fn new(config: &LauncherConfig, deps: LauncherDeps) -> Result<Self> {
        let capacity = config.backpressure_config();
        capacity.validate().context("Invalid executor watermarks")?;
        let backpressure = Arc::new(BackpressureState::new(
            capacity,
            config.executor_max_concurrency,
        ));

        let pipeline = Arc::new(LaunchPipeline::standard(
            PipelineConfig::new(config.dataplane_id.clone())
                .with_build(config.build_config())
                .with_mutex_policy(config.mutex_policy())
                .with_retry_policy(config.retry_policy()),
            PipelineDeps {
                store: deps.store.clone(),
                substrate: deps.substrate.clone(),
                flags: deps.flags.clone(),
                metrics: deps.metrics.clone(),
                backpressure: backpressure.clone(),
            },
        ));

        let mut queues = Vec::new();
        for group in &config.dataplane_groups {
            for priority in WorkloadPriority::ALL {
                let parallelism = match priority {
                    WorkloadPriority::Default => config.default_queue_parallelism,
                    WorkloadPriority::High => config.high_priority_queue_parallelism,
                };
                queues.push(Arc::new(LaunchQueue::new(
                    LaunchQueueConfig::new(group.clone(), priority)
                        .with_parallelism(parallelism)
                        .with_poller(config.poller_config()),
                    deps.store.clone(),
                    deps.metrics.clone(),
                    pipeline.clone(),
                )));
            }
        }

        let controller = Arc::new(WorkerPoolController::new(
            config.controller_config(),
            queues,
            deps.flags,
            deps.substrate.clone(),
            deps.metrics,
            deps.store,
        ));

        Ok(Self {
            substrate: deps.substrate,
            backpressure,
            controller,
        })
    }

    pub fn queues(&self) -> &[Arc<LaunchQueue>] {
        self.controller.queues()
    }

    pub fn backpressure(&self) -> &Arc<BackpressureState> {
        &self.backpressure
    }

    /// Register consumers, apply the current flags and start polling
    ///
    /// Disabled groups are suspended before their first poll.
    pub async fn start(&self) -> Result<()> {
        for queue in self.queues() {
            self.substrate
                .register_queue_consumer(queue.name(), queue.config().parallelism)
                .await
                .with_context(|| format!("Failed to register consumer for {}", queue.name()))?;
        }

        self.controller.check_enabled().await;

        for queue in self.queues() {
            queue
                .start()
                .with_context(|| format!("Failed to start launch queue {}", queue.name()))?;
        }
        self.controller.start();

        info!(queues = self.queues().len(), "Launcher started");
        Ok(())
    }

    /// Stop the controller, then drain every queue
    pub async fn shutdown(&self) {
        self.controller.shutdown().await;
        for queue in self.queues() {
            if let Err(e) = queue.shutdown().await {
                error!(queue = %queue.name(), error = %e, "Launch queue did not drain cleanly");
            }
        }
        info!("Launcher stopped");
    }
}
