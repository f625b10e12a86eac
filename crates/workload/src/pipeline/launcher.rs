//! Launch pipeline runner
//!
//! Runs one workload through the stage chain and routes the outcome to the
//! success or failure handler. Each invocation owns its [`StageIO`]; nothing
//! is carried between invocations.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, Instrument};

use crate::flags::FeatureFlagClient;
use crate::metrics::{attrs, names, MetricClient};
use crate::persistence::WorkloadQueueStore;
use crate::pipeline::handlers::{
    FailureDisposition, FailureHandler, SuccessHandler, DEFAULT_TERMINATION_SOURCE,
};
use crate::pipeline::stage::{PipelineError, Stage, StageError, StageIO, StageName, StageOutcome};
use crate::pipeline::stages::{
    BuildConfig, BuildStage, CheckStatusStage, ClaimStage, LaunchStage, LoadShedStage,
    MutexPolicy, MutexStage,
};
use crate::reliability::{RetryPolicy, RetryTracker};
use crate::substrate::ExecutionSubstrate;
use crate::worker::BackpressureState;
use crate::workload::Workload;

/// How one invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Handed to the substrate and recorded as launched
    Launched,
    /// A stage decided there was nothing to do
    Skipped,
    /// Failure reported against the workload
    Failed(StageName),
    /// Failed at this stage and put back on the queue for another attempt
    Requeued(StageName),
    /// Dropped without touching the workload record
    Abandoned,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Identity written on claimed workloads
    pub dataplane_id: String,

    /// Claim validity before the workload must be launched
    #[serde(with = "crate::duration_millis")]
    pub claim_deadline: Duration,

    /// Deadline set on a launched workload
    #[serde(with = "crate::duration_millis")]
    pub launch_deadline: Duration,

    pub build: BuildConfig,

    pub mutex: MutexPolicy,

    /// Ceilings and backoff for requeueing failed workloads
    pub retry: RetryPolicy,

    pub termination_source: String,
}

impl PipelineConfig {
    pub fn new(dataplane_id: impl Into<String>) -> Self {
        Self {
            dataplane_id: dataplane_id.into(),
            claim_deadline: Duration::from_secs(5 * 60),
            launch_deadline: Duration::from_secs(15 * 60),
            build: BuildConfig::default(),
            mutex: MutexPolicy::default(),
            retry: RetryPolicy::default(),
            termination_source: DEFAULT_TERMINATION_SOURCE.to_string(),
        }
    }

    pub fn with_claim_deadline(mut self, deadline: Duration) -> Self {
        self.claim_deadline = deadline;
        self
    }

    pub fn with_launch_deadline(mut self, deadline: Duration) -> Self {
        self.launch_deadline = deadline;
        self
    }

    pub fn with_build(mut self, build: BuildConfig) -> Self {
        self.build = build;
        self
    }

    pub fn with_mutex_policy(mut self, policy: MutexPolicy) -> Self {
        self.mutex = policy;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_termination_source(mut self, source: impl Into<String>) -> Self {
        self.termination_source = source.into();
        self
    }
}

/// Collaborators shared by every pipeline in the process
#[derive(Clone)]
pub struct PipelineDeps {
    pub store: Arc<dyn WorkloadQueueStore>,
    pub substrate: Arc<dyn ExecutionSubstrate>,
    pub flags: Arc<dyn FeatureFlagClient>,
    pub metrics: Arc<dyn MetricClient>,
    pub backpressure: Arc<BackpressureState>,
}

pub struct LaunchPipeline {
    stages: Vec<Box<dyn Stage>>,
    success: SuccessHandler,
    failure: FailureHandler,
    metrics: Arc<dyn MetricClient>,
}

impl LaunchPipeline {
    /// Pipeline over an arbitrary stage list
    pub fn new(
        stages: Vec<Box<dyn Stage>>,
        success: SuccessHandler,
        failure: FailureHandler,
        metrics: Arc<dyn MetricClient>,
    ) -> Self {
        Self {
            stages,
            success,
            failure,
            metrics,
        }
    }

    /// CLAIM → CHECK_STATUS → BUILD → LOAD_SHED → MUTEX → LAUNCH
    pub fn standard(config: PipelineConfig, deps: PipelineDeps) -> Self {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(ClaimStage::new(
                Arc::clone(&deps.store),
                config.dataplane_id.clone(),
                config.claim_deadline,
            )),
            Box::new(CheckStatusStage::new(Arc::clone(&deps.store))),
            Box::new(BuildStage::new(config.build)),
            Box::new(LoadShedStage::new(
                Arc::clone(&deps.flags),
                Arc::clone(&deps.backpressure),
            )),
            Box::new(MutexStage::new(Arc::clone(&deps.store), config.mutex)),
            Box::new(LaunchStage::new(Arc::clone(&deps.substrate))),
        ];

        let retries = RetryTracker::new(config.retry);
        let success = SuccessHandler::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.metrics),
            retries.clone(),
            config.launch_deadline,
        );
        let failure = FailureHandler::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.metrics),
            retries,
        )
        .with_termination_source(config.termination_source);

        Self::new(stages, success, failure, deps.metrics)
    }

    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn failure_handler(&self) -> &FailureHandler {
        &self.failure
    }

    /// Run one workload through every stage
    #[instrument(
        skip(self, workload),
        fields(workload_id = %workload.id, dataplane_group = %workload.dataplane_group)
    )]
    pub async fn run(&self, workload: Workload) -> PipelineOutcome {
        let mut io = StageIO::new(workload);

        for stage in &self.stages {
            let name = stage.name();
            let span = tracing::debug_span!("stage", stage = %name);

            match stage.apply(&mut io).instrument(span).await {
                Ok(StageOutcome::Continue) => {}
                Ok(StageOutcome::Skip(reason)) => {
                    debug!(stage = %name, "Skipping workload: {}", reason);
                    self.failure.retries().forget(io.workload_id());
                    self.metrics.count(
                        names::LAUNCH_SKIPPED,
                        1,
                        &[
                            (attrs::DATAPLANE_GROUP, io.workload.dataplane_group.as_str()),
                            (attrs::STAGE, name.as_str()),
                        ],
                    );
                    return PipelineOutcome::Skipped;
                }
                Err(source) => {
                    let error = PipelineError::from(StageError::new(name, source, io));
                    return match self.failure.accept(&error).await {
                        FailureDisposition::Requeued { .. } => PipelineOutcome::Requeued(name),
                        FailureDisposition::Failed => PipelineOutcome::Failed(name),
                        FailureDisposition::NotReported => PipelineOutcome::Abandoned,
                    };
                }
            }
        }

        self.success.accept(&io).await;
        PipelineOutcome::Launched
    }
}
