//! Success and failure outcome handlers
//!
//! Both handlers are best-effort: store or metric failures are logged and
//! swallowed so the caller's view of the outcome never changes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::metrics::{attrs, names, MetricClient};
use crate::persistence::WorkloadQueueStore;
use crate::pipeline::stage::{PipelineError, StageError, StageIO};
use crate::reliability::{RetryDecision, RetryTracker};

/// Default `termination_source` written on reported failures
pub const DEFAULT_TERMINATION_SOURCE: &str = "workload-launcher";

// ============================================================================
// SuccessHandler
// ============================================================================

pub struct SuccessHandler {
    store: Arc<dyn WorkloadQueueStore>,
    metrics: Arc<dyn MetricClient>,
    retries: RetryTracker,
    /// How long the substrate has to report progress after launch
    launch_deadline: Duration,
}

impl SuccessHandler {
    pub fn new(
        store: Arc<dyn WorkloadQueueStore>,
        metrics: Arc<dyn MetricClient>,
        retries: RetryTracker,
        launch_deadline: Duration,
    ) -> Self {
        Self {
            store,
            metrics,
            retries,
            launch_deadline,
        }
    }

    /// Record that the workload was handed to the substrate
    pub async fn accept(&self, io: &StageIO) {
        let workload = &io.workload;
        let valid_for = chrono::Duration::from_std(self.launch_deadline).unwrap_or_default();
        let deadline = Utc::now() + valid_for;

        self.retries.record_success(&workload.id);
        if let Err(e) = self.store.mark_launched(&workload.id, deadline).await {
            error!(workload_id = %workload.id, "Failed to mark workload launched: {}", e);
        } else {
            info!(
                workload_id = %workload.id,
                dataplane_group = %workload.dataplane_group,
                "Workload launched"
            );
        }

        self.metrics.count(
            names::LAUNCH_SUCCESS,
            1,
            &[
                (attrs::DATAPLANE_GROUP, workload.dataplane_group.as_str()),
                (attrs::WORKLOAD_TYPE, workload.workload_type.as_str()),
            ],
        );
    }
}

// ============================================================================
// FailureHandler
// ============================================================================

/// What the failure handler did with a pipeline error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Put back on the queue for another attempt
    Requeued { retry_in: Duration },
    /// Written to the workload record as a failure
    Failed,
    /// Left alone: CLAIM failures and unclassified errors
    NotReported,
}

pub struct FailureHandler {
    store: Arc<dyn WorkloadQueueStore>,
    metrics: Arc<dyn MetricClient>,
    retries: RetryTracker,
    termination_source: String,
}

impl FailureHandler {
    pub fn new(
        store: Arc<dyn WorkloadQueueStore>,
        metrics: Arc<dyn MetricClient>,
        retries: RetryTracker,
    ) -> Self {
        Self {
            store,
            metrics,
            retries,
            termination_source: DEFAULT_TERMINATION_SOURCE.to_string(),
        }
    }

    pub fn with_termination_source(mut self, source: impl Into<String>) -> Self {
        self.termination_source = source.into();
        self
    }

    pub fn retries(&self) -> &RetryTracker {
        &self.retries
    }

    /// Handle a pipeline failure
    ///
    /// Retryable stage failures are requeued with backoff until the retry
    /// policy gives up; the rest are written to the workload record. CLAIM
    /// failures and unclassified errors are never written.
    pub async fn accept(&self, error: &PipelineError) -> FailureDisposition {
        match error {
            PipelineError::Stage(stage_error) if stage_error.stage.is_reportable() => {
                self.report(stage_error).await
            }
            PipelineError::Stage(stage_error) => {
                debug!(
                    workload_id = %stage_error.workload_id(),
                    stage = %stage_error.stage,
                    "Abandoning workload: {}",
                    stage_error.source
                );
                FailureDisposition::NotReported
            }
            PipelineError::Unclassified(e) => {
                warn!("Unclassified pipeline error, leaving to supervisor: {:#}", e);
                FailureDisposition::NotReported
            }
        }
    }

    async fn report(&self, stage_error: &StageError) -> FailureDisposition {
        let workload = &stage_error.io.workload;

        if stage_error.source.is_retryable() {
            let decision = self
                .retries
                .record_failure(&workload.id, stage_error.source.is_partial());
            if let RetryDecision::RetryAfter(retry_in) = decision {
                if self.requeue(stage_error, retry_in).await {
                    return FailureDisposition::Requeued { retry_in };
                }
            }
        } else {
            self.retries.forget(&workload.id);
        }

        warn!(
            workload_id = %workload.id,
            stage = %stage_error.stage,
            "Workload failed: {}",
            stage_error.source
        );

        self.metrics.count(
            names::LAUNCH_FAILURE,
            1,
            &[
                (attrs::DATAPLANE_GROUP, workload.dataplane_group.as_str()),
                (attrs::WORKLOAD_TYPE, workload.workload_type.as_str()),
                (attrs::STAGE, stage_error.stage.as_str()),
            ],
        );

        if let Err(e) = self
            .store
            .fail(&workload.id, &self.termination_source, &stage_error.to_string())
            .await
        {
            error!(workload_id = %workload.id, "Failed to record workload failure: {}", e);
        }
        FailureDisposition::Failed
    }

    async fn requeue(&self, stage_error: &StageError, retry_in: Duration) -> bool {
        let workload = &stage_error.io.workload;
        let not_before = Utc::now() + chrono::Duration::from_std(retry_in).unwrap_or_default();

        match self.store.requeue(&workload.id, not_before).await {
            Ok(_) => {
                info!(
                    workload_id = %workload.id,
                    stage = %stage_error.stage,
                    ?retry_in,
                    "Requeued workload after failure: {}",
                    stage_error.source
                );
                self.metrics.count(
                    names::LAUNCH_REQUEUED,
                    1,
                    &[
                        (attrs::DATAPLANE_GROUP, workload.dataplane_group.as_str()),
                        (attrs::WORKLOAD_TYPE, workload.workload_type.as_str()),
                        (attrs::STAGE, stage_error.stage.as_str()),
                    ],
                );
                true
            }
            Err(e) => {
                error!(workload_id = %workload.id, "Failed to requeue workload: {}", e);
                self.retries.forget(&workload.id);
                false
            }
        }
    }
}
