//! Stage contract, per-invocation state and stage-tagged errors

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::persistence::StoreError;
use crate::substrate::{LaunchSpec, SubstrateError};
use crate::worker::InFlightGuard;
use crate::workload::{Workload, WorkloadType};

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageName {
    Claim,
    CheckStatus,
    Build,
    LoadShed,
    Mutex,
    Launch,
}

impl StageName {
    pub const ALL: [StageName; 6] = [
        StageName::Claim,
        StageName::CheckStatus,
        StageName::Build,
        StageName::LoadShed,
        StageName::Mutex,
        StageName::Launch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claim => "CLAIM",
            Self::CheckStatus => "CHECK_STATUS",
            Self::Build => "BUILD",
            Self::LoadShed => "LOAD_SHED",
            Self::Mutex => "MUTEX",
            Self::Launch => "LAUNCH",
        }
    }

    /// Whether a failure in this stage is written to the workload record
    ///
    /// CLAIM failures mean ownership was lost to someone else.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Self::Claim)
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State threaded through one pipeline invocation
///
/// Owned by a single invocation and never shared.
pub struct StageIO {
    /// Workload as delivered by the poller, refreshed by CHECK_STATUS
    pub workload: Workload,
    /// Filled in by BUILD
    pub launch_spec: Option<LaunchSpec>,
    /// Executor slot taken by LOAD_SHED, held until the invocation ends
    pub admission: Option<InFlightGuard>,
    /// Key/value context accumulated by stages for logging
    pub log_context: BTreeMap<String, String>,
}

impl StageIO {
    pub fn new(workload: Workload) -> Self {
        let mut log_context = BTreeMap::new();
        log_context.insert("workload_id".to_string(), workload.id.clone());
        log_context.insert("auto_id".to_string(), workload.auto_id.clone());
        Self {
            workload,
            launch_spec: None,
            admission: None,
            log_context,
        }
    }

    pub fn workload_id(&self) -> &str {
        &self.workload.id
    }

    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.log_context.insert(key.into(), value.into());
    }
}

impl fmt::Debug for StageIO {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageIO")
            .field("workload_id", &self.workload.id)
            .field("status", &self.workload.status)
            .field("launch_spec", &self.launch_spec.is_some())
            .field("admitted", &self.admission.is_some())
            .field("log_context", &self.log_context)
            .finish()
    }
}

/// Cause of a stage failure
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("workload is owned by another dataplane (tried {dataplane_id})")]
    ClaimRejected { dataplane_id: String },

    #[error("load shed: {0}")]
    LoadShed(String),

    #[error("mutex key {key} still held after {waited:?}")]
    MutexTimeout { key: String, waited: Duration },

    #[error("mutex key {key} is held by workload {holder}")]
    MutexConflict { key: String, holder: String },

    #[error("no image configured for workload type {0}")]
    ImageNotConfigured(WorkloadType),

    #[error("launch attempted before the launch spec was built")]
    MissingLaunchSpec,

    #[error("substrate error: {0}")]
    Substrate(#[from] SubstrateError),
}

impl LaunchError {
    /// Whether another attempt could succeed without operator action
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::ClaimRejected { .. }
                | Self::ImageNotConfigured(_)
                | Self::MissingLaunchSpec
                | Self::Substrate(SubstrateError::Rejected(_))
        )
    }

    /// Deferred by executor or key contention rather than broken
    ///
    /// Counted against the partial-failure ceilings of the retry policy.
    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            Self::LoadShed(_) | Self::MutexTimeout { .. } | Self::MutexConflict { .. }
        )
    }
}

/// A failure tagged with the stage that raised it and the invocation state
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed: {source}")]
pub struct StageError {
    pub stage: StageName,
    #[source]
    pub source: LaunchError,
    pub io: Box<StageIO>,
}

impl StageError {
    pub fn new(stage: StageName, source: LaunchError, io: StageIO) -> Self {
        Self {
            stage,
            source,
            io: Box::new(io),
        }
    }

    pub fn workload_id(&self) -> &str {
        self.io.workload_id()
    }
}

/// Error reaching the failure handler
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Stage(#[from] StageError),

    /// Not produced by a stage; left to the supervising layer
    #[error(transparent)]
    Unclassified(#[from] anyhow::Error),
}

/// What a stage decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Hand over to the next stage
    Continue,
    /// Stop without success or failure (e.g. already terminal)
    Skip(String),
}

/// One step of the launch pipeline
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    fn name(&self) -> StageName;

    async fn apply(&self, io: &mut StageIO) -> Result<StageOutcome, LaunchError>;
}
