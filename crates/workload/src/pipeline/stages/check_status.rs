//! CHECK_STATUS: stop early when a redelivered workload needs no launch

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::persistence::WorkloadQueueStore;
use crate::pipeline::stage::{LaunchError, Stage, StageIO, StageName, StageOutcome};
use crate::workload::WorkloadStatus;

pub struct CheckStatusStage {
    store: Arc<dyn WorkloadQueueStore>,
}

impl CheckStatusStage {
    pub fn new(store: Arc<dyn WorkloadQueueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Stage for CheckStatusStage {
    fn name(&self) -> StageName {
        StageName::CheckStatus
    }

    async fn apply(&self, io: &mut StageIO) -> Result<StageOutcome, LaunchError> {
        let current = self.store.get_workload(io.workload_id()).await?;
        let status = current.status;
        io.workload = current;

        let already_launched = matches!(status, WorkloadStatus::Launched | WorkloadStatus::Running);
        if status.is_terminal() || already_launched {
            info!(workload_id = %io.workload_id(), %status, "Workload needs no launch, skipping");
            return Ok(StageOutcome::Skip(format!("workload is already {status}")));
        }
        Ok(StageOutcome::Continue)
    }
}
