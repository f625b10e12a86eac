//! LAUNCH: hand the prepared workload to the execution substrate

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::pipeline::stage::{LaunchError, Stage, StageIO, StageName, StageOutcome};
use crate::substrate::ExecutionSubstrate;

pub struct LaunchStage {
    substrate: Arc<dyn ExecutionSubstrate>,
}

impl LaunchStage {
    pub fn new(substrate: Arc<dyn ExecutionSubstrate>) -> Self {
        Self { substrate }
    }
}

#[async_trait]
impl Stage for LaunchStage {
    fn name(&self) -> StageName {
        StageName::Launch
    }

    async fn apply(&self, io: &mut StageIO) -> Result<StageOutcome, LaunchError> {
        let spec = io
            .launch_spec
            .as_ref()
            .ok_or(LaunchError::MissingLaunchSpec)?;

        self.substrate.execute(spec).await?;
        info!(
            workload_id = %spec.workload_id,
            queue = %spec.queue_name,
            "Workload handed to substrate"
        );
        Ok(StageOutcome::Continue)
    }
}
