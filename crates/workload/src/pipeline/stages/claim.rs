//! CLAIM: take ownership of the workload for this dataplane

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::persistence::WorkloadQueueStore;
use crate::pipeline::stage::{LaunchError, Stage, StageIO, StageName, StageOutcome};

pub struct ClaimStage {
    store: Arc<dyn WorkloadQueueStore>,
    dataplane_id: String,
    /// How long the claim stays valid before the workload must be launched
    claim_deadline: Duration,
}

impl ClaimStage {
    pub fn new(
        store: Arc<dyn WorkloadQueueStore>,
        dataplane_id: impl Into<String>,
        claim_deadline: Duration,
    ) -> Self {
        Self {
            store,
            dataplane_id: dataplane_id.into(),
            claim_deadline,
        }
    }
}

#[async_trait]
impl Stage for ClaimStage {
    fn name(&self) -> StageName {
        StageName::Claim
    }

    async fn apply(&self, io: &mut StageIO) -> Result<StageOutcome, LaunchError> {
        let valid_for = chrono::Duration::from_std(self.claim_deadline).unwrap_or_default();
        let deadline = Utc::now() + valid_for;
        let claimed = self
            .store
            .claim(io.workload_id(), &self.dataplane_id, deadline)
            .await?;

        if !claimed {
            return Err(LaunchError::ClaimRejected {
                dataplane_id: self.dataplane_id.clone(),
            });
        }

        debug!(
            workload_id = %io.workload_id(),
            dataplane_id = %self.dataplane_id,
            "Claimed workload"
        );
        io.workload.dataplane_id = Some(self.dataplane_id.clone());
        io.annotate("dataplane_id", self.dataplane_id.clone());
        Ok(StageOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryWorkloadQueueStore;
    use crate::workload::{NewWorkload, WorkloadStatus, WorkloadType};

    #[tokio::test]
    async fn test_claim_binds_dataplane() {
        let store = Arc::new(InMemoryWorkloadQueueStore::new());
        let workload = store
            .create_workload(NewWorkload::new("w-1", WorkloadType::Sync, "g1"))
            .await
            .unwrap();

        let stage = ClaimStage::new(store.clone(), "dp-1", Duration::from_secs(300));
        let mut io = StageIO::new(workload);
        assert_eq!(stage.apply(&mut io).await.unwrap(), StageOutcome::Continue);
        assert_eq!(io.workload.dataplane_id.as_deref(), Some("dp-1"));

        let stored = store.get_workload("w-1").await.unwrap();
        assert_eq!(stored.status, WorkloadStatus::Claimed);
        assert!(stored.deadline.is_some());
    }

    #[tokio::test]
    async fn test_claim_rejected_for_other_dataplane() {
        let store = Arc::new(InMemoryWorkloadQueueStore::new());
        let workload = store
            .create_workload(NewWorkload::new("w-1", WorkloadType::Sync, "g1"))
            .await
            .unwrap();
        store
            .claim("w-1", "dp-other", Utc::now() + chrono::Duration::minutes(5))
            .await
            .unwrap();

        let stage = ClaimStage::new(store, "dp-1", Duration::from_secs(300));
        let mut io = StageIO::new(workload);
        assert!(matches!(
            stage.apply(&mut io).await,
            Err(LaunchError::ClaimRejected { .. })
        ));
    }
}
