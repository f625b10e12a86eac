//! LOAD_SHED: admission control for the executor

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::flags::{FeatureFlagClient, Flag, FlagContext};
use crate::pipeline::stage::{LaunchError, Stage, StageIO, StageName, StageOutcome};
use crate::worker::BackpressureState;

/// Rejects workloads of shedding groups and takes an executor slot otherwise
///
/// The slot is kept in [`StageIO::admission`] and released when the
/// invocation ends.
pub struct LoadShedStage {
    flags: Arc<dyn FeatureFlagClient>,
    capacity: Arc<BackpressureState>,
}

impl LoadShedStage {
    pub fn new(flags: Arc<dyn FeatureFlagClient>, capacity: Arc<BackpressureState>) -> Self {
        Self { flags, capacity }
    }
}

#[async_trait]
impl Stage for LoadShedStage {
    fn name(&self) -> StageName {
        StageName::LoadShed
    }

    async fn apply(&self, io: &mut StageIO) -> Result<StageOutcome, LaunchError> {
        let group = &io.workload.dataplane_group;
        let context = FlagContext::queue(group.clone(), io.workload.priority);

        if self.flags.is_enabled(Flag::LoadShed, &context).await {
            warn!(workload_id = %io.workload_id(), %group, "Load shedding enabled for group");
            return Err(LaunchError::LoadShed(format!(
                "dataplane group {group} is shedding load"
            )));
        }

        if io.admission.is_none() {
            match self.capacity.try_admit() {
                Ok(guard) => io.admission = Some(guard),
                Err(over) => {
                    warn!(
                        workload_id = %io.workload_id(),
                        in_flight = over.in_flight,
                        max = over.max_concurrency,
                        "Executor over capacity"
                    );
                    return Err(LaunchError::LoadShed(over.to_string()));
                }
            }
        }

        Ok(StageOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::flags::StaticFeatureFlags;
    use crate::worker::BackpressureConfig;
    use crate::workload::{NewWorkload, WorkloadType};

    fn io() -> StageIO {
        StageIO::new(NewWorkload::new("w-1", WorkloadType::Sync, "g1").into_workload(Utc::now()))
    }

    fn capacity(max: usize) -> Arc<BackpressureState> {
        Arc::new(BackpressureState::new(BackpressureConfig::default(), max))
    }

    #[tokio::test]
    async fn test_admits_under_capacity() {
        let capacity = capacity(10);
        let stage = LoadShedStage::new(Arc::new(StaticFeatureFlags::new()), capacity.clone());
        let mut io = io();
        assert_eq!(stage.apply(&mut io).await.unwrap(), StageOutcome::Continue);
        assert!(io.admission.is_some());
        assert_eq!(capacity.in_flight(), 1);

        drop(io);
        assert_eq!(capacity.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_single_slot_admits_the_first_workload() {
        let capacity = capacity(1);
        let stage = LoadShedStage::new(Arc::new(StaticFeatureFlags::new()), capacity.clone());

        let mut first = io();
        assert_eq!(stage.apply(&mut first).await.unwrap(), StageOutcome::Continue);
        assert!(matches!(
            stage.apply(&mut io()).await,
            Err(LaunchError::LoadShed(_))
        ));

        drop(first);
        assert_eq!(stage.apply(&mut io()).await.unwrap(), StageOutcome::Continue);
    }

    #[tokio::test]
    async fn test_rejects_flagged_group() {
        let capacity = capacity(10);
        let flags = StaticFeatureFlags::new().with_load_shed_groups(["g1"]);
        let stage = LoadShedStage::new(Arc::new(flags), capacity.clone());
        assert!(matches!(
            stage.apply(&mut io()).await,
            Err(LaunchError::LoadShed(reason)) if reason.contains("g1")
        ));
        assert_eq!(capacity.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_rejects_over_capacity() {
        let capacity = capacity(2);
        let _held = [
            capacity.try_admit().unwrap(),
            capacity.try_admit().unwrap(),
        ];
        let stage = LoadShedStage::new(Arc::new(StaticFeatureFlags::new()), capacity);
        assert!(matches!(
            stage.apply(&mut io()).await,
            Err(LaunchError::LoadShed(reason)) if reason.contains("2/2")
        ));
    }
}
