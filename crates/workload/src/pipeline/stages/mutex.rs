//! MUTEX: single-flight execution per mutex key
//!
//! Keys are held in the store, so every dataplane sharing it sees the same
//! holder. A workload keeps its key while it is claimed, launched or running
//! and its deadline has not passed; nothing needs to release it explicitly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::persistence::{MutexAcquisition, WorkloadQueueStore};
use crate::pipeline::stage::{LaunchError, Stage, StageIO, StageName, StageOutcome};

const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// What to do when the key is busy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MutexPolicy {
    /// Fail the stage immediately
    FailFast,
    /// Re-check every `check_interval` until free or `timeout` has passed
    Wait {
        #[serde(with = "crate::duration_millis")]
        timeout: Duration,
        #[serde(with = "crate::duration_millis")]
        check_interval: Duration,
    },
}

impl Default for MutexPolicy {
    fn default() -> Self {
        Self::Wait {
            timeout: Duration::from_secs(30),
            check_interval: Duration::from_secs(1),
        }
    }
}

impl MutexPolicy {
    pub fn wait(timeout: Duration) -> Self {
        Self::Wait {
            timeout,
            check_interval: Duration::from_secs(1),
        }
    }
}

pub struct MutexStage {
    store: Arc<dyn WorkloadQueueStore>,
    policy: MutexPolicy,
}

impl MutexStage {
    pub fn new(store: Arc<dyn WorkloadQueueStore>, policy: MutexPolicy) -> Self {
        Self { store, policy }
    }
}

#[async_trait]
impl Stage for MutexStage {
    fn name(&self) -> StageName {
        StageName::Mutex
    }

    async fn apply(&self, io: &mut StageIO) -> Result<StageOutcome, LaunchError> {
        let Some(key) = io.workload.mutex_key.clone() else {
            return Ok(StageOutcome::Continue);
        };
        let workload_id = io.workload_id().to_string();
        let started = tokio::time::Instant::now();

        loop {
            let holder = match self.store.acquire_mutex(&key, &workload_id).await? {
                MutexAcquisition::Acquired => {
                    debug!(%workload_id, mutex_key = %key, "Acquired mutex key");
                    io.annotate("mutex_key", key);
                    return Ok(StageOutcome::Continue);
                }
                MutexAcquisition::HeldBy(holder) => holder,
            };

            match self.policy {
                MutexPolicy::FailFast => {
                    return Err(LaunchError::MutexConflict { key, holder });
                }
                MutexPolicy::Wait {
                    timeout,
                    check_interval,
                } => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        info!(%workload_id, mutex_key = %key, %holder, "Gave up waiting for mutex key");
                        return Err(LaunchError::MutexTimeout { key, waited });
                    }
                    let pause = check_interval.max(MIN_CHECK_INTERVAL).min(timeout - waited);
                    debug!(%workload_id, mutex_key = %key, %holder, "Mutex key busy, waiting");
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }
}
