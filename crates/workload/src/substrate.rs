//! Execution substrate boundary
//!
//! The substrate runs a workload's business logic once launched. The engine
//! only registers queue consumers, hands over prepared launches and toggles
//! polling per queue.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::workload::{WorkloadLabel, WorkloadPriority, WorkloadType};

/// Substrate queue serving one dataplane group at one priority
pub fn launch_queue_name(dataplane_group: &str, priority: WorkloadPriority) -> String {
    match priority {
        WorkloadPriority::Default => format!("launcher-queue-{dataplane_group}"),
        WorkloadPriority::High => format!("launcher-queue-{dataplane_group}-high-priority"),
    }
}

/// Everything the substrate needs to start a workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub workload_id: String,
    pub workload_type: WorkloadType,
    /// Substrate queue the launch is submitted to
    pub queue_name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub labels: Vec<WorkloadLabel>,
    /// Passed through unmodified
    pub input_payload: String,
}

/// Substrate errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubstrateError {
    #[error("no consumer registered for queue {0}")]
    UnknownQueue(String),

    #[error("launch rejected: {0}")]
    Rejected(String),

    #[error("substrate unavailable: {0}")]
    Unavailable(String),
}

/// Abstract execution engine
#[async_trait]
pub trait ExecutionSubstrate: Send + Sync + 'static {
    /// Register a consumer for a queue with the given concurrency
    async fn register_queue_consumer(
        &self,
        queue_name: &str,
        concurrency: usize,
    ) -> Result<(), SubstrateError>;

    /// Submit a launch; returns once the substrate has accepted it
    async fn execute(&self, spec: &LaunchSpec) -> Result<(), SubstrateError>;

    async fn suspend_polling(&self, queue_name: &str) -> Result<(), SubstrateError>;

    async fn resume_polling(&self, queue_name: &str) -> Result<(), SubstrateError>;

    async fn is_suspended(&self, queue_name: &str) -> Result<bool, SubstrateError>;
}

#[derive(Debug, Clone)]
struct ConsumerState {
    concurrency: usize,
    suspended: bool,
}

/// In-memory substrate for tests and local runs
///
/// Accepting the same workload id twice is a no-op.
#[derive(Default)]
pub struct InMemorySubstrate {
    consumers: DashMap<String, ConsumerState>,
    executions: DashMap<String, LaunchSpec>,
    submissions: AtomicUsize,
    unavailable: AtomicBool,
    control_unavailable: AtomicBool,
}

impl InMemorySubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `execute` fail until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make suspend, resume and state queries fail until cleared
    pub fn set_control_unavailable(&self, unavailable: bool) {
        self.control_unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_control(&self) -> Result<(), SubstrateError> {
        if self.control_unavailable.load(Ordering::SeqCst) {
            return Err(SubstrateError::Unavailable(
                "in-memory substrate control plane offline".into(),
            ));
        }
        Ok(())
    }

    /// Distinct workloads accepted
    pub fn execution_count(&self) -> usize {
        self.executions.len()
    }

    /// `execute` calls accepted, counting duplicates
    pub fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn execution(&self, workload_id: &str) -> Option<LaunchSpec> {
        self.executions.get(workload_id).map(|spec| spec.clone())
    }

    pub fn consumer_concurrency(&self, queue_name: &str) -> Option<usize> {
        self.consumers.get(queue_name).map(|c| c.concurrency)
    }

    fn set_suspended(&self, queue_name: &str, suspended: bool) -> Result<(), SubstrateError> {
        self.check_control()?;
        let mut consumer = self
            .consumers
            .get_mut(queue_name)
            .ok_or_else(|| SubstrateError::UnknownQueue(queue_name.to_string()))?;
        consumer.suspended = suspended;
        Ok(())
    }
}

#[async_trait]
impl ExecutionSubstrate for InMemorySubstrate {
    async fn register_queue_consumer(
        &self,
        queue_name: &str,
        concurrency: usize,
    ) -> Result<(), SubstrateError> {
        self.consumers.insert(
            queue_name.to_string(),
            ConsumerState {
                concurrency,
                suspended: false,
            },
        );
        info!(queue = %queue_name, concurrency, "Registered queue consumer");
        Ok(())
    }

    async fn execute(&self, spec: &LaunchSpec) -> Result<(), SubstrateError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SubstrateError::Unavailable("in-memory substrate offline".into()));
        }
        if !self.consumers.contains_key(&spec.queue_name) {
            return Err(SubstrateError::UnknownQueue(spec.queue_name.clone()));
        }

        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.executions
            .entry(spec.workload_id.clone())
            .or_insert_with(|| spec.clone());
        debug!(workload_id = %spec.workload_id, queue = %spec.queue_name, "Accepted launch");
        Ok(())
    }

    async fn suspend_polling(&self, queue_name: &str) -> Result<(), SubstrateError> {
        self.set_suspended(queue_name, true)
    }

    async fn resume_polling(&self, queue_name: &str) -> Result<(), SubstrateError> {
        self.set_suspended(queue_name, false)
    }

    async fn is_suspended(&self, queue_name: &str) -> Result<bool, SubstrateError> {
        self.check_control()?;
        self.consumers
            .get(queue_name)
            .map(|c| c.suspended)
            .ok_or_else(|| SubstrateError::UnknownQueue(queue_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, queue: &str) -> LaunchSpec {
        LaunchSpec {
            workload_id: id.to_string(),
            workload_type: WorkloadType::Sync,
            queue_name: queue.to_string(),
            image: "sync:latest".to_string(),
            env: BTreeMap::new(),
            labels: vec![],
            input_payload: String::new(),
        }
    }

    #[test]
    fn test_queue_names_differ_by_priority() {
        assert_eq!(
            launch_queue_name("us-east", WorkloadPriority::Default),
            "launcher-queue-us-east"
        );
        assert_eq!(
            launch_queue_name("us-east", WorkloadPriority::High),
            "launcher-queue-us-east-high-priority"
        );
    }

    #[tokio::test]
    async fn test_execute_is_idempotent_per_workload() {
        let substrate = InMemorySubstrate::new();
        substrate.register_queue_consumer("q", 4).await.unwrap();

        substrate.execute(&spec("w-1", "q")).await.unwrap();
        substrate.execute(&spec("w-1", "q")).await.unwrap();

        assert_eq!(substrate.execution_count(), 1);
        assert_eq!(substrate.submission_count(), 2);
        assert_eq!(substrate.consumer_concurrency("q"), Some(4));
    }

    #[tokio::test]
    async fn test_unknown_queue() {
        let substrate = InMemorySubstrate::new();
        assert!(matches!(
            substrate.execute(&spec("w-1", "missing")).await,
            Err(SubstrateError::UnknownQueue(_))
        ));
        assert!(substrate.is_suspended("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_suspend_and_resume() {
        let substrate = InMemorySubstrate::new();
        substrate.register_queue_consumer("q", 1).await.unwrap();

        substrate.suspend_polling("q").await.unwrap();
        assert!(substrate.is_suspended("q").await.unwrap());
        substrate.resume_polling("q").await.unwrap();
        assert!(!substrate.is_suspended("q").await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable() {
        let substrate = InMemorySubstrate::new();
        substrate.register_queue_consumer("q", 1).await.unwrap();
        substrate.set_unavailable(true);
        assert!(matches!(
            substrate.execute(&spec("w-1", "q")).await,
            Err(SubstrateError::Unavailable(_))
        ));
        assert!(substrate.suspend_polling("q").await.is_ok());
    }

    #[tokio::test]
    async fn test_control_unavailable() {
        let substrate = InMemorySubstrate::new();
        substrate.register_queue_consumer("q", 1).await.unwrap();
        substrate.set_control_unavailable(true);

        assert!(matches!(
            substrate.suspend_polling("q").await,
            Err(SubstrateError::Unavailable(_))
        ));
        assert!(substrate.is_suspended("q").await.is_err());
        substrate.execute(&spec("w-1", "q")).await.unwrap();

        substrate.set_control_unavailable(false);
        assert!(!substrate.is_suspended("q").await.unwrap());
    }
}
