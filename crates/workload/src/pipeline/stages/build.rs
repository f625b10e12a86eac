//! BUILD: resolve the runtime image and assemble the launch spec

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pipeline::stage::{LaunchError, Stage, StageIO, StageName, StageOutcome};
use crate::substrate::{launch_queue_name, LaunchSpec};
use crate::workload::{Workload, WorkloadType};

/// Image and environment configuration for launches
///
/// # Example
///
/// ```
/// use workload_engine::pipeline::BuildConfig;
/// use workload_engine::WorkloadType;
///
/// let config = BuildConfig::new()
///     .with_image(WorkloadType::Sync, "registry.local/orchestrator:1.2.0")
///     .with_default_image("registry.local/connector-runner:1.2.0")
///     .with_env("LOG_LEVEL", "info");
///
/// assert_eq!(config.image_for(WorkloadType::Sync), Some("registry.local/orchestrator:1.2.0"));
/// assert_eq!(config.image_for(WorkloadType::Check), Some("registry.local/connector-runner:1.2.0"));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BuildConfig {
    /// Image per workload type
    #[serde(default)]
    pub images: HashMap<WorkloadType, String>,

    /// Used for types without an explicit image
    #[serde(default)]
    pub default_image: Option<String>,

    /// Extra variables added to every launch
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl BuildConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, workload_type: WorkloadType, image: impl Into<String>) -> Self {
        self.images.insert(workload_type, image.into());
        self
    }

    pub fn with_default_image(mut self, image: impl Into<String>) -> Self {
        self.default_image = Some(image.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn image_for(&self, workload_type: WorkloadType) -> Option<&str> {
        self.images
            .get(&workload_type)
            .or(self.default_image.as_ref())
            .map(String::as_str)
    }
}

pub struct BuildStage {
    config: BuildConfig,
}

impl BuildStage {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    fn launch_env(&self, workload: &Workload) -> BTreeMap<String, String> {
        let mut env = self.config.env.clone();
        env.insert("WORKLOAD_ID".into(), workload.id.clone());
        env.insert("WORKLOAD_TYPE".into(), workload.workload_type.to_string());
        env.insert("AUTO_ID".into(), workload.auto_id.clone());
        env.insert("LOG_PATH".into(), workload.log_path.clone());
        env.insert("DATAPLANE_GROUP".into(), workload.dataplane_group.clone());
        if let Some(dataplane_id) = &workload.dataplane_id {
            env.insert("DATAPLANE_ID".into(), dataplane_id.clone());
        }
        env
    }
}

#[async_trait]
impl Stage for BuildStage {
    fn name(&self) -> StageName {
        StageName::Build
    }

    async fn apply(&self, io: &mut StageIO) -> Result<StageOutcome, LaunchError> {
        let workload = &io.workload;
        let image = self
            .config
            .image_for(workload.workload_type)
            .ok_or(LaunchError::ImageNotConfigured(workload.workload_type))?
            .to_string();

        let spec = LaunchSpec {
            workload_id: workload.id.clone(),
            workload_type: workload.workload_type,
            queue_name: launch_queue_name(&workload.dataplane_group, workload.priority),
            image,
            env: self.launch_env(workload),
            labels: workload.labels.clone(),
            input_payload: workload.input_payload.clone(),
        };

        debug!(
            workload_id = %spec.workload_id,
            image = %spec.image,
            queue = %spec.queue_name,
            "Built launch spec"
        );
        io.annotate("image", spec.image.clone());
        io.launch_spec = Some(spec);
        Ok(StageOutcome::Continue)
    }
}
