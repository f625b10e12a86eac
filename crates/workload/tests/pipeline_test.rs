//! End-to-end launch pipeline scenarios against in-memory collaborators

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use test_log::test;

use workload_engine::flags::StaticFeatureFlags;
use workload_engine::metrics::{attrs, names, InMemoryMetricClient};
use workload_engine::pipeline::{
    BuildConfig, ClaimStage, FailureHandler, LaunchError, LaunchPipeline, MutexPolicy,
    MutexStage, PipelineConfig, PipelineDeps, PipelineOutcome, Stage, StageIO, StageName,
    StageOutcome, SuccessHandler,
};
use workload_engine::reliability::{RetryPolicy, RetryTracker};
use workload_engine::substrate::{launch_queue_name, ExecutionSubstrate, InMemorySubstrate};
use workload_engine::worker::{
    BackpressureConfig, BackpressureState, LaunchQueue, LaunchQueueConfig, PollerConfig,
};
use workload_engine::{
    InMemoryWorkloadQueueStore, NewWorkload, Workload, WorkloadPriority, WorkloadQueueStore,
    WorkloadStatus, WorkloadType,
};

struct Harness {
    store: Arc<InMemoryWorkloadQueueStore>,
    substrate: Arc<InMemorySubstrate>,
    flags: Arc<StaticFeatureFlags>,
    metrics: Arc<InMemoryMetricClient>,
    deps: PipelineDeps,
}

impl Harness {
    async fn new() -> Self {
        let store = Arc::new(InMemoryWorkloadQueueStore::new());
        let substrate = Arc::new(InMemorySubstrate::new());
        let flags = Arc::new(StaticFeatureFlags::new());
        let metrics = Arc::new(InMemoryMetricClient::new());
        for priority in WorkloadPriority::ALL {
            substrate
                .register_queue_consumer(&launch_queue_name("g1", priority), 8)
                .await
                .unwrap();
        }

        let deps = PipelineDeps {
            store: store.clone(),
            substrate: substrate.clone(),
            flags: flags.clone(),
            metrics: metrics.clone(),
            backpressure: Arc::new(BackpressureState::new(BackpressureConfig::default(), 100)),
        };

        Self {
            store,
            substrate,
            flags,
            metrics,
            deps,
        }
    }

    /// Failures are terminal at the first attempt
    fn config(&self) -> PipelineConfig {
        self.config_for("dp-1")
    }

    fn config_for(&self, dataplane_id: &str) -> PipelineConfig {
        PipelineConfig::new(dataplane_id)
            .with_build(
                BuildConfig::new()
                    .with_image(WorkloadType::Sync, "orchestrator:1.0")
                    .with_default_image("connector-runner:1.0"),
            )
            .with_retry_policy(RetryPolicy::no_retry())
    }

    fn pipeline(&self, config: PipelineConfig) -> LaunchPipeline {
        LaunchPipeline::standard(config, self.deps.clone())
    }

    async fn enqueue(&self, workload: NewWorkload) -> Workload {
        let group = workload.dataplane_group.clone();
        let priority = workload.priority;
        let id = workload.id.clone();
        self.store.create_workload(workload).await.unwrap();
        self.store.enqueue(&group, priority, &id).await.unwrap();
        self.store.get_workload(&id).await.unwrap()
    }

    fn failures(&self, stage: StageName) -> u64 {
        self.metrics.counter(
            names::LAUNCH_FAILURE,
            &[
                (attrs::DATAPLANE_GROUP, "g1"),
                (attrs::WORKLOAD_TYPE, "sync"),
                (attrs::STAGE, stage.as_str()),
            ],
        )
    }
}

#[test(tokio::test)]
async fn test_successful_launch_records_and_acks() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(h.config());
    let workload = h
        .enqueue(
            NewWorkload::new("w-1", WorkloadType::Sync, "g1")
                .with_priority(WorkloadPriority::High)
                .with_label("connection_id", "c-42"),
        )
        .await;

    assert_eq!(pipeline.run(workload).await, PipelineOutcome::Launched);

    let workload = h.store.get_workload("w-1").await.unwrap();
    assert_eq!(workload.status, WorkloadStatus::Launched);
    assert!(h.store.queue_items().iter().all(|item| item.acked_at.is_some()));

    let spec = h.substrate.execution("w-1").unwrap();
    assert_eq!(spec.queue_name, "launcher-queue-g1-high-priority");
    assert_eq!(spec.image, "orchestrator:1.0");
    assert_eq!(spec.env.get("DATAPLANE_ID").map(String::as_str), Some("dp-1"));
    assert_eq!(spec.labels.len(), 1);
    assert_eq!(h.metrics.counter_total(names::LAUNCH_SUCCESS), 1);
}

#[test(tokio::test)]
async fn test_redelivered_workload_launches_once() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(h.config());
    let workload = h
        .enqueue(NewWorkload::new("w-1", WorkloadType::Sync, "g1"))
        .await;

    assert_eq!(pipeline.run(workload.clone()).await, PipelineOutcome::Launched);
    // A stale copy delivered again after the lease lapsed
    assert_eq!(pipeline.run(workload).await, PipelineOutcome::Abandoned);

    assert_eq!(h.substrate.submission_count(), 1);
    assert_eq!(h.metrics.counter_total(names::LAUNCH_FAILURE), 0);
}

#[test(tokio::test)]
async fn test_load_shed_failure_is_reported_once() {
    let h = Harness::new().await;
    h.flags.set_load_shed("g1", true);
    let pipeline = h.pipeline(h.config());
    let workload = h
        .enqueue(NewWorkload::new("w-1", WorkloadType::Sync, "g1"))
        .await;

    assert_eq!(
        pipeline.run(workload.clone()).await,
        PipelineOutcome::Failed(StageName::LoadShed)
    );
    // Redelivery of the same workload must not report a second failure
    assert_eq!(pipeline.run(workload).await, PipelineOutcome::Abandoned);

    let workload = h.store.get_workload("w-1").await.unwrap();
    assert_eq!(workload.status, WorkloadStatus::Failure);
    assert_eq!(workload.termination_source.as_deref(), Some("workload-launcher"));
    assert!(workload
        .termination_reason
        .as_deref()
        .is_some_and(|r| r.starts_with("LOAD_SHED stage failed")));
    assert_eq!(h.failures(StageName::LoadShed), 1);
    assert_eq!(h.substrate.execution_count(), 0);
}

#[test(tokio::test)]
async fn test_load_shed_requeues_while_retries_remain() {
    let h = Harness::new().await;
    h.flags.set_load_shed("g1", true);
    let pipeline = h.pipeline(h.config().with_retry_policy(RetryPolicy::default()));
    let workload = h
        .enqueue(NewWorkload::new("w-1", WorkloadType::Sync, "g1"))
        .await;

    assert_eq!(
        pipeline.run(workload).await,
        PipelineOutcome::Requeued(StageName::LoadShed)
    );
    let workload = h.store.get_workload("w-1").await.unwrap();
    assert_eq!(workload.status, WorkloadStatus::Pending);
    assert!(workload.dataplane_id.is_none());
    assert_eq!(h.store.count_enqueued(Some("g1"), None).await.unwrap(), 1);
    assert_eq!(h.metrics.counter_total(names::LAUNCH_FAILURE), 0);

    h.flags.set_load_shed("g1", false);
    let workload = h.store.get_workload("w-1").await.unwrap();
    assert_eq!(pipeline.run(workload).await, PipelineOutcome::Launched);
}

#[test(tokio::test)]
async fn test_expired_claim_of_restarted_dataplane_is_launched() {
    let h = Harness::new().await;
    let workload = h
        .enqueue(NewWorkload::new("w-1", WorkloadType::Sync, "g1"))
        .await;
    // Claimed by a dataplane that went away before launching
    let lapsed = Utc::now() - chrono::Duration::seconds(1);
    assert!(h.store.claim("w-1", "dp-old", lapsed).await.unwrap());

    let pipeline = h.pipeline(h.config_for("dp-new"));
    assert_eq!(pipeline.run(workload).await, PipelineOutcome::Launched);

    let workload = h.store.get_workload("w-1").await.unwrap();
    assert_eq!(workload.status, WorkloadStatus::Launched);
    assert_eq!(workload.dataplane_id.as_deref(), Some("dp-new"));
    let spec = h.substrate.execution("w-1").unwrap();
    assert_eq!(spec.env.get("DATAPLANE_ID").map(String::as_str), Some("dp-new"));
}

#[test(tokio::test)]
async fn test_claim_lost_to_other_dataplane_is_never_reported() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(h.config());
    let workload = h
        .enqueue(NewWorkload::new("w-1", WorkloadType::Sync, "g1"))
        .await;
    let deadline = Utc::now() + chrono::Duration::minutes(5);
    assert!(h.store.claim("w-1", "dp-2", deadline).await.unwrap());

    assert_eq!(pipeline.run(workload).await, PipelineOutcome::Abandoned);

    let workload = h.store.get_workload("w-1").await.unwrap();
    assert_eq!(workload.status, WorkloadStatus::Claimed);
    assert_eq!(workload.dataplane_id.as_deref(), Some("dp-2"));
    assert!(workload.termination_reason.is_none());
    assert_eq!(h.metrics.counter_total(names::LAUNCH_FAILURE), 0);
}

#[test(tokio::test)]
async fn test_missing_image_fails_build() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(
        PipelineConfig::new("dp-1")
            .with_build(BuildConfig::new().with_image(WorkloadType::Check, "check:1.0")),
    );
    let workload = h
        .enqueue(NewWorkload::new("w-1", WorkloadType::Sync, "g1"))
        .await;

    assert_eq!(
        pipeline.run(workload).await,
        PipelineOutcome::Failed(StageName::Build)
    );
    assert_eq!(h.failures(StageName::Build), 1);
}

#[test(tokio::test)]
async fn test_substrate_outage_fails_launch() {
    let h = Harness::new().await;
    h.substrate.set_unavailable(true);
    let pipeline = h.pipeline(h.config().with_termination_source("dp-1-launcher"));
    let workload = h
        .enqueue(NewWorkload::new("w-1", WorkloadType::Sync, "g1"))
        .await;

    assert_eq!(
        pipeline.run(workload).await,
        PipelineOutcome::Failed(StageName::Launch)
    );
    let workload = h.store.get_workload("w-1").await.unwrap();
    assert_eq!(workload.status, WorkloadStatus::Failure);
    assert_eq!(workload.termination_source.as_deref(), Some("dp-1-launcher"));
}

#[test(tokio::test(start_paused = true))]
async fn test_mutex_wait_times_out_while_holder_runs() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(h.config().with_mutex_policy(MutexPolicy::Wait {
        timeout: Duration::from_secs(5),
        check_interval: Duration::from_millis(500),
    }));

    let first = h
        .enqueue(NewWorkload::new("a", WorkloadType::Sync, "g1").with_mutex_key("conn-1"))
        .await;
    let second = h
        .enqueue(NewWorkload::new("b", WorkloadType::Sync, "g1").with_mutex_key("conn-1"))
        .await;

    assert_eq!(pipeline.run(first).await, PipelineOutcome::Launched);
    h.store
        .heartbeat("a", Utc::now() + chrono::Duration::minutes(5))
        .await
        .unwrap();

    assert_eq!(
        pipeline.run(second).await,
        PipelineOutcome::Failed(StageName::Mutex)
    );
    assert_eq!(h.failures(StageName::Mutex), 1);
    assert!(h.substrate.execution("b").is_none());
}

#[test(tokio::test(start_paused = true))]
async fn test_mutex_wait_launches_after_holder_finishes() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(h.config());

    let first = h
        .enqueue(NewWorkload::new("a", WorkloadType::Sync, "g1").with_mutex_key("conn-1"))
        .await;
    let second = h
        .enqueue(NewWorkload::new("b", WorkloadType::Sync, "g1").with_mutex_key("conn-1"))
        .await;
    assert_eq!(pipeline.run(first).await, PipelineOutcome::Launched);

    let store = h.store.clone();
    let finisher = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        store.succeed("a").await.unwrap();
    });

    let start = tokio::time::Instant::now();
    assert_eq!(pipeline.run(second).await, PipelineOutcome::Launched);
    assert!(start.elapsed() >= Duration::from_secs(3));
    assert_eq!(h.substrate.execution_count(), 2);
    finisher.await.unwrap();
}

#[test(tokio::test)]
async fn test_mutex_key_is_exclusive_across_dataplanes() {
    let h = Harness::new().await;
    let east = h.pipeline(h.config_for("dp-east").with_mutex_policy(MutexPolicy::FailFast));
    let west = h.pipeline(h.config_for("dp-west").with_mutex_policy(MutexPolicy::FailFast));

    let first = h
        .enqueue(NewWorkload::new("a", WorkloadType::Sync, "g1").with_mutex_key("conn-1"))
        .await;
    let second = h
        .enqueue(NewWorkload::new("b", WorkloadType::Sync, "g1").with_mutex_key("conn-1"))
        .await;

    assert_eq!(east.run(first).await, PipelineOutcome::Launched);
    assert_eq!(
        west.run(second).await,
        PipelineOutcome::Failed(StageName::Mutex)
    );
    assert_eq!(h.substrate.execution_count(), 1);
    assert!(h.substrate.execution("b").is_none());
}

#[test(tokio::test)]
async fn test_mutex_held_by_claim_in_flight_on_other_dataplane() {
    let h = Harness::new().await;
    let west = h.pipeline(h.config_for("dp-west").with_mutex_policy(MutexPolicy::FailFast));

    // dp-east has claimed "a" and passed MUTEX but not yet launched
    let holder = h
        .enqueue(NewWorkload::new("a", WorkloadType::Sync, "g1").with_mutex_key("conn-1"))
        .await;
    let deadline = Utc::now() + chrono::Duration::minutes(5);
    assert!(h.store.claim("a", "dp-east", deadline).await.unwrap());
    let holder = h.store.get_workload(&holder.id).await.unwrap();
    let east_mutex = MutexStage::new(h.store.clone(), MutexPolicy::FailFast);
    east_mutex.apply(&mut StageIO::new(holder)).await.unwrap();

    let second = h
        .enqueue(NewWorkload::new("b", WorkloadType::Sync, "g1").with_mutex_key("conn-1"))
        .await;
    assert_eq!(
        west.run(second).await,
        PipelineOutcome::Failed(StageName::Mutex)
    );

    // Once the holder terminates the key is free again
    h.store.fail("a", "dp-east", "abandoned").await.unwrap();
    let third = h
        .enqueue(NewWorkload::new("c", WorkloadType::Sync, "g1").with_mutex_key("conn-1"))
        .await;
    assert_eq!(west.run(third).await, PipelineOutcome::Launched);
}

struct Panics;

#[async_trait]
impl Stage for Panics {
    fn name(&self) -> StageName {
        StageName::Build
    }

    async fn apply(&self, _io: &mut StageIO) -> Result<StageOutcome, LaunchError> {
        panic!("image resolver crashed");
    }
}

#[test(tokio::test(start_paused = true))]
async fn test_panicking_pipeline_is_not_reported_as_workload_failure() {
    let h = Harness::new().await;
    h.enqueue(NewWorkload::new("w-1", WorkloadType::Sync, "g1"))
        .await;

    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(ClaimStage::new(h.store.clone(), "dp-1", Duration::from_secs(60))),
        Box::new(Panics),
    ];
    let retries = RetryTracker::new(RetryPolicy::no_retry());
    let pipeline = Arc::new(LaunchPipeline::new(
        stages,
        SuccessHandler::new(
            h.store.clone(),
            h.metrics.clone(),
            retries.clone(),
            Duration::from_secs(60),
        ),
        FailureHandler::new(h.store.clone(), h.metrics.clone(), retries),
        h.metrics.clone(),
    ));
    let queue = LaunchQueue::new(
        LaunchQueueConfig::new("g1", WorkloadPriority::Default)
            .with_poller(PollerConfig::new().with_poll_interval(Duration::from_secs(1))),
        h.store.clone(),
        h.metrics.clone(),
        pipeline,
    );

    queue.start().unwrap();
    while queue.stats().completed() < 1 {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    queue.shutdown().await.unwrap();

    assert_eq!(queue.stats().abandoned(), 1);
    let workload = h.store.get_workload("w-1").await.unwrap();
    assert_eq!(workload.status, WorkloadStatus::Claimed);
    assert_eq!(h.metrics.counter_total(names::LAUNCH_FAILURE), 0);
    assert_eq!(h.deps.backpressure.in_flight(), 0);
}
