//! Worker pool controller driving real launch queues

mod common;

use std::sync::Arc;
use std::time::Duration;

use test_log::test;

use common::seed;
use workload_engine::flags::StaticFeatureFlags;
use workload_engine::metrics::{attrs, names, InMemoryMetricClient};
use workload_engine::pipeline::{BuildConfig, LaunchPipeline, PipelineConfig, PipelineDeps};
use workload_engine::substrate::{ExecutionSubstrate, InMemorySubstrate};
use workload_engine::worker::{
    BackpressureConfig, BackpressureState, ControllerConfig, LaunchQueue, LaunchQueueConfig,
    PollerConfig, WorkerPoolController,
};
use workload_engine::{InMemoryWorkloadQueueStore, WorkloadPriority, WorkloadQueueStore};

struct Cluster {
    store: Arc<InMemoryWorkloadQueueStore>,
    substrate: Arc<InMemorySubstrate>,
    flags: Arc<StaticFeatureFlags>,
    metrics: Arc<InMemoryMetricClient>,
    controller: Arc<WorkerPoolController>,
}

impl Cluster {
    async fn start(groups: &[&str]) -> Self {
        let store = Arc::new(InMemoryWorkloadQueueStore::new());
        let substrate = Arc::new(InMemorySubstrate::new());
        let flags = Arc::new(StaticFeatureFlags::new());
        let metrics = Arc::new(InMemoryMetricClient::new());
        let backpressure = Arc::new(BackpressureState::new(BackpressureConfig::default(), 50));

        let pipeline = Arc::new(LaunchPipeline::standard(
            PipelineConfig::new("dp-1").with_build(BuildConfig::new().with_default_image("img")),
            PipelineDeps {
                store: store.clone(),
                substrate: substrate.clone(),
                flags: flags.clone(),
                metrics: metrics.clone(),
                backpressure,
            },
        ));

        let mut queues = vec![];
        for group in groups {
            for priority in WorkloadPriority::ALL {
                let queue = Arc::new(LaunchQueue::new(
                    LaunchQueueConfig::new(*group, priority)
                        .with_parallelism(4)
                        .with_poller(PollerConfig::new().with_poll_interval(Duration::from_secs(1))),
                    store.clone(),
                    metrics.clone(),
                    pipeline.clone(),
                ));
                substrate
                    .register_queue_consumer(queue.name(), 4)
                    .await
                    .unwrap();
                queue.start().unwrap();
                queues.push(queue);
            }
        }

        let controller = Arc::new(WorkerPoolController::new(
            ControllerConfig::new()
                .with_check_interval(Duration::from_secs(10))
                .with_report_interval(Duration::from_secs(60)),
            queues,
            flags.clone(),
            substrate.clone(),
            metrics.clone(),
            store.clone(),
        ));

        Self {
            store,
            substrate,
            flags,
            metrics,
            controller,
        }
    }

    async fn stop(&self) {
        self.controller.shutdown().await;
        for queue in self.controller.queues() {
            queue.shutdown().await.unwrap();
        }
    }
}

#[test(tokio::test(start_paused = true))]
async fn test_disabled_group_drains_nothing_until_reenabled() {
    let cluster = Cluster::start(&["g1", "g2"]).await;
    cluster.flags.set_consumer_enabled("g1", false);
    cluster.controller.check_enabled().await;

    seed(&*cluster.store, "g1", WorkloadPriority::Default, "a", 3).await;
    seed(&*cluster.store, "g1", WorkloadPriority::High, "h", 2).await;
    seed(&*cluster.store, "g2", WorkloadPriority::Default, "b", 3).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(cluster.store.count_enqueued(Some("g1"), None).await.unwrap(), 5);
    assert_eq!(cluster.store.count_enqueued(Some("g2"), None).await.unwrap(), 0);
    assert_eq!(cluster.substrate.execution_count(), 3);

    cluster.flags.set_consumer_enabled("g1", true);
    cluster.controller.check_enabled().await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(cluster.store.count_enqueued(None, None).await.unwrap(), 0);
    assert_eq!(cluster.substrate.execution_count(), 8);
    cluster.stop().await;
}

#[test(tokio::test(start_paused = true))]
async fn test_background_loops_report_suspension() {
    let cluster = Cluster::start(&["g1"]).await;
    cluster.flags.set_consumer_enabled("g1", false);
    cluster.controller.start();

    // Consumer check at 0s and 10s, report at 0s and 60s
    tokio::time::sleep(Duration::from_secs(61)).await;

    let gauge = |queue: &str, priority: &str| {
        cluster.metrics.gauge_value(
            names::QUEUE_POLLING_SUSPENDED,
            &[
                (attrs::QUEUE, queue),
                (attrs::DATAPLANE_GROUP, "g1"),
                (attrs::PRIORITY, priority),
            ],
        )
    };
    assert_eq!(gauge("launcher-queue-g1", "default"), Some(1));
    assert_eq!(gauge("launcher-queue-g1-high-priority", "high"), Some(1));
    assert!(cluster
        .substrate
        .is_suspended("launcher-queue-g1")
        .await
        .unwrap());

    seed(&*cluster.store, "g1", WorkloadPriority::Default, "a", 2).await;
    cluster.controller.report_status().await;
    assert_eq!(
        cluster.metrics.gauge_value(
            names::QUEUE_DEPTH,
            &[(attrs::DATAPLANE_GROUP, "g1"), (attrs::PRIORITY, "default")],
        ),
        Some(2)
    );

    cluster.stop().await;
}

#[test(tokio::test(start_paused = true))]
async fn test_substrate_outage_during_drain_is_retried() {
    let cluster = Cluster::start(&["g1"]).await;
    cluster.substrate.set_control_unavailable(true);
    cluster.flags.set_consumer_enabled("g1", false);
    cluster.controller.start();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(cluster.controller.queues().iter().all(|q| q.is_suspended()));

    cluster.substrate.set_control_unavailable(false);
    assert!(!cluster
        .substrate
        .is_suspended("launcher-queue-g1")
        .await
        .unwrap());

    // Next consumer check at 10s
    tokio::time::sleep(Duration::from_secs(6)).await;
    for queue in cluster.controller.queues() {
        assert!(cluster.substrate.is_suspended(queue.name()).await.unwrap());
    }

    cluster.stop().await;
}
