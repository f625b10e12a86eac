//! Queue store and poller behaviour under failures and concurrency

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use test_log::test;

use common::{seed, FlakyStore};
use workload_engine::clock::ManualClock;
use workload_engine::metrics::{names, InMemoryMetricClient};
use workload_engine::persistence::PollRequest;
use workload_engine::worker::{PollerConfig, QueuePoller};
use workload_engine::{InMemoryWorkloadQueueStore, WorkloadPriority, WorkloadQueueStore};

#[test(tokio::test(start_paused = true))]
async fn test_failed_poll_leaves_no_gap_or_duplicate() {
    let store = FlakyStore::new();
    seed(&*store, "g1", WorkloadPriority::Default, "w", 4).await;
    let metrics = Arc::new(InMemoryMetricClient::new());

    let poller = QueuePoller::new(
        store.clone(),
        metrics.clone(),
        PollerConfig::new()
            .with_batch_size(2)
            .with_poll_interval(Duration::from_secs(5)),
    );
    let start = tokio::time::Instant::now();
    let mut stream = poller.initialize("g1").unwrap();

    let mut received = vec![];
    for _ in 0..2 {
        received.push(stream.next().await.unwrap().id);
    }
    store.fail_next_polls(1);
    for _ in 0..2 {
        received.push(stream.next().await.unwrap().id);
    }

    assert_eq!(received, vec!["w0", "w1", "w2", "w3"]);
    assert_eq!(start.elapsed(), Duration::from_secs(10));
    assert_eq!(store.poll_calls(), 3);
    assert_eq!(metrics.counter_total(names::POLL_COUNT), 3);
    assert_eq!(metrics.counter_total(names::POLL_ERROR), 1);
    assert_eq!(metrics.counter_total(names::POLL_CLAIMED), 4);

    poller.shutdown().await;
}

#[test(tokio::test(start_paused = true))]
async fn test_consecutive_failures_never_end_the_stream() {
    let store = FlakyStore::new();
    seed(&*store, "g1", WorkloadPriority::Default, "w", 1).await;
    store.fail_next_polls(5);

    let poller = QueuePoller::new(
        store.clone(),
        Arc::new(InMemoryMetricClient::new()),
        PollerConfig::new().with_poll_interval(Duration::from_secs(1)),
    );
    let mut stream = poller.initialize("g1").unwrap();

    assert_eq!(stream.next().await.unwrap().id, "w0");
    assert_eq!(store.poll_calls(), 6);
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_concurrent_polls_never_share_a_workload() {
    let store = Arc::new(InMemoryWorkloadQueueStore::new());
    let ids = seed(&*store, "g1", WorkloadPriority::Default, "w", 200).await;

    let mut tasks = vec![];
    for _ in 0..8 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let mut claimed = vec![];
            loop {
                let batch = store
                    .poll(PollRequest::new(7, Duration::from_secs(300)).for_group("g1"))
                    .await
                    .unwrap();
                if batch.is_empty() {
                    break;
                }
                claimed.extend(batch.into_iter().map(|w| w.id));
                tokio::task::yield_now().await;
            }
            claimed
        }));
    }

    let mut all = vec![];
    for task in tasks {
        all.extend(task.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), ids.len());
    assert_eq!(unique.len(), ids.len());
}

#[test(tokio::test)]
async fn test_lease_lapses_exactly_at_window() {
    let clock = Arc::new(ManualClock::default());
    let store = InMemoryWorkloadQueueStore::with_clock(clock.clone());
    seed(&store, "g1", WorkloadPriority::High, "w", 1).await;
    let request = || PollRequest::new(10, Duration::from_secs(60));

    assert_eq!(store.poll(request()).await.unwrap().len(), 1);
    clock.advance(Duration::from_secs(59));
    assert!(store.poll(request()).await.unwrap().is_empty());
    clock.advance(Duration::from_secs(1));
    let redelivered = store.poll(request()).await.unwrap();
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].id, "w0");

    store.ack("w0").await.unwrap();
    clock.advance(Duration::from_secs(3600));
    assert!(store.poll(request()).await.unwrap().is_empty());
}

#[test(tokio::test)]
async fn test_partition_filters_and_fifo() {
    let store = InMemoryWorkloadQueueStore::new();
    seed(&store, "g1", WorkloadPriority::Default, "a", 3).await;
    seed(&store, "g2", WorkloadPriority::Default, "b", 2).await;
    seed(&store, "g1", WorkloadPriority::High, "c", 2).await;

    let stats = store.queue_stats().await.unwrap();
    assert_eq!(stats.iter().map(|s| s.enqueued_count).sum::<u64>(), 7);

    let high = store
        .poll(
            PollRequest::new(10, Duration::from_secs(60))
                .for_group("g1")
                .with_priority(WorkloadPriority::High),
        )
        .await
        .unwrap();
    assert_eq!(
        high.iter().map(|w| w.id.as_str()).collect::<Vec<_>>(),
        vec!["c0", "c1"]
    );

    let g1 = store
        .poll(PollRequest::new(10, Duration::from_secs(60)).for_group("g1"))
        .await
        .unwrap();
    assert_eq!(
        g1.iter().map(|w| w.id.as_str()).collect::<Vec<_>>(),
        vec!["a0", "a1", "a2"]
    );
    assert_eq!(store.count_enqueued(Some("g2"), None).await.unwrap(), 2);
}
