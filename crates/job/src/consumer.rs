use std::{sync::Arc, time::Duration};

use {
    anyhow::Context,
    metrics::counter,
    rdkafka::{
        ClientConfig, Message,
        consumer::{CommitMode, Consumer, StreamConsumer},
    },
    tokio::task::JoinSet,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use {parley_config::ParleyConfig, parley_routing::RoutingStore};

use crate::{
    fanout::CometPool,
    pipeline::{Outcome, Pipeline},
};

/// Run N workers, each owning one consumer in the shared group. Kafka
/// spreads the topic's partitions across them, which is what pins a room
/// to a single serial loop.
pub async fn run_job(config: ParleyConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let routing = RoutingStore::connect(
        &config.redis.url,
        Duration::from_millis(config.redis.connect_timeout_ms),
    )
    .await
    .context("routing store connect")?;

    let pool = CometPool::new(Duration::from_secs(2), Duration::from_secs(5));
    let pipeline = Arc::new(Pipeline::new(routing, pool));

    let mut workers = JoinSet::new();
    for worker_id in 0..config.kafka.workers.max(1) {
        let consumer = build_consumer(&config)?;
        let pipeline = Arc::clone(&pipeline);
        let shutdown = shutdown.clone();
        workers.spawn(worker_loop(worker_id, consumer, pipeline, shutdown));
    }
    info!(workers = config.kafka.workers.max(1), topic = %config.kafka.topic, "job: consuming");

    while let Some(res) = workers.join_next().await {
        if let Err(e) = res {
            warn!(error = %e, "job: worker task failed");
        }
    }
    info!("job: shut down cleanly");
    Ok(())
}

fn build_consumer(config: &ParleyConfig) -> anyhow::Result<StreamConsumer> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("group.id", &config.kafka.group)
        .set("bootstrap.servers", &config.kafka.brokers)
        .set("enable.partition.eof", "false")
        .set("session.timeout.ms", "6000")
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "latest")
        .create()
        .context("kafka consumer init")?;
    consumer
        .subscribe(&[config.kafka.topic.as_str()])
        .context("topic subscribe")?;
    Ok(consumer)
}

/// Serial loop: poll → pipeline → commit. A poisoned record is counted
/// and committed past; it never stalls the partition.
async fn worker_loop(
    worker_id: usize,
    consumer: StreamConsumer,
    pipeline: Arc<Pipeline>,
    shutdown: CancellationToken,
) {
    info!(worker_id, "job: worker started");
    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = consumer.recv() => msg,
        };
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!(worker_id, error = %e, "job: poll failed");
                continue;
            },
        };

        let outcome = match msg.payload() {
            Some(payload) => pipeline.handle_record(payload).await,
            None => Outcome::DroppedDecode,
        };
        record_outcome(&outcome);

        if let Err(e) = consumer.commit_message(&msg, CommitMode::Async) {
            warn!(worker_id, error = %e, "job: offset commit failed");
        }
    }
    info!(worker_id, "job: worker stopped");
}

fn record_outcome(outcome: &Outcome) {
    counter!("job_records_total").increment(1);
    match outcome {
        Outcome::Broadcast {
            edges_ok,
            edges_failed,
        } => {
            counter!("job_broadcast_edges_total").increment(*edges_ok as u64);
            counter!("job_broadcast_failed_total").increment(*edges_failed as u64);
        },
        Outcome::DroppedDecode => counter!("job_dropped_decode_total").increment(1),
        Outcome::DroppedDuplicate => counter!("job_dropped_duplicate_total").increment(1),
        Outcome::DroppedCooldown => counter!("job_dropped_cooldown_total").increment(1),
        Outcome::DroppedLocked => counter!("job_dropped_locked_total").increment(1),
        Outcome::DroppedEmptyRoute => counter!("job_dropped_empty_route_total").increment(1),
    }
}
