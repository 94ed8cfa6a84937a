use std::time::Duration;

use {
    tokio::time::{Instant, interval_at},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use parley_routing::RoutingStore;

use crate::messages::{MessageRepo, PendingRecord};

#[derive(Debug, Clone)]
pub struct PersisterConfig {
    pub batch_size: usize,
    pub interval: Duration,
    /// Delay before the first tick, so a restarting process does not slam
    /// the durable store while it is still warming up.
    pub first_delay: Duration,
}

impl Default for PersisterConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            interval: Duration::from_secs(10),
            first_delay: Duration::from_secs(5),
        }
    }
}

/// Drain `msg_persist_queue` into MySQL in bulk batches until cancelled.
///
/// At-least-once: the queue prefix is only trimmed after the insert
/// commits, so a failed tick leaves everything in place for the next one.
/// Ticks take a cluster-wide lock; every writing process runs a persister,
/// but only one may peek-insert-trim at a time or they would trim each
/// other's unprocessed prefix.
pub async fn run_persister(
    routing: RoutingStore,
    messages: MessageRepo,
    config: PersisterConfig,
    shutdown: CancellationToken,
) {
    let holder = uuid::Uuid::new_v4().to_string();
    let lock_ttl = config.interval.as_secs().max(10) * 3;
    let mut ticker = interval_at(Instant::now() + config.first_delay, config.interval);
    info!(
        batch_size = config.batch_size,
        interval_secs = config.interval.as_secs(),
        "persister: started"
    );
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("persister: shutting down");
                return;
            }
            _ = ticker.tick() => {
                match routing.acquire_persist_lock(&holder, lock_ttl).await {
                    Ok(true) => {},
                    Ok(false) => {
                        debug!("persister: another process holds the lock");
                        continue;
                    },
                    Err(e) => {
                        warn!(error = %e, "persister: lock unavailable");
                        continue;
                    },
                }
                if let Err(e) = persist_tick(&routing, &messages, config.batch_size).await {
                    // Queue left intact; the next tick retries the same prefix.
                    warn!(error = %e, "persister: tick failed, will retry");
                }
                if let Err(e) = routing.release_persist_lock(&holder).await {
                    warn!(error = %e, "persister: lock release failed");
                }
            }
        }
    }
}

async fn persist_tick(
    routing: &RoutingStore,
    messages: &MessageRepo,
    batch_size: usize,
) -> crate::Result<()> {
    let raw = routing.queue_peek(batch_size).await?;
    if raw.is_empty() {
        return Ok(());
    }
    let consumed = raw.len();
    let records = decode_batch(&raw);

    messages.insert_batch(&records).await?;
    routing.queue_trim(consumed).await?;
    debug!(
        inserted = records.len(),
        consumed, "persister: batch committed"
    );
    Ok(())
}

/// Decode queue entries, dropping ones that do not parse. A poisoned entry
/// is counted and skipped rather than wedging the queue forever.
fn decode_batch(raw: &[String]) -> Vec<PendingRecord> {
    let mut records = Vec::with_capacity(raw.len());
    for line in raw {
        match serde_json::from_str::<PendingRecord>(line) {
            Ok(r) => records.push(r),
            Err(e) => warn!(error = %e, "persister: skipping malformed queue entry"),
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_entries_are_dropped_not_fatal() {
        let raw = vec![
            r#"{"redis_id":"1-0","room_id":"0001","user_id":1,"content":"a","timestamp":100}"#
                .to_string(),
            "{broken".to_string(),
            r#"{"redis_id":"2-0","room_id":"0001","user_id":1,"content":"b","timestamp":101}"#
                .to_string(),
        ];
        let records = decode_batch(&raw);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].redis_id, "1-0");
        assert_eq!(records[1].redis_id, "2-0");
    }

    #[test]
    fn batch_preserves_queue_order() {
        let raw: Vec<String> = (0..5)
            .map(|i| {
                format!(
                    r#"{{"redis_id":"{i}-0","room_id":"0001","user_id":1,"content":"c","timestamp":{i}}}"#
                )
            })
            .collect();
        let records = decode_batch(&raw);
        let ids: Vec<&str> = records.iter().map(|r| r.redis_id.as_str()).collect();
        assert_eq!(ids, ["0-0", "1-0", "2-0", "3-0", "4-0"]);
    }
}
