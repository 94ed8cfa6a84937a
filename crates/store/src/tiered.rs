use std::collections::HashSet;

use tracing::warn;

use parley_routing::RoutingStore;

use crate::{
    Result,
    messages::{DurableMessage, MessageRepo, PendingRecord},
};

/// A message about to enter the tiered store. The id does not exist yet;
/// the cache assigns it on append.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub content: String,
    pub user_id: i64,
    pub timestamp: i64,
}

/// A message after the cache accepted it.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub content: String,
    pub user_id: i64,
    pub timestamp: i64,
}

/// One history entry, regardless of which tier served it.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: String,
    pub content: String,
    pub user_id: i64,
    pub timestamp: i64,
}

/// A page of room history, newest first.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    pub has_more: bool,
}

/// Write path: cache stream first, durable queue second. Read path: cache
/// first, durable fallback for the shortfall.
#[derive(Clone)]
pub struct TieredStore {
    routing: RoutingStore,
    messages: MessageRepo,
}

impl TieredStore {
    pub fn new(routing: RoutingStore, messages: MessageRepo) -> Self {
        Self { routing, messages }
    }

    /// Append messages to the room's cache stream and enqueue each for
    /// durable insertion. Returns the stored form with cache-assigned ids.
    ///
    /// On partial failure the error surfaces without rolling back earlier
    /// appends; callers re-send and the persister tolerates duplicate
    /// `redis_id`s.
    pub async fn store_tiered(
        &self,
        room_id: &str,
        msgs: Vec<NewMessage>,
    ) -> Result<Vec<StoredMessage>> {
        let mut stored = Vec::with_capacity(msgs.len());
        for msg in msgs {
            let id = self
                .routing
                .stream_append(room_id, &msg.content, msg.user_id, msg.timestamp)
                .await?;
            let record = PendingRecord {
                redis_id: id.clone(),
                room_id: room_id.to_string(),
                user_id: msg.user_id,
                content: msg.content.clone(),
                timestamp: msg.timestamp,
            };
            self.routing
                .queue_push(&serde_json::to_string(&record)?)
                .await?;
            stored.push(StoredMessage {
                id,
                content: msg.content,
                user_id: msg.user_id,
                timestamp: msg.timestamp,
            });
        }
        Ok(stored)
    }

    /// Serve a page of room history. The cursor, when present, is the id of
    /// the oldest message the client already has; the page continues
    /// strictly below it.
    pub async fn room_history_tiered(
        &self,
        room_id: &str,
        cursor: Option<&str>,
        count: usize,
    ) -> Result<HistoryPage> {
        let cached = self.routing.stream_revrange(room_id, cursor, count).await?;
        let mut entries: Vec<HistoryEntry> = cached
            .into_iter()
            .map(|e| HistoryEntry {
                id: e.id,
                content: e.content,
                user_id: e.user_id,
                timestamp: e.timestamp,
            })
            .collect();

        if entries.len() < count {
            let shortfall = count - entries.len();
            match self.messages.recent(room_id, shortfall).await {
                Ok(rows) => {
                    entries = merge_history(entries, rows);
                },
                Err(e) => {
                    // The cache already produced a (possibly short) page;
                    // a durable-store outage degrades to that rather than
                    // failing the request.
                    warn!(room_id, error = %e, "history fallback unavailable");
                },
            }
        }

        entries.truncate(count);
        let has_more = entries.len() >= count;
        Ok(HistoryPage { entries, has_more })
    }
}

/// Concatenate the cache page with the durable fallback, resolving
/// duplicates by message id, keep-first (the cache copy wins).
fn merge_history(cached: Vec<HistoryEntry>, durable: Vec<DurableMessage>) -> Vec<HistoryEntry> {
    let mut seen: HashSet<String> = cached.iter().map(|e| e.id.clone()).collect();
    let mut merged = cached;
    for row in durable {
        if seen.insert(row.redis_id.clone()) {
            merged.push(HistoryEntry {
                id: row.redis_id,
                content: row.content,
                user_id: row.user_id,
                timestamp: row.timestamp,
            });
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, ts: i64) -> HistoryEntry {
        HistoryEntry {
            id: id.into(),
            content: format!("m-{id}"),
            user_id: 1,
            timestamp: ts,
        }
    }

    fn durable(id: &str, ts: i64) -> DurableMessage {
        DurableMessage {
            redis_id: id.into(),
            room_id: "0001".into(),
            user_id: 1,
            content: format!("m-{id}"),
            timestamp: ts,
        }
    }

    #[test]
    fn merge_keeps_the_cache_copy_on_duplicate_ids() {
        let cached = vec![entry("5-0", 105), entry("4-0", 104)];
        let fallback = vec![durable("4-0", 104), durable("3-0", 103)];
        let merged = merge_history(cached, fallback);
        let ids: Vec<&str> = merged.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["5-0", "4-0", "3-0"]);
    }

    #[test]
    fn merge_with_empty_cache_is_the_fallback() {
        let merged = merge_history(vec![], vec![durable("2-0", 102), durable("1-0", 101)]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "2-0");
    }

    #[test]
    fn short_page_reports_no_more() {
        // The has_more rule: a full page implies more may exist, a short
        // page proves exhaustion.
        let entries = vec![entry("2-0", 102)];
        let count = 20;
        let has_more = entries.len() >= count;
        assert!(!has_more);
    }
}
