use std::{sync::Arc, time::Duration};

use {
    redis::{
        AsyncCommands, Script,
        aio::{ConnectionManager, ConnectionManagerConfig},
        streams::StreamRangeReply,
    },
    tracing::debug,
};

use parley_common::Context as _;

use crate::{Result, keys};

/// Compare-and-delete: release a key only while we still hold it. Used for
/// the dispatch lock and for `user:online` cleanup so a stale release never
/// clobbers a newer holder.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  return redis.call("DEL", KEYS[1])
else
  return 0
end
"#;

/// One message as stored in a room's stream.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    /// Cache-assigned id; opaque, monotonic within the room.
    pub id: String,
    pub content: String,
    pub user_id: i64,
    pub timestamp: i64,
}

/// Handle to the shared routing keyspace. Cheap to clone; all clones share
/// one multiplexed connection that reconnects on its own.
#[derive(Clone)]
pub struct RoutingStore {
    conn: ConnectionManager,
    release: Arc<Script>,
}

impl RoutingStore {
    /// Connect with a bounded connect timeout. Commands issued while the
    /// link is down fail fast and succeed again after the manager
    /// re-establishes it.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(connect_timeout)
            .set_response_timeout(Duration::from_secs(5));
        let conn = client.get_connection_manager_with_config(config).await?;
        Ok(Self {
            conn,
            release: Arc::new(Script::new(RELEASE_SCRIPT)),
        })
    }

    // ── Sessions ─────────────────────────────────────────────────────────

    pub async fn put_session(&self, token: &str, email: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(keys::token(token), email, ttl_secs).await?;
        Ok(())
    }

    /// Resolve a token to the email it was issued for. Expired and unknown
    /// tokens are indistinguishable, both `None`.
    pub async fn get_session(&self, token: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let email: Option<String> = conn.get(keys::token(token)).await?;
        Ok(email)
    }

    // ── Connection registry ──────────────────────────────────────────────

    /// Record a freshly bound connection and its room subscriptions in one
    /// round trip.
    pub async fn register_connection(
        &self,
        conn_id: &str,
        user_id: i64,
        comet_id: &str,
        rooms: &[String],
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let user_id_field = user_id.to_string();
        let room_field = rooms.join(",");
        let fields: [(&str, &str); 3] = [
            ("comet_id", comet_id),
            ("user_id", user_id_field.as_str()),
            ("room_id", room_field.as_str()),
        ];
        let mut pipe = redis::pipe();
        for room in rooms {
            pipe.sadd(keys::room_connections(room), conn_id).ignore();
        }
        pipe.hset_multiple(keys::connection_info(conn_id), &fields)
            .ignore()
            .set(keys::user_online(user_id), conn_id)
            .ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    /// Remove a closed connection from every key it appears in. The
    /// `user:online` entry is released compare-and-delete so a replacement
    /// connection registered in the meantime survives.
    pub async fn unregister_connection(
        &self,
        conn_id: &str,
        user_id: i64,
        rooms: &[String],
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for room in rooms {
            pipe.srem(keys::room_connections(room), conn_id).ignore();
        }
        pipe.del(keys::connection_info(conn_id)).ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        let _: i32 = self
            .release
            .key(keys::user_online(user_id))
            .arg(conn_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Connection ids subscribed to a room, cluster-wide.
    pub async fn room_connections(&self, room_id: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(keys::room_connections(room_id)).await?;
        Ok(members)
    }

    /// The owning edge address for a connection, if it still exists.
    pub async fn connection_comet(&self, conn_id: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let comet: Option<String> = conn.hget(keys::connection_info(conn_id), "comet_id").await?;
        Ok(comet)
    }

    // ── Dedup / cooldown / lock ──────────────────────────────────────────

    /// First-writer-wins marker for `(room, msgId)`. `true` means this
    /// caller owns the record.
    pub async fn try_dedup(&self, room_id: &str, msg_id: &str, ttl_secs: u64) -> Result<bool> {
        self.set_nx_ex(&keys::msg_processed(room_id, msg_id), "1", ttl_secs)
            .await
    }

    /// Per-room rate limit marker. `true` means the room is clear to
    /// broadcast.
    pub async fn try_cooldown(&self, room_id: &str, ttl_secs: u64) -> Result<bool> {
        self.set_nx_ex(&keys::room_cooldown(room_id), "1", ttl_secs)
            .await
    }

    /// Take the per-room dispatch lock. The TTL bounds how long a crashed
    /// consumer can stall the room.
    pub async fn acquire_lock(&self, room_id: &str, holder: &str, ttl_secs: u64) -> Result<bool> {
        self.set_nx_ex(&keys::lock_broadcast(room_id), holder, ttl_secs)
            .await
    }

    /// Release the dispatch lock if `holder` still owns it. A lock that
    /// expired and was re-acquired by someone else is left alone.
    pub async fn release_lock(&self, room_id: &str, holder: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let released: i32 = self
            .release
            .key(keys::lock_broadcast(room_id))
            .arg(holder)
            .invoke_async(&mut conn)
            .await?;
        if released == 0 {
            debug!(room_id, "stale lock release ignored");
        }
        Ok(released == 1)
    }

    /// Take the cluster-wide persister lock for one tick.
    pub async fn acquire_persist_lock(&self, holder: &str, ttl_secs: u64) -> Result<bool> {
        self.set_nx_ex(keys::LOCK_MSG_PERSIST, holder, ttl_secs)
            .await
    }

    /// Release the persister lock if `holder` still owns it.
    pub async fn release_persist_lock(&self, holder: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let released: i32 = self
            .release
            .key(keys::LOCK_MSG_PERSIST)
            .arg(holder)
            .invoke_async(&mut conn)
            .await?;
        Ok(released == 1)
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(set.is_some())
    }

    // ── Message stream cache ─────────────────────────────────────────────

    /// Append one message to the room stream; the returned id is the
    /// message's identity everywhere downstream.
    pub async fn stream_append(
        &self,
        room_id: &str,
        content: &str,
        user_id: i64,
        timestamp: i64,
    ) -> Result<String> {
        let mut conn = self.conn.clone();
        let user_id = user_id.to_string();
        let timestamp = timestamp.to_string();
        let fields: [(&str, &str); 3] = [
            ("content", content),
            ("user_id", user_id.as_str()),
            ("timestamp", timestamp.as_str()),
        ];
        let id: String = conn.xadd(keys::stream(room_id), "*", &fields).await?;
        Ok(id)
    }

    /// Newest-first page of the room stream. With a cursor the range is
    /// exclusive below it, so the page picks up strictly older entries.
    pub async fn stream_revrange(
        &self,
        room_id: &str,
        cursor: Option<&str>,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut conn = self.conn.clone();
        let end = match cursor {
            Some(c) => format!("({c}"),
            None => "+".to_string(),
        };
        let reply: StreamRangeReply = conn
            .xrevrange_count(keys::stream(room_id), end, "-", count)
            .await?;
        let mut entries = Vec::with_capacity(reply.ids.len());
        for row in reply.ids {
            let content: String = row.get("content").unwrap_or_default();
            let user_id: i64 = row.get("user_id").unwrap_or_default();
            let timestamp: i64 = row.get("timestamp").unwrap_or_default();
            entries.push(StreamEntry {
                id: row.id,
                content,
                user_id,
                timestamp,
            });
        }
        Ok(entries)
    }

    // ── Durable-write queue ──────────────────────────────────────────────

    /// Enqueue a serialised record for the batch persister (tail push; the
    /// persister consumes from the head, preserving append order).
    pub async fn queue_push(&self, record: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(keys::MSG_PERSIST_QUEUE, record).await?;
        Ok(())
    }

    /// Read up to `count` records from the head without consuming them.
    pub async fn queue_peek(&self, count: usize) -> Result<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let records: Vec<String> = conn
            .lrange(keys::MSG_PERSIST_QUEUE, 0, count as isize - 1)
            .await?;
        Ok(records)
    }

    /// Drop the consumed prefix after a successful durable commit.
    pub async fn queue_trim(&self, consumed: usize) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .ltrim(keys::MSG_PERSIST_QUEUE, consumed as isize, -1)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_script_is_compare_and_delete() {
        assert!(RELEASE_SCRIPT.contains(r#"redis.call("GET", KEYS[1]) == ARGV[1]"#));
        assert!(RELEASE_SCRIPT.contains(r#"redis.call("DEL", KEYS[1])"#));
    }

    #[test]
    fn revrange_cursor_is_exclusive() {
        // The cursor form handed to XREVRANGE must use the exclusive-range
        // prefix, otherwise pages overlap by one message.
        let cursor = Some("1700000000000-0");
        let end = match cursor {
            Some(c) => format!("({c}"),
            None => "+".to_string(),
        };
        assert_eq!(end, "(1700000000000-0");
    }
}
