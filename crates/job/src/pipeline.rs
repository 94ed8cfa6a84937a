use std::sync::atomic::{AtomicI32, Ordering};

use {
    prost::Message,
    tracing::{debug, warn},
};

use {
    parley_protocol::{COOLDOWN_TTL_SECS, DEDUP_TTL_SECS, Envelope, LOCK_TTL_SECS, tags},
    parley_routing::RoutingStore,
    parley_rpc::{Proto, PushMsg},
};

use crate::fanout::{CometPool, group_by_edge};

/// What became of one log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Fan-out ran; counts are per-edge.
    Broadcast { edges_ok: usize, edges_failed: usize },
    /// Record could not be decoded or carried no message id.
    DroppedDecode,
    /// Another consumer already handled this `(room, msgId)`.
    DroppedDuplicate,
    /// The room broadcast within the cooldown window.
    DroppedCooldown,
    /// Another worker holds the room's dispatch lock right now.
    DroppedLocked,
    /// No edge currently holds a subscriber for the room.
    DroppedEmptyRoute,
}

/// The per-record pipeline, shared by all workers.
pub struct Pipeline {
    routing: RoutingStore,
    pool: CometPool,
    seq: AtomicI32,
}

impl Pipeline {
    pub fn new(routing: RoutingStore, pool: CometPool) -> Self {
        Self {
            routing,
            pool,
            seq: AtomicI32::new(0),
        }
    }

    /// Decode → dedup → cooldown → lock → resolve → fan out → release.
    pub async fn handle_record(&self, payload: &[u8]) -> Outcome {
        let Ok(push) = PushMsg::decode(payload) else {
            return Outcome::DroppedDecode;
        };
        let room_id = push.room.clone();
        let Some(msg_id) = envelope_msg_id(&push.msg) else {
            return Outcome::DroppedDecode;
        };

        // Dedup is fail-closed: with the store down we cannot prove the
        // record is fresh, and re-broadcasting during an outage amplifies.
        match self.routing.try_dedup(&room_id, &msg_id, DEDUP_TTL_SECS).await {
            Ok(true) => {},
            Ok(false) => return Outcome::DroppedDuplicate,
            Err(e) => {
                warn!(room_id = %room_id, error = %e, "dedup unavailable, treating as duplicate");
                return Outcome::DroppedDuplicate;
            },
        }

        // Cooldown is fail-open: losing the rate limit briefly is better
        // than dropping everything while the store flaps.
        match self.routing.try_cooldown(&room_id, COOLDOWN_TTL_SECS).await {
            Ok(true) => {},
            Ok(false) => return Outcome::DroppedCooldown,
            Err(e) => {
                warn!(room_id = %room_id, error = %e, "cooldown unavailable, proceeding");
            },
        }

        let holder = uuid::Uuid::new_v4().to_string();
        match self
            .routing
            .acquire_lock(&room_id, &holder, LOCK_TTL_SECS)
            .await
        {
            Ok(true) => {},
            Ok(false) | Err(_) => return Outcome::DroppedLocked,
        }

        let outcome = self.fan_out(&push, &room_id).await;

        if let Err(e) = self.routing.release_lock(&room_id, &holder).await {
            warn!(room_id = %room_id, error = %e, "lock release failed");
        }
        outcome
    }

    async fn fan_out(&self, push: &PushMsg, room_id: &str) -> Outcome {
        let conn_ids = match self.routing.room_connections(room_id).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(room_id = %room_id, error = %e, "route resolution failed");
                return Outcome::DroppedEmptyRoute;
            },
        };

        let mut resolved = Vec::with_capacity(conn_ids.len());
        for conn_id in conn_ids {
            match self.routing.connection_comet(&conn_id).await {
                Ok(comet) => resolved.push((conn_id, comet)),
                Err(e) => warn!(conn_id = %conn_id, error = %e, "connection info lookup failed"),
            }
        }

        let by_edge = group_by_edge(resolved);
        let targets: Vec<&String> = by_edge
            .keys()
            .filter(|edge| !is_origin_edge(edge, &push.server))
            .collect();
        if targets.is_empty() {
            return Outcome::DroppedEmptyRoute;
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut edges_ok = 0;
        let mut edges_failed = 0;
        for edge in targets {
            let proto = Proto::room_message(seq, push.msg.clone());
            match self.pool.broadcast_room(edge, room_id, proto).await {
                Ok(()) => edges_ok += 1,
                Err(e) => {
                    // Best-effort: other edges still receive; the dedup
                    // marker keeps a retry storm from forming.
                    warn!(room_id, edge = %edge, error = %e, "edge fan-out failed");
                    edges_failed += 1;
                },
            }
        }
        debug!(room_id, edges_ok, edges_failed, "fan-out complete");
        Outcome::Broadcast {
            edges_ok,
            edges_failed,
        }
    }
}

/// The edge that originated a send already delivered to its own
/// subscribers; fanning back to it would double-deliver.
fn is_origin_edge(edge: &str, origin: &str) -> bool {
    !origin.is_empty() && edge == origin
}

/// The message id for dedup lives inside the carried `serverMessages`
/// envelope.
fn envelope_msg_id(body: &[u8]) -> Option<String> {
    let envelope: Envelope = serde_json::from_slice(body).ok()?;
    if envelope.r#type != tags::SERVER_MESSAGES {
        return None;
    }
    envelope
        .payload
        .get("id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_id_comes_from_the_inner_envelope() {
        let body = br#"{"type":"serverMessages","payload":{"id":"1700000000000-0","content":"hi","timestamp":100,"room_id":"0001","user":{"id":1,"username":"a","avatar":""}}}"#;
        assert_eq!(
            envelope_msg_id(body).as_deref(),
            Some("1700000000000-0")
        );
    }

    #[test]
    fn undecodable_bodies_yield_no_id() {
        assert_eq!(envelope_msg_id(b"junk"), None);
        assert_eq!(envelope_msg_id(br#"{"type":"hello","payload":{}}"#), None);
        assert_eq!(
            envelope_msg_id(br#"{"type":"serverMessages","payload":{}}"#),
            None
        );
    }

    #[test]
    fn origin_edge_is_skipped_only_when_set() {
        assert!(is_origin_edge("10.0.0.1:8082", "10.0.0.1:8082"));
        assert!(!is_origin_edge("10.0.0.2:8082", "10.0.0.1:8082"));
        // Logic-originated records have no origin; every edge receives.
        assert!(!is_origin_edge("10.0.0.1:8082", ""));
    }
}
