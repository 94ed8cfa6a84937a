//! Keyspace layout. Every key the platform writes is built here so the
//! layout can be read in one place.

/// Session token → email, expires with the session TTL.
pub fn token(token: &str) -> String {
    format!("token:{token}")
}

/// Append-only message stream for a room's recent history.
pub fn stream(room_id: &str) -> String {
    format!("stream:{room_id}")
}

/// Set of connection ids currently subscribed to a room, cluster-wide.
pub fn room_connections(room_id: &str) -> String {
    format!("room:connections:{room_id}")
}

/// Hash describing one connection: `comet_id`, `user_id`, `room_id`.
pub fn connection_info(conn_id: &str) -> String {
    format!("connection:info:{conn_id}")
}

/// The live connection id for a user on some edge.
pub fn user_online(user_id: i64) -> String {
    format!("user:online:{user_id}")
}

/// First-writer-wins marker keeping a record from being broadcast twice.
pub fn msg_processed(room_id: &str, msg_id: &str) -> String {
    format!("msg:processed:{room_id}:{msg_id}")
}

/// Per-room broadcast rate limit marker.
pub fn room_cooldown(room_id: &str) -> String {
    format!("room:cooldown:{room_id}")
}

/// Per-room dispatch lock serialising fan-out across consumers.
pub fn lock_broadcast(room_id: &str) -> String {
    format!("lock:broadcast:{room_id}")
}

/// List (head-at-left) of records awaiting bulk insertion into the
/// durable store.
pub const MSG_PERSIST_QUEUE: &str = "msg_persist_queue";

/// Lock serialising persister ticks across processes. Without it two
/// persisters could trim each other's unprocessed queue prefix.
pub const LOCK_MSG_PERSIST: &str = "lock:msg_persist";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_match_the_wire_layout() {
        assert_eq!(token("abc"), "token:abc");
        assert_eq!(stream("0001"), "stream:0001");
        assert_eq!(room_connections("0001"), "room:connections:0001");
        assert_eq!(connection_info("c-1"), "connection:info:c-1");
        assert_eq!(user_online(42), "user:online:42");
        assert_eq!(
            msg_processed("0001", "1700000000000-0"),
            "msg:processed:0001:1700000000000-0"
        );
        assert_eq!(room_cooldown("0001"), "room:cooldown:0001");
        assert_eq!(lock_broadcast("0001"), "lock:broadcast:0001");
    }
}
