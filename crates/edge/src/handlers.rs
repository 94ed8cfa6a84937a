use std::{collections::HashMap, sync::Arc};

use {metrics::counter, tracing::warn};

use {
    parley_common::now_seconds,
    parley_protocol::{
        ClientMessages, HelloSnapshot, RequestRoomHistory, RoomHistory, RoomSnapshot,
        ServerMessage, SnapshotMessage, WireUser, hello_json, room_history_json,
        server_messages_json,
    },
    parley_rpc::PushMsg,
    parley_store::{HistoryEntry, NewMessage, User},
};

use crate::state::EdgeState;

pub fn wire_user(user: &User) -> WireUser {
    WireUser {
        id: user.id,
        username: user.username.clone(),
        avatar: String::new(),
    }
}

fn placeholder_user(id: i64) -> WireUser {
    WireUser {
        id,
        username: "unknown".into(),
        avatar: String::new(),
    }
}

/// Look up the wire users for a set of history entries, one query per
/// distinct sender. Senders that vanished from the durable store get a
/// placeholder rather than failing the page.
async fn resolve_senders(
    state: &Arc<EdgeState>,
    entries: &[HistoryEntry],
) -> HashMap<i64, WireUser> {
    let mut resolved = HashMap::new();
    for entry in entries {
        if resolved.contains_key(&entry.user_id) {
            continue;
        }
        let user = match state.users.find_by_id(entry.user_id).await {
            Ok(Some(u)) => wire_user(&u),
            Ok(None) => placeholder_user(entry.user_id),
            Err(e) => {
                warn!(user_id = entry.user_id, error = %e, "sender lookup failed");
                placeholder_user(entry.user_id)
            },
        };
        resolved.insert(entry.user_id, user);
    }
    resolved
}

fn snapshot_messages(
    entries: Vec<HistoryEntry>,
    senders: &HashMap<i64, WireUser>,
) -> Vec<SnapshotMessage> {
    entries
        .into_iter()
        .map(|e| SnapshotMessage {
            user: senders
                .get(&e.user_id)
                .cloned()
                .unwrap_or_else(|| placeholder_user(e.user_id)),
            id: e.id,
            content: e.content,
            timestamp: e.timestamp,
        })
        .collect()
}

/// Build the hello snapshot: the bound user, every room on this edge, and
/// each room's recent messages.
pub async fn hello_snapshot(state: &Arc<EdgeState>, user: &User) -> anyhow::Result<String> {
    let rooms = state.topics.room_list().await;
    let mut snapshots = Vec::with_capacity(rooms.len());
    for (id, name) in rooms {
        let page = state
            .tiered
            .room_history_tiered(&id, None, state.history_page_size)
            .await?;
        let senders = resolve_senders(state, &page.entries).await;
        snapshots.push(RoomSnapshot {
            id,
            name,
            users: Vec::new(),
            messages: snapshot_messages(page.entries, &senders),
        });
    }
    let snapshot = HelloSnapshot {
        user: wire_user(user),
        rooms: snapshots,
    };
    Ok(hello_json(&snapshot)?)
}

/// The send path: stamp, store, deliver locally, then emit onto the log
/// for cross-edge fan-out.
///
/// An error here means the message was not stored; the caller reports that
/// to the sender. A failed produce after a successful store is only
/// logged: local subscribers already have the message and re-sending would
/// duplicate it for them.
pub async fn handle_client_send(
    state: &Arc<EdgeState>,
    user: &User,
    req: ClientMessages,
) -> anyhow::Result<()> {
    // Client timestamps (often milliseconds) are hints only.
    let timestamp = now_seconds();
    let stored = state
        .tiered
        .store_tiered(
            &req.room_id,
            vec![NewMessage {
                content: req.content,
                user_id: user.id,
                timestamp,
            }],
        )
        .await?;
    let Some(msg) = stored.into_iter().next() else {
        return Ok(());
    };

    let envelope = ServerMessage {
        id: msg.id,
        content: msg.content,
        timestamp: msg.timestamp,
        room_id: req.room_id.clone(),
        user: wire_user(user),
    };
    let frame = server_messages_json(&envelope)?;

    state.publish_local(&req.room_id, &frame, None).await;

    let push = PushMsg::room_send(
        state.server_id.clone(),
        req.room_id.clone(),
        frame.into_bytes(),
    );
    if let Err(e) = state.producer.send_room(&push).await {
        counter!("edge_produce_failed_total").increment(1);
        warn!(room_id = %req.room_id, error = %e, "cross-edge produce failed");
    }
    Ok(())
}

/// Serve one history page below the client's cursor.
pub async fn handle_history(
    state: &Arc<EdgeState>,
    req: RequestRoomHistory,
) -> anyhow::Result<String> {
    let page = state
        .tiered
        .room_history_tiered(
            &req.room_id,
            req.last_message_id.as_deref(),
            state.history_page_size,
        )
        .await?;
    let senders = resolve_senders(state, &page.entries).await;
    let body = RoomHistory {
        room_id: req.room_id,
        messages: snapshot_messages(page.entries, &senders),
        has_more: page.has_more,
    };
    Ok(room_history_json(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_user_carries_an_avatar_field() {
        let user = User {
            id: 3,
            username: "alice".into(),
            email: "a@x".into(),
        };
        let wire = wire_user(&user);
        assert_eq!(wire.id, 3);
        assert_eq!(wire.username, "alice");
        assert_eq!(wire.avatar, "");
    }

    #[test]
    fn snapshot_messages_fall_back_for_unknown_senders() {
        let entries = vec![HistoryEntry {
            id: "1-0".into(),
            content: "hi".into(),
            user_id: 99,
            timestamp: 100,
        }];
        let msgs = snapshot_messages(entries, &HashMap::new());
        assert_eq!(msgs[0].user.username, "unknown");
        assert_eq!(msgs[0].user.id, 99);
    }
}
