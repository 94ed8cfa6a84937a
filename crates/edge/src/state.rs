use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    metrics::counter,
    tokio::sync::{RwLock, mpsc},
    tracing::debug,
};

use {
    parley_routing::RoutingStore,
    parley_rpc::LogProducer,
    parley_store::{AuthService, TieredStore, User, UserRepo},
};

use crate::topics::RoomTopics;

/// A frame headed for one connection's write loop.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A serialized JSON envelope, sent as a text frame.
    Frame(String),
    /// Close the socket with the given code and reason, then stop.
    Close { code: u16, reason: String },
}

/// One live, authenticated WebSocket connection. The registry exclusively
/// owns these; everything else refers to a connection by its id.
pub struct ConnectionEntry {
    pub conn_id: String,
    pub user: User,
    pub sender: mpsc::UnboundedSender<Outbound>,
    /// Rooms this connection joined at handshake, mirrored in the routing
    /// store until close.
    pub rooms: Vec<String>,
}

/// Shared edge runtime state, wrapped in Arc for use across async tasks.
pub struct EdgeState {
    /// All live connections, keyed by conn_id.
    pub conns: RwLock<HashMap<String, ConnectionEntry>>,
    /// The one live connection per user on this edge.
    pub online: RwLock<HashMap<i64, String>>,
    /// In-process room pub/sub table.
    pub topics: RoomTopics,

    pub auth: AuthService,
    pub users: UserRepo,
    pub tiered: TieredStore,
    pub routing: RoutingStore,
    pub producer: LogProducer,

    /// This edge's advertised gRPC address; its identity in
    /// `connection:info` and in `PushMsg.server`.
    pub server_id: String,
    pub history_page_size: usize,
    pub idle_timeout: Duration,
    pub session_ttl_secs: u64,
}

impl EdgeState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        auth: AuthService,
        users: UserRepo,
        tiered: TieredStore,
        routing: RoutingStore,
        producer: LogProducer,
        server_id: String,
        history_page_size: usize,
        idle_timeout: Duration,
        session_ttl_secs: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            conns: RwLock::new(HashMap::new()),
            online: RwLock::new(HashMap::new()),
            topics: RoomTopics::new(),
            auth,
            users,
            tiered,
            routing,
            producer,
            server_id,
            history_page_size,
            idle_timeout,
            session_ttl_secs,
        })
    }

    /// Register a connection, kicking any previous connection the same
    /// user holds on this edge. Returns the replaced conn_id, if any.
    pub async fn register(&self, entry: ConnectionEntry) -> Option<String> {
        let conn_id = entry.conn_id.clone();
        let user_id = entry.user.id;

        let replaced = {
            let mut online = self.online.write().await;
            online.insert(user_id, conn_id.clone())
        };
        if let Some(old_id) = &replaced {
            let conns = self.conns.read().await;
            if let Some(old) = conns.get(old_id) {
                let _ = old.sender.send(Outbound::Close {
                    code: 1000,
                    reason: "replaced by newer connection".into(),
                });
            }
        }
        self.conns.write().await.insert(conn_id, entry);
        replaced
    }

    /// Remove a closed connection. Topic subscriptions are only torn down
    /// when this connection is still the user's live one, so a replacement
    /// registered in the meantime keeps its subscriptions.
    pub async fn remove(&self, conn_id: &str) -> Option<ConnectionEntry> {
        let entry = self.conns.write().await.remove(conn_id)?;
        let still_live = {
            let mut online = self.online.write().await;
            match online.get(&entry.user.id) {
                Some(current) if current == conn_id => {
                    online.remove(&entry.user.id);
                    true
                },
                _ => false,
            }
        };
        if still_live {
            self.topics.unsubscribe_all(entry.user.id).await;
        }
        Some(entry)
    }

    /// Deliver a pre-serialized frame to every local subscriber of a room,
    /// optionally excluding one user's connections. The subscriber set and
    /// senders are snapshotted under the locks; sends happen outside.
    pub async fn publish_local(&self, room_id: &str, frame: &str, exclude_user: Option<i64>) {
        let subscribers = self.topics.subscribers(room_id).await;
        if subscribers.is_empty() {
            return;
        }

        let senders: Vec<mpsc::UnboundedSender<Outbound>> = {
            let online = self.online.read().await;
            let conns = self.conns.read().await;
            subscribers
                .iter()
                .filter(|uid| Some(**uid) != exclude_user)
                .filter_map(|uid| online.get(uid))
                .filter_map(|cid| conns.get(cid))
                .map(|entry| entry.sender.clone())
                .collect()
        };

        let mut delivered = 0u64;
        let mut dropped = 0u64;
        for sender in senders {
            if sender.send(Outbound::Frame(frame.to_string())).is_ok() {
                delivered += 1;
            } else {
                // Subscriber disconnected between snapshot and send.
                dropped += 1;
            }
        }
        counter!("edge_publish_delivered_total").increment(delivered);
        counter!("edge_publish_dropped_total").increment(dropped);
        debug!(room_id, delivered, dropped, "local publish");
    }
}
