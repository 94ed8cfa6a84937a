use std::{collections::HashMap, time::Duration};

use {
    tokio::sync::Mutex,
    tonic::transport::{Channel, Endpoint},
    tracing::{debug, warn},
};

use parley_rpc::{BroadcastRoomReq, Proto, comet_client::CometClient};

/// gRPC stubs to edge nodes, pooled per advertised address. A failed call
/// evicts the stub so the next fan-out redials instead of reusing a dead
/// channel.
pub struct CometPool {
    clients: Mutex<HashMap<String, CometClient<Channel>>>,
    connect_timeout: Duration,
    call_deadline: Duration,
}

impl CometPool {
    pub fn new(connect_timeout: Duration, call_deadline: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            connect_timeout,
            call_deadline,
        }
    }

    /// Invoke `BroadcastRoom` on one edge. Timeouts and transport errors
    /// come back as `Err`; the caller counts them, it does not retry.
    pub async fn broadcast_room(
        &self,
        edge_addr: &str,
        room_id: &str,
        proto: Proto,
    ) -> anyhow::Result<()> {
        let mut client = self.client_for(edge_addr).await?;
        let request = BroadcastRoomReq {
            roomid: room_id.to_string(),
            proto: Some(proto),
        };
        match client.broadcast_room(request).await {
            Ok(_) => {
                debug!(edge = %edge_addr, room_id, "broadcast ok");
                Ok(())
            },
            Err(status) => {
                self.evict(edge_addr).await;
                Err(anyhow::anyhow!("broadcast to {edge_addr} failed: {status}"))
            },
        }
    }

    async fn client_for(&self, edge_addr: &str) -> anyhow::Result<CometClient<Channel>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(edge_addr) {
            return Ok(client.clone());
        }
        let endpoint = Endpoint::from_shared(format!("http://{edge_addr}"))?
            .connect_timeout(self.connect_timeout)
            .timeout(self.call_deadline);
        let channel = match endpoint.connect().await {
            Ok(c) => c,
            Err(e) => {
                warn!(edge = %edge_addr, error = %e, "edge unreachable");
                return Err(e.into());
            },
        };
        let client = CometClient::new(channel);
        clients.insert(edge_addr.to_string(), client.clone());
        Ok(client)
    }

    async fn evict(&self, edge_addr: &str) {
        self.clients.lock().await.remove(edge_addr);
    }
}

/// Group resolved connections by their owning edge:
/// `(connId, comet_id)` pairs → `{edgeAddr: [connId…]}`. Connections whose
/// info hash already expired resolve to `None` and are dropped.
pub fn group_by_edge(resolved: Vec<(String, Option<String>)>) -> HashMap<String, Vec<String>> {
    let mut by_edge: HashMap<String, Vec<String>> = HashMap::new();
    for (conn_id, comet) in resolved {
        let Some(comet) = comet else { continue };
        by_edge.entry(comet).or_default().push(conn_id);
    }
    by_edge
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouping_collects_connections_per_edge() {
        let resolved = vec![
            ("c1".to_string(), Some("10.0.0.1:8082".to_string())),
            ("c2".to_string(), Some("10.0.0.2:8082".to_string())),
            ("c3".to_string(), Some("10.0.0.1:8082".to_string())),
        ];
        let grouped = group_by_edge(resolved);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["10.0.0.1:8082"], ["c1", "c3"]);
        assert_eq!(grouped["10.0.0.2:8082"], ["c2"]);
    }

    #[test]
    fn stale_connections_are_dropped_from_the_route() {
        let resolved = vec![
            ("gone".to_string(), None),
            ("live".to_string(), Some("10.0.0.1:8082".to_string())),
        ];
        let grouped = group_by_edge(resolved);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped["10.0.0.1:8082"], ["live"]);
    }
}
