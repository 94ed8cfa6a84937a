use std::{net::SocketAddr, sync::Arc};

use {
    metrics::counter,
    tokio_util::sync::CancellationToken,
    tonic::{Request, Response, Status},
    tracing::{debug, info},
};

use {
    parley_protocol::{Envelope, ServerMessage, tags},
    parley_rpc::{
        BroadcastRoomReply, BroadcastRoomReq,
        comet_server::{Comet, CometServer},
    },
};

use crate::state::EdgeState;

/// gRPC surface the job dispatcher fans out through.
pub struct BroadcastService {
    state: Arc<EdgeState>,
}

impl BroadcastService {
    pub fn new(state: Arc<EdgeState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl Comet for BroadcastService {
    /// Deliver the framed payload to every local subscriber of the room,
    /// except connections bound to the sending user (they already got the
    /// message from their own edge). An empty subscriber set is still OK;
    /// only a framing failure is INTERNAL.
    async fn broadcast_room(
        &self,
        request: Request<BroadcastRoomReq>,
    ) -> Result<Response<BroadcastRoomReply>, Status> {
        let req = request.into_inner();
        let Some(proto) = req.proto else {
            return Err(Status::invalid_argument("missing proto frame"));
        };
        let op = proto.op;
        let body = String::from_utf8(proto.body)
            .map_err(|_| Status::internal("broadcast body is not utf-8"))?;

        let sender = sender_user_id(&body);
        self.state.publish_local(&req.roomid, &body, sender).await;

        counter!("edge_broadcast_rpc_total").increment(1);
        debug!(room_id = %req.roomid, op, "broadcast delivered");
        Ok(Response::new(BroadcastRoomReply {}))
    }
}

/// Pull the sending user's id out of the carried envelope so their own
/// connections can be skipped. Anything unexpected means no exclusion.
fn sender_user_id(body: &str) -> Option<i64> {
    let envelope: Envelope = serde_json::from_str(body).ok()?;
    if envelope.r#type != tags::SERVER_MESSAGES {
        return None;
    }
    let msg: ServerMessage = serde_json::from_value(envelope.payload).ok()?;
    Some(msg.user.id)
}

/// Run the gRPC server until cancelled.
pub async fn serve_grpc(
    state: Arc<EdgeState>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!(%addr, "grpc: listening");
    tonic::transport::Server::builder()
        .add_service(CometServer::new(BroadcastService::new(state)))
        .serve_with_shutdown(addr, shutdown.cancelled_owned())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_is_extracted_from_a_server_messages_envelope() {
        let body = r#"{"type":"serverMessages","payload":{"id":"1-0","content":"hi","timestamp":100,"room_id":"0001","user":{"id":42,"username":"alice","avatar":""}}}"#;
        assert_eq!(sender_user_id(body), Some(42));
    }

    #[test]
    fn non_message_bodies_exclude_nobody() {
        assert_eq!(sender_user_id("not json"), None);
        assert_eq!(sender_user_id(r#"{"type":"hello","payload":{}}"#), None);
        // A serverMessages tag with a mangled payload also excludes nobody.
        assert_eq!(
            sender_user_id(r#"{"type":"serverMessages","payload":{"id":1}}"#),
            None
        );
    }
}
