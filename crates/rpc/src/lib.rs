//! gRPC and partitioned-log wire types.
//!
//! The IDL lives in `proto/comet.proto`; `generated.rs` is the checked-in
//! prost/tonic output so builds never need a protoc toolchain. This crate
//! adds only the protocol constants the processes agree on.

mod generated;
mod producer;

pub use generated::{
    BroadcastRoomReply, BroadcastRoomReq, Proto, PushMsg, comet_client, comet_server, push_msg,
};
pub use producer::LogProducer;

/// Version stamped into every [`Proto`] frame.
pub const PROTO_VER: i32 = 1;

/// Operation codes carried in [`Proto::op`] and [`PushMsg::operation`].
pub mod ops {
    /// A room message pushed from server to clients.
    pub const SEND_MSG_REPLY: i32 = 5;
}

impl Proto {
    /// Frame a broadcast payload (the JSON text of a `serverMessages`
    /// envelope) for delivery.
    pub fn room_message(seq: i32, body: Vec<u8>) -> Self {
        Self {
            ver: PROTO_VER,
            op: ops::SEND_MSG_REPLY,
            seq,
            body,
        }
    }
}

impl PushMsg {
    /// Build the log record for a room send originating on `server`
    /// (empty for logic-originated sends).
    pub fn room_send(server: impl Into<String>, room: impl Into<String>, msg: Vec<u8>) -> Self {
        Self {
            r#type: push_msg::Type::Room as i32,
            operation: ops::SEND_MSG_REPLY,
            server: server.into(),
            room: room.into(),
            msg,
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, prost::Message};

    #[test]
    fn push_msg_survives_the_log() {
        let record = PushMsg::room_send("10.0.0.5:8082", "0001", b"{\"type\":\"x\"}".to_vec());
        let bytes = record.encode_to_vec();
        let decoded = PushMsg::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.r#type(), push_msg::Type::Room);
        assert_eq!(decoded.server, "10.0.0.5:8082");
        assert_eq!(decoded.room, "0001");
        assert_eq!(decoded.msg, record.msg);
    }

    #[test]
    fn logic_sends_have_no_origin_server() {
        let record = PushMsg::room_send("", "0002", vec![]);
        assert!(record.server.is_empty());
        assert_eq!(record.operation, ops::SEND_MSG_REPLY);
    }
}
