//! Chat wire protocol definitions.
//!
//! All client ↔ edge communication uses JSON envelopes over WebSocket:
//! `{"type": <tag>, "payload": <object>}`.
//!
//! Tags:
//! - `hello`               — client → edge greeting; edge replies with a snapshot
//! - `clientMessages`      — client → edge send request
//! - `serverMessages`      — edge → client broadcast delivery
//! - `requestRoomHistory`  — client → edge history page request
//! - `room_history`        — edge → client history page reply

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

/// Largest accepted text frame payload.
pub const MAX_PAYLOAD_BYTES: usize = 65_536; // 64 KB

/// Session token lifetime (`token → email` in the routing store).
pub const SESSION_TTL_SECS: u64 = 86_400; // 24 h

/// At-most-one broadcast per `(room, msgId)` within this window.
pub const DEDUP_TTL_SECS: u64 = 60;

/// At-most-one broadcast per room within this window.
pub const COOLDOWN_TTL_SECS: u64 = 1;

/// Per-room dispatch lock lifetime; bounds consumer stalls.
pub const LOCK_TTL_SECS: u64 = 5;

/// Messages served per room in the hello snapshot and per history page.
pub const HISTORY_PAGE_SIZE: usize = 20;

/// WebSocket close code for malformed frames.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// WebSocket close code for failed token resolution.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

pub const CLOSE_REASON_TOKEN: &str = "token validation failed";

// ── Error ids ────────────────────────────────────────────────────────────────

/// The closed set of ids surfaced on public error responses.
pub mod error_ids {
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    pub const USERNAME_EXISTS: &str = "USERNAME_EXISTS";
    pub const EMAIL_EXISTS: &str = "EMAIL_EXISTS";
    pub const LOGIN_FAILED: &str = "LOGIN_FAILED";
}

/// Body of every HTTP 4xx and of the `error` envelope on WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub id: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
        }
    }
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// Raw JSON envelope. Decoded in two steps so that an unknown tag can be
/// told apart from a malformed frame: the former is ignored, the latter
/// closes the connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub r#type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(tag: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            r#type: tag.into(),
            payload,
        }
    }
}

pub mod tags {
    pub const HELLO: &str = "hello";
    pub const CLIENT_MESSAGES: &str = "clientMessages";
    pub const SERVER_MESSAGES: &str = "serverMessages";
    pub const REQUEST_ROOM_HISTORY: &str = "requestRoomHistory";
    pub const ROOM_HISTORY: &str = "room_history";
    pub const ERROR: &str = "error";
}

// ── Wire objects ─────────────────────────────────────────────────────────────

/// User object as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireUser {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub avatar: String,
}

/// A message inside a room snapshot or history page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMessage {
    pub id: String,
    pub content: String,
    pub timestamp: i64,
    pub user: WireUser,
}

/// Payload of `serverMessages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMessage {
    pub id: String,
    pub content: String,
    pub timestamp: i64,
    pub room_id: String,
    pub user: WireUser,
}

/// One room inside the hello snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub id: String,
    pub name: String,
    pub users: Vec<WireUser>,
    pub messages: Vec<SnapshotMessage>,
}

/// Payload of the hello reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloSnapshot {
    pub user: WireUser,
    pub rooms: Vec<RoomSnapshot>,
}

/// Payload of `clientMessages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessages {
    #[serde(rename = "roomId")]
    pub room_id: String,
    pub content: String,
    /// Client clock hint; the server always re-stamps in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Payload of `requestRoomHistory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRoomHistory {
    pub room_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<String>,
}

/// Payload of `room_history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomHistory {
    pub room_id: String,
    pub messages: Vec<SnapshotMessage>,
    pub has_more: bool,
}

// ── Client frame dispatch ────────────────────────────────────────────────────

/// A decoded client → edge frame.
#[derive(Debug, Clone)]
pub enum ClientFrame {
    Hello,
    ClientMessages(ClientMessages),
    RequestRoomHistory(RequestRoomHistory),
}

/// Why a client frame could not be dispatched.
#[derive(Debug)]
pub enum FrameError {
    /// Not valid JSON, missing `type`, or a known tag with a bad payload.
    /// Closes the connection with 1002.
    Malformed(String),
    /// Valid envelope with an unrecognised tag. Logged and ignored.
    UnknownTag(String),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "malformed frame: {e}"),
            Self::UnknownTag(tag) => write!(f, "unknown frame type: {tag}"),
        }
    }
}

impl ClientFrame {
    /// Decode a text frame into a dispatchable client frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;
        match envelope.r#type.as_str() {
            tags::HELLO => Ok(Self::Hello),
            tags::CLIENT_MESSAGES => serde_json::from_value(envelope.payload)
                .map(Self::ClientMessages)
                .map_err(|e| FrameError::Malformed(e.to_string())),
            tags::REQUEST_ROOM_HISTORY => serde_json::from_value(envelope.payload)
                .map(Self::RequestRoomHistory)
                .map_err(|e| FrameError::Malformed(e.to_string())),
            other => Err(FrameError::UnknownTag(other.to_string())),
        }
    }
}

// ── Envelope constructors ────────────────────────────────────────────────────

/// Serialize a `serverMessages` envelope to its JSON text form. This is the
/// exact byte sequence carried in `proto.body` across the gRPC fan-out.
pub fn server_messages_json(msg: &ServerMessage) -> serde_json::Result<String> {
    serde_json::to_string(&Envelope::new(
        tags::SERVER_MESSAGES,
        serde_json::to_value(msg)?,
    ))
}

pub fn hello_json(snapshot: &HelloSnapshot) -> serde_json::Result<String> {
    serde_json::to_string(&Envelope::new(tags::HELLO, serde_json::to_value(snapshot)?))
}

pub fn room_history_json(page: &RoomHistory) -> serde_json::Result<String> {
    serde_json::to_string(&Envelope::new(
        tags::ROOM_HISTORY,
        serde_json::to_value(page)?,
    ))
}

pub fn error_json(body: &ErrorBody) -> serde_json::Result<String> {
    serde_json::to_string(&Envelope::new(tags::ERROR, serde_json::to_value(body)?))
}

// ── Logic ingress ────────────────────────────────────────────────────────────

/// Body of `POST /logic/send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "userName")]
    pub user_name: String,
    pub messages: Vec<SendBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendBody {
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_parses_wire_shape() {
        let text = r#"{"type":"clientMessages","payload":{"roomId":"0001","content":"hi","timestamp":1700000000000}}"#;
        match ClientFrame::parse(text) {
            Ok(ClientFrame::ClientMessages(m)) => {
                assert_eq!(m.room_id, "0001");
                assert_eq!(m.content, "hi");
                assert_eq!(m.timestamp, Some(1_700_000_000_000));
            },
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn hello_with_empty_payload_parses() {
        assert!(matches!(
            ClientFrame::parse(r#"{"type":"hello","payload":{}}"#),
            Ok(ClientFrame::Hello)
        ));
        // Missing payload entirely is also fine for hello.
        assert!(matches!(
            ClientFrame::parse(r#"{"type":"hello"}"#),
            Ok(ClientFrame::Hello)
        ));
    }

    #[test]
    fn unknown_tag_is_not_malformed() {
        match ClientFrame::parse(r#"{"type":"typing","payload":{}}"#) {
            Err(FrameError::UnknownTag(tag)) => assert_eq!(tag, "typing"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn invalid_json_and_missing_type_are_malformed() {
        assert!(matches!(
            ClientFrame::parse("{nope"),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            ClientFrame::parse(r#"{"payload":{}}"#),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn known_tag_with_bad_payload_is_malformed() {
        assert!(matches!(
            ClientFrame::parse(r#"{"type":"clientMessages","payload":{"content":42}}"#),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn server_messages_envelope_matches_delivery_shape() {
        let msg = ServerMessage {
            id: "1700000000000-0".into(),
            content: "hi".into(),
            timestamp: 1_700_000_000,
            room_id: "0001".into(),
            user: WireUser {
                id: 7,
                username: "alice".into(),
                avatar: String::new(),
            },
        };
        let json = server_messages_json(&msg).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["type"], "serverMessages");
        assert_eq!(v["payload"]["room_id"], "0001");
        assert_eq!(v["payload"]["id"], "1700000000000-0");
        assert_eq!(v["payload"]["user"]["username"], "alice");
    }

    #[test]
    fn room_history_round_trips_cursor_ids_verbatim() {
        let page = RoomHistory {
            room_id: "0001".into(),
            messages: vec![SnapshotMessage {
                id: "1700000000123-4".into(),
                content: "x".into(),
                timestamp: 1_700_000_000,
                user: WireUser {
                    id: 1,
                    username: "bob".into(),
                    avatar: String::new(),
                },
            }],
            has_more: true,
        };
        let json = room_history_json(&page).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.r#type, tags::ROOM_HISTORY);
        let parsed: RoomHistory = serde_json::from_value(back.payload).unwrap();
        assert_eq!(parsed.messages[0].id, "1700000000123-4");
        assert!(parsed.has_more);
    }

    #[test]
    fn send_request_uses_camel_case_keys() {
        let body = r#"{"roomId":"0001","userId":3,"userName":"carol","messages":[{"content":"yo"}]}"#;
        let req: SendRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.room_id, "0001");
        assert_eq!(req.user_id, 3);
        assert_eq!(req.messages.len(), 1);
    }
}
