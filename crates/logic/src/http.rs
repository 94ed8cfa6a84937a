use std::sync::Arc;

use {
    axum::{
        Json, Router,
        extract::{State, rejection::JsonRejection},
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::post,
    },
    metrics::counter,
    tracing::warn,
};

use {
    parley_common::now_seconds,
    parley_protocol::{
        ErrorBody, SendRequest, ServerMessage, WireUser, error_ids, server_messages_json,
    },
    parley_rpc::{LogProducer, PushMsg},
    parley_store::{NewMessage, TieredStore},
};

/// Everything a send needs: the writer for id assignment and the producer
/// for fan-out.
pub struct LogicState {
    pub tiered: TieredStore,
    pub producer: LogProducer,
}

pub fn build_router(state: Arc<LogicState>) -> Router {
    Router::new()
        .route("/logic/send", post(send_handler))
        .with_state(state)
}

/// Accept a send on behalf of a user, wrap each message in a
/// `serverMessages` envelope, and emit it to the log. `server` is left
/// empty: there is no originating edge, so the job dispatcher fans out to
/// every edge holding subscribers.
async fn send_handler(
    State(state): State<Arc<LogicState>>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return bad_request("malformed request body");
    };
    if req.room_id.is_empty() || req.messages.is_empty() {
        return bad_request("roomId and messages are required");
    }

    let timestamp = now_seconds();
    let new_messages: Vec<NewMessage> = req
        .messages
        .iter()
        .map(|m| NewMessage {
            content: m.content.clone(),
            user_id: req.user_id,
            timestamp,
        })
        .collect();

    let stored = match state.tiered.store_tiered(&req.room_id, new_messages).await {
        Ok(stored) => stored,
        Err(e) => {
            warn!(room_id = %req.room_id, error = %e, "logic: store failed");
            return internal_error();
        },
    };

    let sender = WireUser {
        id: req.user_id,
        username: req.user_name.clone(),
        avatar: String::new(),
    };
    for msg in stored {
        let envelope = ServerMessage {
            id: msg.id,
            content: msg.content,
            timestamp: msg.timestamp,
            room_id: req.room_id.clone(),
            user: sender.clone(),
        };
        let frame = match server_messages_json(&envelope) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "logic: envelope serialization failed");
                return internal_error();
            },
        };
        let push = PushMsg::room_send("", req.room_id.clone(), frame.into_bytes());
        if let Err(e) = state.producer.send_room(&push).await {
            counter!("logic_produce_failed_total").increment(1);
            warn!(room_id = %req.room_id, error = %e, "logic: produce failed");
            return internal_error();
        }
    }

    counter!("logic_sends_total").increment(1);
    Json(serde_json::json!({ "status": "success" })).into_response()
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody::new(error_ids::BAD_REQUEST, message)),
    )
        .into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody::new("INTERNAL", "internal error")),
    )
        .into_response()
}
