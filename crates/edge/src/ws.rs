use std::{net::SocketAddr, sync::Arc};

use {
    axum::extract::ws::{CloseFrame, Message, WebSocket},
    futures::{SinkExt, stream::StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use parley_protocol::{
    CLOSE_POLICY_VIOLATION, CLOSE_PROTOCOL_ERROR, CLOSE_REASON_TOKEN, ClientFrame, ErrorBody,
    FrameError, error_json,
};
use parley_store::User;

use crate::{
    handlers,
    state::{ConnectionEntry, EdgeState, Outbound},
};

/// Handle a single WebSocket connection through its full lifecycle:
/// binding (token already resolved by the upgrade handler) → registration
/// and subscription → message loop → cleanup.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<EdgeState>,
    user: Option<User>,
    remote_addr: SocketAddr,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let remote_ip = remote_addr.ip().to_string();

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<Outbound>();

    // Write loop: forwards frames from the channel to the socket. A Close
    // directive flushes the close frame and stops.
    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(out) = client_rx.recv().await {
            match out {
                Outbound::Frame(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        debug!(conn_id = %write_conn_id, "ws: write loop closed");
                        break;
                    }
                },
                Outbound::Close { code, reason } => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                },
            }
        }
    });

    // ── Binding ──────────────────────────────────────────────────────────

    let Some(user) = user else {
        warn!(conn_id = %conn_id, remote_ip = %remote_ip, "ws: token validation failed");
        let _ = client_tx.send(Outbound::Close {
            code: CLOSE_POLICY_VIOLATION,
            reason: CLOSE_REASON_TOKEN.into(),
        });
        drop(client_tx);
        let _ = write_handle.await;
        return;
    };

    info!(
        conn_id = %conn_id,
        user_id = user.id,
        remote_ip = %remote_ip,
        "ws: new connection"
    );

    // ── Registration and subscription ────────────────────────────────────

    let joined = state.topics.subscribe_all(user.id).await;
    let entry = ConnectionEntry {
        conn_id: conn_id.clone(),
        user: user.clone(),
        sender: client_tx.clone(),
        rooms: joined.clone(),
    };
    if let Some(old) = state.register(entry).await {
        debug!(conn_id = %conn_id, replaced = %old, "ws: replaced previous connection");
    }

    if let Err(e) = state
        .routing
        .register_connection(&conn_id, user.id, &state.server_id, &joined)
        .await
    {
        warn!(conn_id = %conn_id, error = %e, "ws: routing registration failed");
        state.remove(&conn_id).await;
        let _ = client_tx.send(Outbound::Close {
            code: 1011,
            reason: "registration failed".into(),
        });
        drop(client_tx);
        let _ = write_handle.await;
        return;
    }

    // Hello snapshot flushed on activation; a later `hello` frame re-serves it.
    match handlers::hello_snapshot(&state, &user).await {
        Ok(frame) => {
            let _ = client_tx.send(Outbound::Frame(frame));
        },
        Err(e) => warn!(conn_id = %conn_id, error = %e, "ws: hello snapshot failed"),
    }

    // ── Message loop ─────────────────────────────────────────────────────

    loop {
        let msg = match tokio::time::timeout(state.idle_timeout, ws_rx.next()).await {
            Ok(Some(Ok(m))) => m,
            Ok(Some(Err(e))) => {
                debug!(conn_id = %conn_id, error = %e, "ws: read error");
                break;
            },
            Ok(None) => break,
            Err(_) => {
                debug!(conn_id = %conn_id, "ws: idle timeout");
                let _ = client_tx.send(Outbound::Close {
                    code: 1000,
                    reason: "idle timeout".into(),
                });
                break;
            },
        };

        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Binary(_) => {
                warn!(conn_id = %conn_id, "ws: binary frame rejected");
                let _ = client_tx.send(Outbound::Close {
                    code: 1003,
                    reason: "binary frames not supported".into(),
                });
                break;
            },
            // Pings are answered by the framing layer; pongs need no action.
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break,
        };

        match ClientFrame::parse(&text) {
            Ok(frame) => dispatch_frame(&state, &user, &client_tx, frame).await,
            Err(FrameError::UnknownTag(tag)) => {
                debug!(conn_id = %conn_id, tag = %tag, "ws: ignoring unknown frame type");
            },
            Err(FrameError::Malformed(e)) => {
                warn!(conn_id = %conn_id, error = %e, "ws: malformed frame");
                let _ = client_tx.send(Outbound::Close {
                    code: CLOSE_PROTOCOL_ERROR,
                    reason: "invalid frame".into(),
                });
                break;
            },
        }
    }

    // ── Cleanup ──────────────────────────────────────────────────────────

    if let Some(entry) = state.remove(&conn_id).await {
        if let Err(e) = state
            .routing
            .unregister_connection(&conn_id, entry.user.id, &entry.rooms)
            .await
        {
            warn!(conn_id = %conn_id, error = %e, "ws: routing cleanup failed");
        }
    }
    info!(conn_id = %conn_id, user_id = user.id, "ws: connection closed");

    drop(client_tx);
    write_handle.abort();
}

async fn dispatch_frame(
    state: &Arc<EdgeState>,
    user: &User,
    client_tx: &mpsc::UnboundedSender<Outbound>,
    frame: ClientFrame,
) {
    match frame {
        ClientFrame::Hello => match handlers::hello_snapshot(state, user).await {
            Ok(reply) => {
                let _ = client_tx.send(Outbound::Frame(reply));
            },
            Err(e) => {
                warn!(user_id = user.id, error = %e, "ws: hello failed");
                send_error(client_tx, "snapshot unavailable");
            },
        },
        ClientFrame::ClientMessages(req) => {
            let room_id = req.room_id.clone();
            if let Err(e) = handlers::handle_client_send(state, user, req).await {
                // The frame is dropped; the client may re-send.
                warn!(user_id = user.id, room_id = %room_id, error = %e, "ws: send failed");
                send_error(client_tx, "message not stored");
            }
        },
        ClientFrame::RequestRoomHistory(req) => {
            let room_id = req.room_id.clone();
            match handlers::handle_history(state, req).await {
                Ok(reply) => {
                    let _ = client_tx.send(Outbound::Frame(reply));
                },
                Err(e) => {
                    warn!(room_id = %room_id, error = %e, "ws: history failed");
                    send_error(client_tx, "history unavailable");
                },
            }
        },
    }
}

fn send_error(client_tx: &mpsc::UnboundedSender<Outbound>, message: &str) {
    let body = ErrorBody::new("STORE_UNAVAILABLE", message);
    if let Ok(frame) = error_json(&body) {
        let _ = client_tx.send(Outbound::Frame(frame));
    }
}
