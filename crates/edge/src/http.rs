use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Json, Router,
        extract::{ConnectInfo, Query, State, WebSocketUpgrade, rejection::JsonRejection},
        http::{StatusCode, header},
        response::{Html, IntoResponse, Response},
        routing::{get, post},
    },
    axum_extra::extract::CookieJar,
    serde::Deserialize,
    tracing::warn,
};

use parley_protocol::{ErrorBody, error_ids};

use crate::{state::EdgeState, ws};

/// Build the edge HTTP surface: the welcome page, the account endpoints,
/// and WebSocket upgrade on any other path.
pub fn build_router(state: Arc<EdgeState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/create-account", post(create_account_handler))
        .route("/api/login", post(login_handler))
        .fallback(ws_upgrade_handler)
        .with_state(state)
}

async fn index_handler() -> Html<&'static str> {
    Html(
        "<!doctype html><html><head><title>parley</title></head>\
         <body><h1>parley</h1><p>Chat edge node is up. Connect a WebSocket \
         client with <code>?uid=&lt;token&gt;</code>.</p></body></html>",
    )
}

// ── Accounts ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateAccountRequest {
    username: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn create_account_handler(
    State(state): State<Arc<EdgeState>>,
    body: Result<Json<CreateAccountRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return bad_request("malformed request body");
    };
    if req.username.is_empty() || req.email.is_empty() || req.password.is_empty() {
        return bad_request("username, email and password are required");
    }
    match state
        .auth
        .register(&req.username, &req.email, &req.password)
        .await
    {
        Ok((_user, token)) => session_created(&token, state.session_ttl_secs),
        Err(e) => store_error_response(e),
    }
}

async fn login_handler(
    State(state): State<Arc<EdgeState>>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return bad_request("malformed request body");
    };
    if req.email.is_empty() || req.password.is_empty() {
        return bad_request("email and password are required");
    }
    match state.auth.login(&req.email, &req.password).await {
        Ok((_user, token)) => session_created(&token, state.session_ttl_secs),
        Err(e) => store_error_response(e),
    }
}

/// 204 with the session cookie. The token travels only in the cookie; a
/// 204 cannot carry a body.
fn session_created(token: &str, max_age_secs: u64) -> Response {
    (
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, session_cookie(token, max_age_secs))],
    )
        .into_response()
}

fn session_cookie(token: &str, max_age_secs: u64) -> String {
    format!("sid={token}; HttpOnly; Max-Age={max_age_secs}; SameSite=Strict")
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody::new(error_ids::BAD_REQUEST, message)),
    )
        .into_response()
}

/// Map a store error onto the closed public id set. Internal failures are
/// logged and flattened so no raw error text escapes.
fn store_error_payload(err: &parley_store::Error) -> (StatusCode, ErrorBody) {
    use parley_store::Error as E;
    match err {
        E::UsernameExists => (
            StatusCode::BAD_REQUEST,
            ErrorBody::new(error_ids::USERNAME_EXISTS, "username already taken"),
        ),
        E::EmailExists => (
            StatusCode::BAD_REQUEST,
            ErrorBody::new(error_ids::EMAIL_EXISTS, "email already registered"),
        ),
        E::BadCredentials => (
            StatusCode::BAD_REQUEST,
            ErrorBody::new(error_ids::BAD_REQUEST, "email password no match"),
        ),
        E::UnknownEmail => (
            StatusCode::BAD_REQUEST,
            ErrorBody::new(error_ids::LOGIN_FAILED, "email password no match"),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorBody::new("INTERNAL", "internal error"),
        ),
    }
}

fn store_error_response(err: parley_store::Error) -> Response {
    let (status, body) = store_error_payload(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!(error = %err, "account endpoint failed");
    }
    (status, Json(body)).into_response()
}

// ── WebSocket upgrade ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct UpgradeQuery {
    uid: Option<String>,
}

/// Upgrade any GET carrying the WebSocket headers. The token comes from
/// `?uid=` or the `sid` cookie; resolution happens before the upgrade
/// completes, and a failed resolution closes the fresh socket with 1008.
async fn ws_upgrade_handler(
    State(state): State<Arc<EdgeState>>,
    Query(query): Query<UpgradeQuery>,
    jar: CookieJar,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let token = query
        .uid
        .or_else(|| jar.get("sid").map(|c| c.value().to_string()));

    let user = match token {
        Some(t) => match state.auth.resolve_token(&t).await {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "token resolution failed");
                None
            },
        },
        None => None,
    };

    upgrade
        .max_message_size(parley_protocol::MAX_PAYLOAD_BYTES)
        .max_frame_size(parley_protocol::MAX_PAYLOAD_BYTES)
        .on_upgrade(move |socket| ws::handle_connection(socket, state, user, remote_addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_matches_the_contract() {
        assert_eq!(
            session_cookie("deadbeef", 86_400),
            "sid=deadbeef; HttpOnly; Max-Age=86400; SameSite=Strict"
        );
    }

    #[test]
    fn session_created_is_204_with_cookie() {
        let resp = session_created("t0k3n", 86_400);
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let cookie = resp
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(cookie.starts_with("sid=t0k3n;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
    }

    #[test]
    fn duplicate_identity_maps_to_the_closed_id_set() {
        let (status, body) = store_error_payload(&parley_store::Error::UsernameExists);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.id, "USERNAME_EXISTS");

        let (status, body) = store_error_payload(&parley_store::Error::EmailExists);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.id, "EMAIL_EXISTS");
    }

    #[test]
    fn wrong_password_and_unknown_email_follow_the_login_contract() {
        let (status, body) = store_error_payload(&parley_store::Error::BadCredentials);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.id, "BAD_REQUEST");
        assert_eq!(body.message, "email password no match");

        let (_, body) = store_error_payload(&parley_store::Error::UnknownEmail);
        assert_eq!(body.id, "LOGIN_FAILED");
        assert_eq!(body.message, "email password no match");
    }

    #[test]
    fn internal_errors_never_leak_details() {
        let err = parley_store::Error::message("mysql exploded at 10.0.0.3");
        let (status, body) = store_error_payload(&err);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.message, "internal error");
    }
}
