pub mod handler;
pub mod protocol;

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    api::ApiState,
    auth::{jwt::JwtAccessTokenService, middleware::unauthorized_response},
    error::{current_request_id, request_id_from_headers_or_generate, with_request_id_scope},
    realtime::ConnectionIdentity,
    validation::MAX_WS_FRAME_BYTES,
};
use handler::dispatch_client_event;
use protocol::{decode_client_event, send_ws_event};

const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
/// Transport-level cap. Frames between `MAX_WS_FRAME_BYTES` and this size reach
/// `decode_client_event` and get a `WS_FRAME_TOO_LARGE` error frame; anything
/// larger is dropped by the socket layer and the connection closes.
const MAX_TRANSPORT_MESSAGE_BYTES: usize = MAX_WS_FRAME_BYTES * 2;

#[derive(Clone)]
struct WsRouterState {
    api: ApiState,
    jwt_service: Arc<JwtAccessTokenService>,
}

#[derive(Debug, Default, Deserialize)]
struct WsQuery {
    #[serde(default)]
    token: Option<String>,
}

/// `GET /v1/ws?token=<access token>`. Browsers cannot set headers on an
/// upgrade request, so the token rides in the query string.
pub fn router(api: ApiState, jwt_service: Arc<JwtAccessTokenService>) -> Router {
    Router::new()
        .route("/v1/ws", get(ws_upgrade))
        .with_state(WsRouterState { api, jwt_service })
}

async fn ws_upgrade(
    State(state): State<WsRouterState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(token) = query.token.as_deref().map(str::trim).filter(|token| !token.is_empty())
    else {
        return unauthorized_response("missing access token");
    };
    let identity = match state.jwt_service.validate_user_token(token) {
        Ok(identity) => identity,
        Err(_) => return unauthorized_response("invalid access token"),
    };

    let identity =
        ConnectionIdentity { user_id: identity.user_id, display_name: identity.display_name };
    let request_id = request_id_from_headers_or_generate(&headers);
    ws.max_message_size(MAX_TRANSPORT_MESSAGE_BYTES).on_upgrade(move |socket| async move {
        with_request_id_scope(request_id, handle_socket(state.api, identity, socket)).await;
    })
}

async fn handle_socket(state: ApiState, identity: ConnectionIdentity, mut socket: WebSocket) {
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());
    let (handle, mut outbound_receiver) =
        state.hub.connect(identity.user_id, identity.display_name.clone()).await;
    info!(%handle, user_id = %identity.user_id, request_id = %request_id, "socket connected");

    // Heartbeat: server pings every HEARTBEAT_INTERVAL_MS, disconnects if no
    // pong arrives within HEARTBEAT_TIMEOUT_MS.
    let mut heartbeat_interval =
        tokio::time::interval(std::time::Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    heartbeat_interval.reset();
    let mut last_pong = Instant::now();
    let heartbeat_timeout =
        std::time::Duration::from_millis(HEARTBEAT_INTERVAL_MS + HEARTBEAT_TIMEOUT_MS);

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > heartbeat_timeout {
                    warn!(%handle, request_id = %request_id, "heartbeat timeout, disconnecting");
                    break;
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(event) => {
                        if send_ws_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };
                match message {
                    Ok(Message::Text(raw)) => {
                        let outcome = match decode_client_event(raw.as_str()) {
                            Ok(event) => dispatch_client_event(&state, handle, &identity, event).await,
                            Err(error_frame) => Err(error_frame),
                        };
                        if let Err(error_frame) = outcome {
                            if send_ws_event(&mut socket, &error_frame).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        let error_frame = protocol::error_event(
                            protocol::WS_INVALID_FRAME,
                            "binary frames are not supported",
                        );
                        if send_ws_event(&mut socket, &error_frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Err(error) => {
                        debug!(%handle, error = %error, "socket read failed");
                        break;
                    }
                }
            }
        }
    }

    let report = state.hub.disconnect(handle).await;
    info!(
        %handle,
        user_id = %identity.user_id,
        rooms_left = report.rooms_left.len(),
        "socket disconnected"
    );
}
