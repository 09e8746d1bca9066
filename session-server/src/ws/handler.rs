//! Connection lifecycle for `/ws`. The bearer token is verified before the
//! upgrade; afterwards the socket is split and served by two tasks, one
//! draining the outbound channel and one dispatching inbound frames. When
//! either side finishes the other is aborted and the client unregisters.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::auth;
use crate::http::AppState;
use crate::store::{GameStore, Player};
use crate::ws::hub::ClientHandle;
use crate::ws::service::SessionService;

/// A connection with no inbound traffic for this long is closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Upgrades `/ws`. Authentication happens on the HTTP side so a bad token
/// is a plain 401, not a failed socket.
pub async fn ws_handler<S: GameStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match auth::bearer_token(&headers)
        .and_then(|token| auth::verify_token(&state.jwt_secret, token))
    {
        Ok(claims) => claims,
        Err(err) => {
            tracing::debug!(%err, "rejected socket upgrade");
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    };
    let Some(player) = Player::parse(&claims.player) else {
        tracing::debug!(player = %claims.player, "rejected socket upgrade: unknown seat");
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    };

    ws.on_upgrade(move |socket| serve_socket(socket, state, claims.game_id, player))
        .into_response()
}

/// Does the whole handling from registration to teardown for one socket.
async fn serve_socket<S: GameStore>(
    socket: WebSocket,
    state: Arc<AppState<S>>,
    game_id: String,
    player: Player,
) {
    let (client, outbound_rx) = ClientHandle::new(game_id, player);

    state.hub.register(client.clone()).await;
    // The snapshot is unicast; a broadcast racing the registration may
    // interleave, which clients tolerate because snapshots are complete.
    state.service.send_initial_state(&client).await;

    // By splitting, we can send and receive at the same time.
    let (sender, receiver) = socket.split();

    let mut send_task = tokio::spawn(write_loop(sender, outbound_rx));
    let mut recv_task = tokio::spawn(read_loop(receiver, state.service.clone(), client.clone()));

    // If any one of the tasks runs to completion, we abort the other.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.hub.unregister(client).await;
}

/// Dispatches inbound frames until the peer goes away or falls idle.
async fn read_loop<S: GameStore>(
    mut receiver: SplitStream<WebSocket>,
    service: SessionService<S>,
    client: ClientHandle,
) {
    loop {
        let frame = match tokio::time::timeout(IDLE_TIMEOUT, receiver.next()).await {
            Err(_) => {
                tracing::debug!(game_id = %client.game_id, "closing idle connection");
                return;
            }
            Ok(frame) => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                service.handle_message(&client, text.as_str()).await;
            }
            Some(Ok(Message::Close(_))) | None => return,
            // Pings and pongs are answered by the library; binary frames
            // are not part of the protocol.
            Some(Ok(_)) => {}
            Some(Err(_)) => return,
        }
    }
}

/// Drains the outbound channel onto the socket; a write error ends the
/// connection.
async fn write_loop(mut sender: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Bytes>) {
    while let Some(frame) = rx.recv().await {
        let text = match std::str::from_utf8(&frame) {
            Ok(text) => text.to_owned(),
            Err(err) => {
                tracing::error!(?err, "dropping non UTF-8 outbound frame");
                continue;
            }
        };
        if sender.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }
}
