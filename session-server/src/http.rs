//! The HTTP surface: health, game creation and join (which mint the socket
//! tokens), CORS and request tracing. The `/ws` route lives here too so the
//! whole public surface is assembled in one place.

use std::sync::Arc;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::store::{GameStore, Player, StoreError};
use crate::ws::handler::ws_handler;
use crate::ws::hub::Hub;
use crate::ws::service::SessionService;

/// Everything the handlers share.
pub struct AppState<S> {
    pub service: SessionService<S>,
    pub store: Arc<S>,
    pub hub: Hub,
    pub jwt_secret: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateGameResponse {
    pub game_id: String,
    pub join_code: String,
    pub player: String,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinGameRequest {
    #[serde(default)]
    pub join_code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinGameResponse {
    pub game_id: String,
    pub player: String,
    pub token: String,
}

pub fn build_router<S: GameStore>(state: Arc<AppState<S>>, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/games", post(create_game::<S>))
        .route("/games/join", post(join_game::<S>))
        .route("/ws", get(ws_handler::<S>))
        .with_state(state)
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let headers = [header::AUTHORIZATION, header::CONTENT_TYPE];

    if origins.iter().any(|origin| origin == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(headers)
    } else {
        let list: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(list))
            .allow_methods(methods)
            .allow_headers(headers)
    }
}

async fn healthz() -> &'static str {
    "ok"
}

/// `POST /games`: a fresh game with the caller seated as p1.
async fn create_game<S: GameStore>(State(state): State<Arc<AppState<S>>>) -> Response {
    if state.jwt_secret.is_empty() {
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, "missing JWT secret");
    }

    let meta = match state.store.create_game().await {
        Ok(meta) => meta,
        Err(err) => {
            tracing::error!(%err, "failed to create game");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to create game");
        }
    };

    let token = match auth::sign_token(&state.jwt_secret, &meta.id, Player::P1.as_str()) {
        Ok(token) => token,
        Err(err) => {
            tracing::error!(%err, "failed to sign token");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to sign token");
        }
    };

    tracing::info!(game_id = %meta.id, join_code = %meta.join_code, "game created");
    Json(CreateGameResponse {
        game_id: meta.id,
        join_code: meta.join_code,
        player: Player::P1.as_str().to_string(),
        token,
    })
    .into_response()
}

/// `POST /games/join`: seats the second player and tells the room.
async fn join_game<S: GameStore>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<JoinGameRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return json_error(StatusCode::BAD_REQUEST, "invalid json");
    };
    if req.join_code.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "join_code required");
    }
    if state.jwt_secret.is_empty() {
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, "missing JWT secret");
    }

    let (meta, player) = match state.store.join_game(&req.join_code).await {
        Ok(joined) => joined,
        Err(StoreError::InvalidJoinCode) => {
            return json_error(StatusCode::BAD_REQUEST, "invalid join code");
        }
        Err(StoreError::GameFull) => {
            return json_error(StatusCode::CONFLICT, "game full");
        }
        Err(err) => {
            tracing::error!(%err, "failed to join game");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to join game");
        }
    };

    let token = match auth::sign_token(&state.jwt_secret, &meta.id, player.as_str()) {
        Ok(token) => token,
        Err(err) => {
            tracing::error!(%err, "failed to sign token");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to sign token");
        }
    };

    state.service.announce_join(&meta.id, player).await;
    tracing::info!(game_id = %meta.id, player = player.as_str(), "game joined");
    Json(JoinGameResponse {
        game_id: meta.id,
        player: player.as_str().to_string(),
        token,
    })
    .into_response()
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
