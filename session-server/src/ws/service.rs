//! Translates authenticated client messages into store transitions and the
//! transition outcomes into wire events. All room traffic funnels through
//! [`SessionService::publish`] so the event journal sees exactly what the
//! room saw, in the same order.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use protocol::{
    FirePayload, GameStatePayload, MSG_ERROR, MSG_FIRE, MSG_GAME_FINISHED, MSG_GAME_STATE,
    MSG_OPPONENT_JOINED, MSG_PLACE_SHIPS, MSG_SHOT_RESULT, MSG_TURN_CHANGED, ClientEnvelope,
    ErrorPayload, GameFinishedPayload, OpponentJoinedPayload, PlaceShipsPayload, ShotResultPayload,
    TurnChangedPayload,
};

use crate::archive::{ArchiveStore, GameSummary};
use crate::engine::ShipType;
use crate::journal::EventJournal;
use crate::store::{GameMeta, GameStatus, GameStore, GameView, Placement, Player, StoreError};
use crate::ws::hub::{ClientHandle, Hub};

pub struct SessionService<S> {
    store: Arc<S>,
    hub: Hub,
    journal: Arc<EventJournal>,
    archive: Option<Arc<ArchiveStore>>,
}

impl<S> Clone for SessionService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            hub: self.hub.clone(),
            journal: self.journal.clone(),
            archive: self.archive.clone(),
        }
    }
}

impl<S: GameStore> SessionService<S> {
    pub fn new(
        store: Arc<S>,
        hub: Hub,
        journal: Arc<EventJournal>,
        archive: Option<Arc<ArchiveStore>>,
    ) -> Self {
        Self {
            store,
            hub,
            journal,
            archive,
        }
    }

    /// Entry point for every inbound frame of a connection.
    pub async fn handle_message(&self, client: &ClientHandle, raw: &str) {
        let envelope: ClientEnvelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(_) => {
                self.send_error(client, "invalid message").await;
                return;
            }
        };

        match envelope.kind.as_str() {
            MSG_PLACE_SHIPS => self.handle_place_ships(client, envelope.payload).await,
            MSG_FIRE => self.handle_fire(client, envelope.payload).await,
            _ => self.send_error(client, "unknown message type").await,
        }
    }

    async fn handle_place_ships(&self, client: &ClientHandle, payload: serde_json::Value) {
        let place: PlaceShipsPayload = match serde_json::from_value(payload) {
            Ok(place) => place,
            Err(_) => {
                self.send_error(client, "invalid place_ships payload").await;
                return;
            }
        };
        if place.game_id != client.game_id {
            self.send_error(client, "game mismatch").await;
            return;
        }

        let mut placement = Placement::new();
        for ship in &place.ships {
            let Some(ship_type) = ShipType::parse(&ship.kind.to_lowercase()) else {
                self.send_error(client, "unknown ship type").await;
                return;
            };
            placement.insert(ship_type, ship.cells.clone());
        }

        if let Err(err) = self
            .store
            .place_ships(&place.game_id, client.player, &placement)
            .await
        {
            tracing::warn!(
                game_id = %place.game_id,
                player = client.player.as_str(),
                %err,
                "ships place failed"
            );
            self.send_error(client, &wire_message(&err)).await;
            return;
        }

        tracing::info!(
            game_id = %place.game_id,
            player = client.player.as_str(),
            "ships placed"
        );

        match self.store.state(&place.game_id, client.player).await {
            Ok(state) => {
                self.publish(&place.game_id, MSG_GAME_STATE, &state_payload(state))
                    .await;
            }
            Err(err) => {
                tracing::error!(game_id = %place.game_id, %err, "failed to read state after place");
            }
        }
    }

    async fn handle_fire(&self, client: &ClientHandle, payload: serde_json::Value) {
        let fire: FirePayload = match serde_json::from_value(payload) {
            Ok(fire) => fire,
            Err(_) => {
                self.send_error(client, "invalid fire payload").await;
                return;
            }
        };
        if fire.game_id != client.game_id {
            self.send_error(client, "game mismatch").await;
            return;
        }

        let report = match self
            .store
            .fire(&fire.game_id, client.player, fire.coord)
            .await
        {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(
                    game_id = %fire.game_id,
                    player = client.player.as_str(),
                    coord = %fire.coord.key(),
                    %err,
                    "shot failed"
                );
                self.send_error(client, &wire_message(&err)).await;
                return;
            }
        };

        tracing::info!(
            game_id = %fire.game_id,
            player = client.player.as_str(),
            coord = %fire.coord.key(),
            outcome = report.outcome.as_str(),
            "shot fired"
        );

        self.publish(
            &fire.game_id,
            MSG_SHOT_RESULT,
            &ShotResultPayload {
                game_id: fire.game_id.clone(),
                coord: fire.coord,
                outcome: report.outcome.as_str().to_string(),
                ship: report
                    .ship
                    .map(|ship| ship.as_str().to_string())
                    .unwrap_or_default(),
            },
        )
        .await;

        // One post-transition read feeds both follow-up events.
        let meta = match self.store.meta(&fire.game_id).await {
            Ok(meta) => meta,
            Err(err) => {
                tracing::error!(game_id = %fire.game_id, %err, "failed to read meta after shot");
                return;
            }
        };

        self.publish(
            &fire.game_id,
            MSG_TURN_CHANGED,
            &TurnChangedPayload {
                game_id: fire.game_id.clone(),
                turn: meta.turn.as_str().to_string(),
            },
        )
        .await;

        if meta.status == GameStatus::Finished {
            self.publish(
                &fire.game_id,
                MSG_GAME_FINISHED,
                &GameFinishedPayload {
                    game_id: fire.game_id.clone(),
                    winner: meta.winner_label().to_string(),
                },
            )
            .await;
            self.archive_finished(&meta);
        }
    }

    /// Sends the current snapshot to a freshly connected client.
    pub async fn send_initial_state(&self, client: &ClientHandle) {
        match self.store.state(&client.game_id, client.player).await {
            Ok(state) => {
                client
                    .send_event(MSG_GAME_STATE, &state_payload(state))
                    .await;
            }
            Err(err) => {
                tracing::warn!(game_id = %client.game_id, %err, "failed to load initial state");
                self.send_error(client, "failed to load game state").await;
            }
        }
    }

    /// Announces the second player to the room. Called by the join endpoint.
    pub async fn announce_join(&self, game_id: &str, player: Player) {
        self.publish(
            game_id,
            MSG_OPPONENT_JOINED,
            &OpponentJoinedPayload {
                game_id: game_id.to_string(),
                player: player.as_str().to_string(),
            },
        )
        .await;
    }

    /// Broadcasts one event to the room and records it in the journal.
    async fn publish<T: Serialize>(&self, game_id: &str, kind: &str, payload: &T) {
        match serde_json::to_value(payload) {
            Ok(value) => self.journal.record(game_id, kind, value),
            Err(err) => tracing::error!(?err, kind, "failed to journal event"),
        }
        self.hub.publish(game_id, kind, payload).await;
    }

    async fn send_error(&self, client: &ClientHandle, message: &str) {
        client
            .send_event(
                MSG_ERROR,
                &ErrorPayload {
                    message: message.to_string(),
                },
            )
            .await;
    }

    /// Drains the journal and commits the match to the archive off the hot
    /// path. Runs at most once per game: the journal entry is gone after.
    fn archive_finished(&self, meta: &GameMeta) {
        let Some(archive) = self.archive.clone() else {
            return;
        };
        let Some(winner) = meta.winner else {
            tracing::error!(game_id = %meta.id, "finished game without winner, not archiving");
            return;
        };

        let finished_at = Utc::now();
        let (started_at, events) = match self.journal.take(&meta.id) {
            Some(log) => (log.started_at, log.events),
            None => (finished_at, Vec::new()),
        };
        let summary = GameSummary {
            game_id: meta.id.clone(),
            player1_id: Player::P1.as_str().to_string(),
            player2_id: Player::P2.as_str().to_string(),
            winner_id: winner.as_str().to_string(),
            loser_id: winner.opponent().as_str().to_string(),
            status: GameStatus::Finished.as_str().to_string(),
            started_at,
            finished_at,
        };

        tokio::spawn(async move {
            if let Err(err) = archive.save_game(&summary, &events).await {
                tracing::error!(game_id = %summary.game_id, %err, "failed to archive finished game");
            }
        });
    }
}

/// Maps a store refusal onto the wire error text. Backend failures stay
/// generic; everything else is safe to show the player.
fn wire_message(err: &StoreError) -> String {
    match err {
        StoreError::Backend(_) => "internal error".to_string(),
        other => other.to_string(),
    }
}

fn state_payload(state: GameView) -> GameStatePayload {
    GameStatePayload {
        game_id: state.game_id,
        turn: state.turn,
        status: state.status,
        winner: state.winner,
        shots: state.shots,
        ships: state.ships,
    }
}
