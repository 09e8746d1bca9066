//! The wire contract between the game server and its browser clients.
//! Every frame is a JSON text message with a `{type, payload}` envelope;
//! the payload shape depends on the type tag, so inbound frames are parsed
//! in two stages (envelope first, then the typed payload).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The buffer size for every per-client outbound channel.
pub const OUTBOUND_BUFFER_SIZE: usize = 256;

// Client -> Server.

/// A player submits their complete ship layout.
pub const MSG_PLACE_SHIPS: &str = "place_ships";
/// A player fires at one cell of the opponent's board.
pub const MSG_FIRE: &str = "fire";

// Server -> Client.

/// Full snapshot of the game from one player's perspective.
pub const MSG_GAME_STATE: &str = "game_state";
/// Outcome of a single shot, broadcast to the whole room.
pub const MSG_SHOT_RESULT: &str = "shot_result";
/// The turn field after a transition, broadcast to the whole room.
pub const MSG_TURN_CHANGED: &str = "turn_changed";
/// Terminal notification carrying the winner.
pub const MSG_GAME_FINISHED: &str = "game_finished";
/// The second player entered the game via its join code.
pub const MSG_OPPONENT_JOINED: &str = "opponent_joined";
/// Unicast failure reply to the client whose message was refused.
pub const MSG_ERROR: &str = "error";

/// A single board cell. Rows and columns count from zero; in the `shots`
/// map of a snapshot the cell is flattened to the string `"row,col"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub row: i32,
    pub col: i32,
}

impl Coord {
    pub fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    /// The `"row,col"` form used as a map key on the wire and in the store.
    pub fn key(&self) -> String {
        format!("{},{}", self.row, self.col)
    }
}

/// The inbound envelope. The payload stays untyped until the type tag has
/// been inspected.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
}

/// Renders one outbound frame. Used for unicasts and broadcasts alike so
/// both endpoints agree on the envelope shape.
pub fn envelope<T: Serialize>(kind: &str, payload: &T) -> serde_json::Result<String> {
    #[derive(Serialize)]
    struct ServerEnvelope<'a, T> {
        #[serde(rename = "type")]
        kind: &'a str,
        payload: &'a T,
    }
    serde_json::to_string(&ServerEnvelope { kind, payload })
}

/// Payload of [`MSG_PLACE_SHIPS`].
#[derive(Debug, Serialize, Deserialize)]
pub struct PlaceShipsPayload {
    pub game_id: String,
    pub ships: Vec<ShipPayload>,
}

/// One ship of a placement, as an unordered cell list. The server derives
/// start and orientation from the cells.
#[derive(Debug, Serialize, Deserialize)]
pub struct ShipPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub cells: Vec<Coord>,
}

/// Payload of [`MSG_FIRE`].
#[derive(Debug, Serialize, Deserialize)]
pub struct FirePayload {
    pub game_id: String,
    pub coord: Coord,
}

/// Payload of [`MSG_GAME_STATE`]. `shots` maps `"row,col"` to
/// `miss`/`hit`/`sunk:<ship>`; `ships` maps ship type to its cells.
#[derive(Debug, Serialize, Deserialize)]
pub struct GameStatePayload {
    pub game_id: String,
    pub turn: String,
    pub status: String,
    pub winner: String,
    pub shots: HashMap<String, String>,
    pub ships: HashMap<String, Vec<[i32; 2]>>,
}

/// Payload of [`MSG_SHOT_RESULT`]. `ship` is empty unless the outcome is
/// `sunk`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ShotResultPayload {
    pub game_id: String,
    pub coord: Coord,
    pub outcome: String,
    pub ship: String,
}

/// Payload of [`MSG_TURN_CHANGED`].
#[derive(Debug, Serialize, Deserialize)]
pub struct TurnChangedPayload {
    pub game_id: String,
    pub turn: String,
}

/// Payload of [`MSG_GAME_FINISHED`].
#[derive(Debug, Serialize, Deserialize)]
pub struct GameFinishedPayload {
    pub game_id: String,
    pub winner: String,
}

/// Payload of [`MSG_OPPONENT_JOINED`].
#[derive(Debug, Serialize, Deserialize)]
pub struct OpponentJoinedPayload {
    pub game_id: String,
    pub player: String,
}

/// Payload of [`MSG_ERROR`].
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}
