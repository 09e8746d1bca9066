//! The authoritative game-state store. All four transitions (create, join,
//! place, fire) are atomic per game id: no interleaving of two concurrent
//! callers can produce a state that violates the status invariants.
//!
//! [`RedisStore`](redis::RedisStore) is the production realization and runs
//! every transition as a server-side script. The test-only
//! `MemoryStore` realizes the identical semantics behind a mutex.

#[cfg(test)]
pub mod memory;
pub mod redis;

use std::collections::HashMap;

use async_trait::async_trait;
use protocol::Coord;
use thiserror::Error;

use crate::engine::{self, Board, RuleError, ShipType, ShotOutcome};

/// The two seats of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Player {
    P1,
    P2,
}

impl Player {
    pub fn as_str(self) -> &'static str {
        match self {
            Player::P1 => "p1",
            Player::P2 => "p2",
        }
    }

    pub fn opponent(self) -> Player {
        match self {
            Player::P1 => Player::P2,
            Player::P2 => Player::P1,
        }
    }

    pub fn parse(label: &str) -> Option<Player> {
        match label {
            "p1" => Some(Player::P1),
            "p2" => Some(Player::P2),
            _ => None,
        }
    }
}

/// Lifecycle of a game. Monotone: a game only ever moves forward in this
/// order and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GameStatus {
    Waiting,
    Placing,
    Active,
    Finished,
}

impl GameStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GameStatus::Waiting => "waiting",
            GameStatus::Placing => "placing",
            GameStatus::Active => "active",
            GameStatus::Finished => "finished",
        }
    }

    pub fn parse(label: &str) -> Option<GameStatus> {
        match label {
            "waiting" => Some(GameStatus::Waiting),
            "placing" => Some(GameStatus::Placing),
            "active" => Some(GameStatus::Active),
            "finished" => Some(GameStatus::Finished),
            _ => None,
        }
    }
}

/// The meta hash of one game, as the store keeps it.
#[derive(Debug, Clone)]
pub struct GameMeta {
    pub id: String,
    pub join_code: String,
    pub status: GameStatus,
    pub turn: Player,
    pub winner: Option<Player>,
    pub p1_ready: bool,
    pub p2_ready: bool,
    pub p1_joined: bool,
    pub p2_joined: bool,
    pub p1_remaining: i64,
    pub p2_remaining: i64,
}

impl GameMeta {
    /// The wire form of the winner field: empty until the game finishes.
    pub fn winner_label(&self) -> &'static str {
        self.winner.map(Player::as_str).unwrap_or("")
    }
}

/// A complete placement: ship class to the cells it covers.
pub type Placement = HashMap<ShipType, Vec<Coord>>;

/// Outcome of a fire transition. `ship` is set only when the shot sinks a
/// ship.
#[derive(Debug, Clone, Copy)]
pub struct ShotReport {
    pub outcome: ShotOutcome,
    pub ship: Option<ShipType>,
}

/// Read-only projection of a game for one player, shaped for the
/// `game_state` wire payload.
#[derive(Debug, Clone)]
pub struct GameView {
    pub game_id: String,
    pub turn: String,
    pub status: String,
    pub winner: String,
    pub shots: HashMap<String, String>,
    pub ships: HashMap<String, Vec<[i32; 2]>>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("game not found")]
    GameNotFound,
    #[error("game full")]
    GameFull,
    #[error("invalid join code")]
    InvalidJoinCode,
    #[error("not player's turn")]
    NotPlayerTurn,
    #[error("game not active")]
    GameNotActive,
    #[error("ships already placed")]
    AlreadyReady,
    #[error("coordinate already shot")]
    AlreadyShot,
    #[error("game not accepting placements")]
    InvalidStatus,
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Maps the `ERR:<code>` protocol of the transition scripts back onto
    /// typed errors.
    pub(crate) fn from_script_code(code: &str) -> StoreError {
        match code {
            "game_not_found" => StoreError::GameNotFound,
            "game_full" => StoreError::GameFull,
            "invalid_status" => StoreError::InvalidStatus,
            "already_ready" => StoreError::AlreadyReady,
            "game_not_active" => StoreError::GameNotActive,
            "not_player_turn" => StoreError::NotPlayerTurn,
            "already_shot" => StoreError::AlreadyShot,
            other => StoreError::Backend(format!("unexpected script error: {other}")),
        }
    }
}

/// The transition contract of the session store. Implementations must make
/// every method atomic with respect to concurrent callers on the same game.
#[async_trait]
pub trait GameStore: Send + Sync + 'static {
    /// Creates a fresh game with the caller seated as p1 and registers its
    /// join code.
    async fn create_game(&self) -> Result<GameMeta, StoreError>;

    /// Resolves a join code and seats the second player, exactly once.
    async fn join_game(&self, join_code: &str) -> Result<(GameMeta, Player), StoreError>;

    /// Stores a validated placement, marks the player ready and advances the
    /// status to `placing` or `active`.
    async fn place_ships(
        &self,
        game_id: &str,
        player: Player,
        placement: &Placement,
    ) -> Result<(), StoreError>;

    /// Resolves one shot against the opponent's board, advancing turn and,
    /// on the last remaining cell, finishing the game.
    async fn fire(&self, game_id: &str, player: Player, coord: Coord)
    -> Result<ShotReport, StoreError>;

    /// The meta hash of a game.
    async fn meta(&self, game_id: &str) -> Result<GameMeta, StoreError>;

    /// The `game_state` projection for one player.
    async fn state(&self, game_id: &str, player: Player) -> Result<GameView, StoreError>;
}

/// Validates a loose-cell placement and materializes it as a board. Shared
/// by both store realizations so geometry is checked before any write.
pub(crate) fn build_board(placement: &Placement) -> Result<Board, StoreError> {
    let mut board = Board::new();
    for (ship_type, cells) in placement {
        let (start, orientation) = engine::reconstruct(*ship_type, cells)?;
        board.place_ship(*ship_type, start, orientation)?;
    }
    Ok(board)
}

/// Fresh random identifier, hex-encoded. 12 bytes for game ids, 3 for the
/// human-shareable join codes.
pub(crate) fn random_hex(bytes: usize) -> String {
    use rand::RngCore;
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// The stored board rendered as the wire `ships` map.
pub(crate) fn ships_wire_map(board: &Board) -> HashMap<String, Vec<[i32; 2]>> {
    board
        .ships()
        .map(|(ship_type, cells)| {
            (
                ship_type.as_str().to_string(),
                cells.iter().map(|c| [c.row, c.col]).collect(),
            )
        })
        .collect()
}
