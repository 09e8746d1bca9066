//! In-memory realization of [`GameStore`] for the test suite. A single
//! mutex serializes every transition, which trivially satisfies the
//! per-game atomicity contract; the transition semantics mirror the Redis
//! scripts step for step so the state-machine tests cover both.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use protocol::Coord;

use super::{
    GameMeta, GameStatus, GameStore, GameView, Placement, Player, ShotReport, StoreError,
    build_board, random_hex, ships_wire_map,
};
use crate::engine::{RuleError, ShipType, ShotOutcome, in_bounds};

#[derive(Debug, Clone)]
struct BoardRecord {
    ships: HashMap<String, Vec<[i32; 2]>>,
    occupancy: HashMap<String, ShipType>,
    remaining: HashMap<ShipType, i64>,
}

#[derive(Debug)]
struct GameRecord {
    meta: GameMeta,
    boards: HashMap<Player, BoardRecord>,
    shots: HashMap<Player, HashMap<String, String>>,
}

#[derive(Default)]
struct Inner {
    games: HashMap<String, GameRecord>,
    join_codes: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn create_game(&self) -> Result<GameMeta, StoreError> {
        let id = random_hex(12);
        let join_code = random_hex(3);
        let meta = GameMeta {
            id: id.clone(),
            join_code: join_code.clone(),
            status: GameStatus::Waiting,
            turn: Player::P1,
            winner: None,
            p1_ready: false,
            p2_ready: false,
            p1_joined: true,
            p2_joined: false,
            p1_remaining: 0,
            p2_remaining: 0,
        };

        let mut inner = self.inner.lock().unwrap();
        inner.join_codes.insert(join_code, id.clone());
        inner.games.insert(
            id,
            GameRecord {
                meta: meta.clone(),
                boards: HashMap::new(),
                shots: HashMap::new(),
            },
        );
        Ok(meta)
    }

    async fn join_game(&self, join_code: &str) -> Result<(GameMeta, Player), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner
            .join_codes
            .get(join_code)
            .cloned()
            .ok_or(StoreError::InvalidJoinCode)?;
        let record = inner.games.get_mut(&id).ok_or(StoreError::GameNotFound)?;
        if record.meta.p2_joined {
            return Err(StoreError::GameFull);
        }
        record.meta.p2_joined = true;
        Ok((record.meta.clone(), Player::P2))
    }

    async fn place_ships(
        &self,
        game_id: &str,
        player: Player,
        placement: &Placement,
    ) -> Result<(), StoreError> {
        let board = build_board(placement)?;

        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .games
            .get_mut(game_id)
            .ok_or(StoreError::GameNotFound)?;
        let meta = &mut record.meta;

        if meta.status != GameStatus::Waiting && meta.status != GameStatus::Placing {
            return Err(StoreError::InvalidStatus);
        }
        let joined = match player {
            Player::P1 => meta.p1_joined,
            Player::P2 => meta.p2_joined,
        };
        if !joined {
            return Err(StoreError::InvalidStatus);
        }
        let ready = match player {
            Player::P1 => meta.p1_ready,
            Player::P2 => meta.p2_ready,
        };
        if ready {
            return Err(StoreError::AlreadyReady);
        }

        let mut remaining = HashMap::new();
        let mut total = 0;
        for (ship_type, cells) in board.ships() {
            remaining.insert(ship_type, cells.len() as i64);
            total += cells.len() as i64;
        }
        let occupancy = board
            .occupied()
            .iter()
            .map(|(coord, ship_type)| (coord.key(), *ship_type))
            .collect();

        record.boards.insert(
            player,
            BoardRecord {
                ships: ships_wire_map(&board),
                occupancy,
                remaining,
            },
        );

        let meta = &mut record.meta;
        match player {
            Player::P1 => {
                meta.p1_ready = true;
                meta.p1_remaining = total;
            }
            Player::P2 => {
                meta.p2_ready = true;
                meta.p2_remaining = total;
            }
        }
        meta.status = if meta.p1_ready && meta.p2_ready {
            GameStatus::Active
        } else {
            GameStatus::Placing
        };
        Ok(())
    }

    async fn fire(
        &self,
        game_id: &str,
        player: Player,
        coord: Coord,
    ) -> Result<ShotReport, StoreError> {
        if !in_bounds(coord) {
            return Err(RuleError::OutOfBounds.into());
        }

        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .games
            .get_mut(game_id)
            .ok_or(StoreError::GameNotFound)?;
        if record.meta.status != GameStatus::Active {
            return Err(StoreError::GameNotActive);
        }
        if record.meta.turn != player {
            return Err(StoreError::NotPlayerTurn);
        }

        let cell = coord.key();
        let shots = record.shots.entry(player).or_default();
        if shots.contains_key(&cell) {
            return Err(StoreError::AlreadyShot);
        }

        let opponent = player.opponent();
        let ship_type = record
            .boards
            .get(&opponent)
            .and_then(|board| board.occupancy.get(&cell))
            .copied();

        let Some(ship_type) = ship_type else {
            record
                .shots
                .get_mut(&player)
                .unwrap()
                .insert(cell, "miss".into());
            record.meta.turn = opponent;
            return Ok(ShotReport {
                outcome: ShotOutcome::Miss,
                ship: None,
            });
        };

        record
            .shots
            .get_mut(&player)
            .unwrap()
            .insert(cell.clone(), "hit".into());

        let board = record.boards.get_mut(&opponent).unwrap();
        let ship_remaining = board.remaining.entry(ship_type).or_insert(0);
        *ship_remaining -= 1;
        let ship_remaining = *ship_remaining;

        let meta = &mut record.meta;
        let total_remaining = match opponent {
            Player::P1 => {
                meta.p1_remaining -= 1;
                meta.p1_remaining
            }
            Player::P2 => {
                meta.p2_remaining -= 1;
                meta.p2_remaining
            }
        };

        if ship_remaining == 0 {
            record
                .shots
                .get_mut(&player)
                .unwrap()
                .insert(cell, format!("sunk:{}", ship_type.as_str()));
            if total_remaining == 0 {
                record.meta.status = GameStatus::Finished;
                record.meta.winner = Some(player);
            } else {
                record.meta.turn = opponent;
            }
            return Ok(ShotReport {
                outcome: ShotOutcome::Sunk,
                ship: Some(ship_type),
            });
        }

        record.meta.turn = opponent;
        Ok(ShotReport {
            outcome: ShotOutcome::Hit,
            ship: None,
        })
    }

    async fn meta(&self, game_id: &str) -> Result<GameMeta, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .games
            .get(game_id)
            .map(|record| record.meta.clone())
            .ok_or(StoreError::GameNotFound)
    }

    async fn state(&self, game_id: &str, player: Player) -> Result<GameView, StoreError> {
        let inner = self.inner.lock().unwrap();
        let record = inner.games.get(game_id).ok_or(StoreError::GameNotFound)?;
        let meta = &record.meta;
        Ok(GameView {
            game_id: meta.id.clone(),
            turn: meta.turn.as_str().to_string(),
            status: meta.status.as_str().to_string(),
            winner: meta.winner_label().to_string(),
            shots: record.shots.get(&player).cloned().unwrap_or_default(),
            ships: record
                .boards
                .get(&player)
                .map(|board| board.ships.clone())
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn destroyer_and_submarine() -> Placement {
        let mut placement = Placement::new();
        placement.insert(
            ShipType::Destroyer,
            vec![Coord::new(0, 0), Coord::new(0, 1)],
        );
        placement.insert(
            ShipType::Submarine,
            vec![Coord::new(2, 0), Coord::new(3, 0), Coord::new(4, 0)],
        );
        placement
    }

    fn destroyer_at(row: i32, col: i32) -> Placement {
        let mut placement = Placement::new();
        placement.insert(
            ShipType::Destroyer,
            vec![Coord::new(row, col), Coord::new(row, col + 1)],
        );
        placement
    }

    /// Create, join and place for both players; returns the game id.
    async fn active_game(store: &MemoryStore, p1: Placement, p2: Placement) -> String {
        let meta = store.create_game().await.unwrap();
        store.join_game(&meta.join_code).await.unwrap();
        store.place_ships(&meta.id, Player::P1, &p1).await.unwrap();
        store.place_ships(&meta.id, Player::P2, &p2).await.unwrap();
        meta.id
    }

    #[tokio::test]
    async fn miss_then_hit_alternates_turns() {
        let store = MemoryStore::new();
        let id = active_game(&store, destroyer_and_submarine(), destroyer_and_submarine()).await;

        let shot = store.fire(&id, Player::P1, Coord::new(5, 5)).await.unwrap();
        assert_eq!(shot.outcome, ShotOutcome::Miss);
        assert_eq!(store.meta(&id).await.unwrap().turn, Player::P2);

        let shot = store.fire(&id, Player::P2, Coord::new(0, 0)).await.unwrap();
        assert_eq!(shot.outcome, ShotOutcome::Hit);
        assert_eq!(store.meta(&id).await.unwrap().turn, Player::P1);
    }

    #[tokio::test]
    async fn second_destroyer_cell_sinks_it() {
        let store = MemoryStore::new();
        let id = active_game(&store, destroyer_and_submarine(), destroyer_and_submarine()).await;

        store.fire(&id, Player::P1, Coord::new(5, 5)).await.unwrap();
        store.fire(&id, Player::P2, Coord::new(0, 0)).await.unwrap();
        store.fire(&id, Player::P1, Coord::new(0, 0)).await.unwrap();
        let shot = store.fire(&id, Player::P2, Coord::new(0, 1)).await.unwrap();

        assert_eq!(shot.outcome, ShotOutcome::Sunk);
        assert_eq!(shot.ship, Some(ShipType::Destroyer));
        let meta = store.meta(&id).await.unwrap();
        // Game continues: the submarine still floats.
        assert_eq!(meta.status, GameStatus::Active);
        assert_eq!(meta.turn, Player::P1);
        let view = store.state(&id, Player::P2).await.unwrap();
        assert_eq!(view.shots.get("0,1").unwrap(), "sunk:destroyer");
    }

    #[tokio::test]
    async fn finishing_sunk_freezes_turn_and_sets_winner() {
        let store = MemoryStore::new();
        let id = active_game(&store, destroyer_at(0, 0), destroyer_at(5, 5)).await;

        store.fire(&id, Player::P1, Coord::new(5, 5)).await.unwrap();
        store.fire(&id, Player::P2, Coord::new(0, 0)).await.unwrap();
        let shot = store.fire(&id, Player::P1, Coord::new(5, 6)).await.unwrap();

        assert_eq!(shot.outcome, ShotOutcome::Sunk);
        let meta = store.meta(&id).await.unwrap();
        assert_eq!(meta.status, GameStatus::Finished);
        assert_eq!(meta.winner, Some(Player::P1));
        assert_eq!(meta.p2_remaining, 0);
        // The turn stays with the shooter when the game ends.
        assert_eq!(meta.turn, Player::P1);

        assert!(matches!(
            store.fire(&id, Player::P2, Coord::new(9, 9)).await,
            Err(StoreError::GameNotActive)
        ));
    }

    #[tokio::test]
    async fn repeat_shot_is_rejected_without_state_change() {
        let store = MemoryStore::new();
        let id = active_game(&store, destroyer_and_submarine(), destroyer_and_submarine()).await;

        store.fire(&id, Player::P1, Coord::new(5, 5)).await.unwrap();
        store.fire(&id, Player::P2, Coord::new(6, 6)).await.unwrap();
        let before = store.meta(&id).await.unwrap();

        assert!(matches!(
            store.fire(&id, Player::P1, Coord::new(5, 5)).await,
            Err(StoreError::AlreadyShot)
        ));
        let after = store.meta(&id).await.unwrap();
        assert_eq!(after.turn, before.turn);
        assert_eq!(after.status, before.status);

        // The opponent may still shoot the mirror cell.
        let shot = store.fire(&id, Player::P1, Coord::new(6, 6)).await.unwrap();
        assert_eq!(shot.outcome, ShotOutcome::Miss);
    }

    #[tokio::test]
    async fn firing_out_of_turn_is_rejected() {
        let store = MemoryStore::new();
        let id = active_game(&store, destroyer_and_submarine(), destroyer_and_submarine()).await;

        store.fire(&id, Player::P1, Coord::new(5, 5)).await.unwrap();
        assert!(matches!(
            store.fire(&id, Player::P1, Coord::new(5, 6)).await,
            Err(StoreError::NotPlayerTurn)
        ));
    }

    #[tokio::test]
    async fn join_is_exactly_once() {
        let store = MemoryStore::new();
        let meta = store.create_game().await.unwrap();
        store.join_game(&meta.join_code).await.unwrap();
        assert!(matches!(
            store.join_game(&meta.join_code).await,
            Err(StoreError::GameFull)
        ));
        assert!(matches!(
            store.join_game("not-a-code").await,
            Err(StoreError::InvalidJoinCode)
        ));
    }

    #[tokio::test]
    async fn placement_requires_joined_player() {
        let store = MemoryStore::new();
        let meta = store.create_game().await.unwrap();
        // p2 has not joined yet; their placement is a status error.
        assert!(matches!(
            store
                .place_ships(&meta.id, Player::P2, &destroyer_at(0, 0))
                .await,
            Err(StoreError::InvalidStatus)
        ));
    }

    #[tokio::test]
    async fn placement_is_idempotent_on_refusal() {
        let store = MemoryStore::new();
        let meta = store.create_game().await.unwrap();
        store.join_game(&meta.join_code).await.unwrap();
        store
            .place_ships(&meta.id, Player::P1, &destroyer_at(0, 0))
            .await
            .unwrap();
        let before = store.meta(&meta.id).await.unwrap();

        assert!(matches!(
            store
                .place_ships(&meta.id, Player::P1, &destroyer_and_submarine())
                .await,
            Err(StoreError::AlreadyReady)
        ));
        let after = store.meta(&meta.id).await.unwrap();
        assert_eq!(after.status, before.status);
        assert_eq!(after.p1_remaining, before.p1_remaining);
        let view = store.state(&meta.id, Player::P1).await.unwrap();
        assert_eq!(view.ships.len(), 1);
    }

    #[tokio::test]
    async fn both_placements_activate_exactly_once() {
        let store = MemoryStore::new();
        let meta = store.create_game().await.unwrap();
        store.join_game(&meta.join_code).await.unwrap();

        store
            .place_ships(&meta.id, Player::P1, &destroyer_at(0, 0))
            .await
            .unwrap();
        assert_eq!(
            store.meta(&meta.id).await.unwrap().status,
            GameStatus::Placing
        );

        store
            .place_ships(&meta.id, Player::P2, &destroyer_at(5, 5))
            .await
            .unwrap();
        let meta = store.meta(&meta.id).await.unwrap();
        assert_eq!(meta.status, GameStatus::Active);
        assert!(meta.p1_ready && meta.p2_ready);
    }

    #[tokio::test]
    async fn full_standard_fleet_counts_seventeen_cells() {
        let store = MemoryStore::new();
        let meta = store.create_game().await.unwrap();
        store.join_game(&meta.join_code).await.unwrap();

        let mut placement = Placement::new();
        for (row, ship_type) in ShipType::ALL.into_iter().enumerate() {
            let cells = (0..ship_type.size())
                .map(|col| Coord::new(row as i32, col))
                .collect();
            placement.insert(ship_type, cells);
        }
        store
            .place_ships(&meta.id, Player::P1, &placement)
            .await
            .unwrap();

        let meta = store.meta(&meta.id).await.unwrap();
        assert_eq!(meta.p1_remaining, 17);
        let view = store.state(&meta.id, Player::P1).await.unwrap();
        assert_eq!(view.ships.len(), 5);
        assert_eq!(view.ships["carrier"].len(), 5);
    }

    #[tokio::test]
    async fn invalid_geometry_never_reaches_the_store() {
        let store = MemoryStore::new();
        let meta = store.create_game().await.unwrap();
        let mut placement = Placement::new();
        placement.insert(ShipType::Destroyer, vec![Coord::new(0, 0)]);

        assert!(matches!(
            store.place_ships(&meta.id, Player::P1, &placement).await,
            Err(StoreError::Rule(RuleError::InvalidPlacement))
        ));
        assert!(!store.meta(&meta.id).await.unwrap().p1_ready);
    }

    #[tokio::test]
    async fn concurrent_fires_serialize_on_the_turn_check() {
        let store = Arc::new(MemoryStore::new());
        let id = active_game(&store, destroyer_and_submarine(), destroyer_and_submarine()).await;

        let a = tokio::spawn({
            let store = store.clone();
            let id = id.clone();
            async move { store.fire(&id, Player::P1, Coord::new(7, 7)).await }
        });
        let b = tokio::spawn({
            let store = store.clone();
            let id = id.clone();
            async move { store.fire(&id, Player::P1, Coord::new(8, 8)).await }
        });

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        // Whichever lands first flips the turn; the loser is refused.
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert!(
            matches!(&a, Err(StoreError::NotPlayerTurn)) || matches!(&b, Err(StoreError::NotPlayerTurn))
        );
        assert_eq!(store.meta(&id).await.unwrap().turn, Player::P2);
    }
}
