//! Redis realization of the session store. Every transition runs as one
//! server-side script, so the read-modify-write of a game is atomic no
//! matter how many connections race on it. Key layout:
//!
//! - `game:<id>:meta`         hash of [`GameMeta`] fields
//! - `game:<id>:board:<p>`    hash, `ships` field holds the placed-ship JSON
//! - `game:<id>:occupancy:<p>` hash, cell -> ship type
//! - `game:<id>:ships:<p>`    hash, ship type -> remaining cells
//! - `game:<id>:shots:<p>`    hash, cell -> outcome
//! - `game:join:<code>`       string, join code -> game id

use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use protocol::Coord;

use super::{
    GameMeta, GameStatus, GameStore, GameView, Placement, Player, ShotReport, StoreError,
    build_board, random_hex, ships_wire_map,
};
use crate::engine::{RuleError, ShipType, ShotOutcome, in_bounds};

/// Connection settings, taken from the environment by the config loader.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub addr: String,
    pub password: String,
    pub db: i64,
}

pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Opens a managed connection. The manager reconnects on its own, so a
    /// clone per call is all the pooling this store needs.
    pub async fn connect(cfg: &RedisConfig) -> redis::RedisResult<Self> {
        let url = if cfg.password.is_empty() {
            format!("redis://{}/{}", cfg.addr, cfg.db)
        } else {
            format!("redis://:{}@{}/{}", cfg.password, cfg.addr, cfg.db)
        };
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub async fn ping(&self) -> redis::RedisResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<()>(&mut conn).await
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

fn game_meta_key(id: &str) -> String {
    format!("game:{id}:meta")
}

fn board_key(id: &str, player: Player) -> String {
    format!("game:{id}:board:{}", player.as_str())
}

fn occupancy_key(id: &str, player: Player) -> String {
    format!("game:{id}:occupancy:{}", player.as_str())
}

fn ships_key(id: &str, player: Player) -> String {
    format!("game:{id}:ships:{}", player.as_str())
}

fn shots_key(id: &str, player: Player) -> String {
    format!("game:{id}:shots:{}", player.as_str())
}

fn join_code_key(code: &str) -> String {
    format!("game:join:{code}")
}

/// Turns a script reply into a typed result. Scripts answer `OK`, a shot
/// outcome, or `ERR:<code>`.
fn script_reply(reply: &str) -> Result<&str, StoreError> {
    match reply.strip_prefix("ERR:") {
        Some(code) => Err(StoreError::from_script_code(code)),
        None => Ok(reply),
    }
}

fn parse_meta(fields: &HashMap<String, String>) -> GameMeta {
    let get = |name: &str| fields.get(name).map(String::as_str).unwrap_or("");
    GameMeta {
        id: get("id").to_string(),
        join_code: get("join_code").to_string(),
        status: GameStatus::parse(get("status")).unwrap_or(GameStatus::Waiting),
        turn: Player::parse(get("turn")).unwrap_or(Player::P1),
        winner: Player::parse(get("winner")),
        p1_ready: get("p1_ready") == "1",
        p2_ready: get("p2_ready") == "1",
        p1_joined: get("p1_joined") == "1",
        p2_joined: get("p2_joined") == "1",
        p1_remaining: get("p1_remaining").parse().unwrap_or(0),
        p2_remaining: get("p2_remaining").parse().unwrap_or(0),
    }
}

#[async_trait]
impl GameStore for RedisStore {
    async fn create_game(&self) -> Result<GameMeta, StoreError> {
        let id = random_hex(12);
        let join_code = random_hex(3);

        let mut conn = self.conn.clone();
        let () = redis::pipe()
            .atomic()
            .hset_multiple(
                game_meta_key(&id),
                &[
                    ("id", id.as_str()),
                    ("join_code", join_code.as_str()),
                    ("status", "waiting"),
                    ("turn", "p1"),
                    ("winner", ""),
                    ("p1_ready", "0"),
                    ("p2_ready", "0"),
                    ("p1_joined", "1"),
                    ("p2_joined", "0"),
                    ("p1_remaining", "0"),
                    ("p2_remaining", "0"),
                ],
            )
            .ignore()
            .set(join_code_key(&join_code), &id)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(GameMeta {
            id,
            join_code,
            status: GameStatus::Waiting,
            turn: Player::P1,
            winner: None,
            p1_ready: false,
            p2_ready: false,
            p1_joined: true,
            p2_joined: false,
            p1_remaining: 0,
            p2_remaining: 0,
        })
    }

    async fn join_game(&self, join_code: &str) -> Result<(GameMeta, Player), StoreError> {
        let mut conn = self.conn.clone();
        let id: Option<String> = conn.get(join_code_key(join_code)).await?;
        let Some(id) = id else {
            return Err(StoreError::InvalidJoinCode);
        };

        let meta_key = game_meta_key(&id);
        let reply: String = JOIN_GAME_SCRIPT
            .key(&meta_key)
            .invoke_async(&mut conn)
            .await?;
        script_reply(&reply)?;

        let fields: HashMap<String, String> = conn.hgetall(&meta_key).await?;
        if fields.is_empty() {
            return Err(StoreError::GameNotFound);
        }
        Ok((parse_meta(&fields), Player::P2))
    }

    async fn place_ships(
        &self,
        game_id: &str,
        player: Player,
        placement: &Placement,
    ) -> Result<(), StoreError> {
        // Geometry is validated before anything touches the store.
        let board = build_board(placement)?;

        let ships_json = serde_json::to_string(&ships_wire_map(&board))
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        let mut remaining_total: i64 = 0;
        let mut remaining_by_ship = Vec::new();
        for (ship_type, cells) in board.ships() {
            remaining_by_ship.push((ship_type.as_str(), cells.len() as i64));
            remaining_total += cells.len() as i64;
        }

        let mut invocation = PLACE_SHIPS_SCRIPT.prepare_invoke();
        invocation
            .key(game_meta_key(game_id))
            .key(board_key(game_id, player))
            .key(occupancy_key(game_id, player))
            .key(ships_key(game_id, player))
            .arg(player.as_str())
            .arg(&ships_json)
            .arg(remaining_total);
        for (coord, ship_type) in board.occupied() {
            invocation.arg(coord.key()).arg(ship_type.as_str());
        }
        invocation.arg("__ships__");
        for (ship_type, remaining) in &remaining_by_ship {
            invocation.arg(*ship_type).arg(*remaining);
        }

        let mut conn = self.conn.clone();
        let reply: String = invocation.invoke_async(&mut conn).await?;
        script_reply(&reply)?;
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

        let opponent = player.opponent();
        let mut conn = self.conn.clone();
        let reply: String = FIRE_SCRIPT
            .key(game_meta_key(game_id))
            .key(shots_key(game_id, player))
            .key(shots_key(game_id, opponent))
            .key(occupancy_key(game_id, opponent))
            .key(ships_key(game_id, opponent))
            .arg(player.as_str())
            .arg(coord.key())
            .invoke_async(&mut conn)
            .await?;
        let outcome = script_reply(&reply)?;

        match outcome.split_once(':') {
            None if outcome == "miss" => Ok(ShotReport {
                outcome: ShotOutcome::Miss,
                ship: None,
            }),
            None if outcome == "hit" => Ok(ShotReport {
                outcome: ShotOutcome::Hit,
                ship: None,
            }),
            Some(("sunk", ship)) => Ok(ShotReport {
                outcome: ShotOutcome::Sunk,
                ship: ShipType::parse(ship),
            }),
            _ => Err(StoreError::Backend(format!(
                "unexpected shot outcome: {outcome}"
            ))),
        }
    }

    async fn meta(&self, game_id: &str) -> Result<GameMeta, StoreError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(game_meta_key(game_id)).await?;
        if fields.is_empty() {
            return Err(StoreError::GameNotFound);
        }
        Ok(parse_meta(&fields))
    }

    async fn state(&self, game_id: &str, player: Player) -> Result<GameView, StoreError> {
        let meta = self.meta(game_id).await?;

        let mut conn = self.conn.clone();
        let shots: HashMap<String, String> = conn.hgetall(shots_key(game_id, player)).await?;
        let ships_json: Option<String> = conn.hget(board_key(game_id, player), "ships").await?;

        let ships = ships_json
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default();

        let winner = meta.winner_label().to_string();
        Ok(GameView {
            game_id: meta.id,
            turn: meta.turn.as_str().to_string(),
            status: meta.status.as_str().to_string(),
            winner,
            shots,
            ships,
        })
    }
}

static JOIN_GAME_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local meta = KEYS[1]

if redis.call('EXISTS', meta) == 0 then
  return 'ERR:game_not_found'
end

local p2_joined = redis.call('HGET', meta, 'p2_joined')
if p2_joined == '1' then
  return 'ERR:game_full'
end

redis.call('HSET', meta, 'p2_joined', 1)
return 'OK'
"#,
    )
});

static PLACE_SHIPS_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local meta = KEYS[1]
local board = KEYS[2]
local occupancy = KEYS[3]
local ships = KEYS[4]

local player = ARGV[1]
local ships_json = ARGV[2]
local remaining_total = ARGV[3]

if redis.call('EXISTS', meta) == 0 then
  return 'ERR:game_not_found'
end

local status = redis.call('HGET', meta, 'status')
if status ~= 'waiting' and status ~= 'placing' then
  return 'ERR:invalid_status'
end

local joined = redis.call('HGET', meta, player .. '_joined')
if joined ~= '1' then
  return 'ERR:invalid_status'
end

local ready_field = player .. '_ready'
local already_ready = redis.call('HGET', meta, ready_field)
if already_ready == '1' then
  return 'ERR:already_ready'
end

redis.call('DEL', board)
redis.call('DEL', occupancy)
redis.call('DEL', ships)

redis.call('HSET', board, 'ships', ships_json)

local idx = 4
while idx <= #ARGV and ARGV[idx] ~= '__ships__' do
  redis.call('HSET', occupancy, ARGV[idx], ARGV[idx + 1])
  idx = idx + 2
end

idx = idx + 1
while idx <= #ARGV do
  redis.call('HSET', ships, ARGV[idx], ARGV[idx + 1])
  idx = idx + 2
end

redis.call('HSET', meta, ready_field, 1)
redis.call('HSET', meta, player .. '_remaining', remaining_total)

local p1_ready = redis.call('HGET', meta, 'p1_ready')
local p2_ready = redis.call('HGET', meta, 'p2_ready')
if p1_ready == '1' and p2_ready == '1' then
  redis.call('HSET', meta, 'status', 'active')
else
  redis.call('HSET', meta, 'status', 'placing')
end

return 'OK'
"#,
    )
});

static FIRE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local meta = KEYS[1]
local shooter_shots = KEYS[2]
local opponent_shots = KEYS[3]
local opponent_occupancy = KEYS[4]
local opponent_ships = KEYS[5]

local player = ARGV[1]
local coord = ARGV[2]

if redis.call('EXISTS', meta) == 0 then
  return 'ERR:game_not_found'
end

local status = redis.call('HGET', meta, 'status')
if status ~= 'active' then
  return 'ERR:game_not_active'
end

local turn = redis.call('HGET', meta, 'turn')
if turn ~= player then
  return 'ERR:not_player_turn'
end

local already = redis.call('HGET', shooter_shots, coord)
if already then
  return 'ERR:already_shot'
end

local ship_type = redis.call('HGET', opponent_occupancy, coord)
if not ship_type then
  redis.call('HSET', shooter_shots, coord, 'miss')
  local next = (player == 'p1') and 'p2' or 'p1'
  redis.call('HSET', meta, 'turn', next)
  return 'miss'
end

redis.call('HSET', shooter_shots, coord, 'hit')
local next = (player == 'p1') and 'p2' or 'p1'

local remaining = tonumber(redis.call('HINCRBY', opponent_ships, ship_type, -1))
local remaining_total_field = (player == 'p1') and 'p2_remaining' or 'p1_remaining'
local remaining_total = tonumber(redis.call('HINCRBY', meta, remaining_total_field, -1))

if remaining == 0 then
  redis.call('HSET', shooter_shots, coord, 'sunk:' .. ship_type)
  if remaining_total == 0 then
    redis.call('HSET', meta, 'status', 'finished')
    redis.call('HSET', meta, 'winner', player)
  else
    redis.call('HSET', meta, 'turn', next)
  end
  return 'sunk:' .. ship_type
end

redis.call('HSET', meta, 'turn', next)
return 'hit'
"#,
    )
});
