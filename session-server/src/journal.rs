//! Per-game event journal. Every event published to a room is recorded
//! here in emission order; when a game reaches its terminal state the log
//! is drained in one piece and handed to the archive writer.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// One recorded wire event. `seq` counts from 1 per game.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub seq: i32,
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// The full log of one game.
#[derive(Debug)]
pub struct GameLog {
    pub started_at: DateTime<Utc>,
    pub events: Vec<RecordedEvent>,
}

#[derive(Default)]
pub struct EventJournal {
    inner: Mutex<HashMap<String, GameLog>>,
}

impl EventJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one event to the game's log, opening the log on first use.
    pub fn record(&self, game_id: &str, kind: &str, payload: serde_json::Value) {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();
        let log = inner.entry(game_id.to_string()).or_insert_with(|| GameLog {
            started_at: now,
            events: Vec::new(),
        });
        log.events.push(RecordedEvent {
            seq: log.events.len() as i32 + 1,
            kind: kind.to_string(),
            payload,
            created_at: now,
        });
    }

    /// Removes and returns the game's log. The journal keeps nothing for a
    /// game once its archive write has been kicked off.
    pub fn take(&self, game_id: &str) -> Option<GameLog> {
        self.inner.lock().unwrap().remove(game_id)
    }
}
