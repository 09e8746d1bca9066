//! Archival of finished matches. One call, one transaction: the summary
//! row, the ordered event log and the leaderboard deltas commit together
//! or not at all.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::journal::RecordedEvent;

const STATUS_FINISHED: &str = "finished";

/// Summary row of a finished game.
#[derive(Debug, Clone)]
pub struct GameSummary {
    pub game_id: String,
    pub player1_id: String,
    pub player2_id: String,
    pub winner_id: String,
    pub loser_id: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub wins: i64,
    pub losses: i64,
    pub total_games: i64,
}

pub struct ArchiveStore {
    pool: PgPool,
}

impl ArchiveStore {
    pub async fn connect(dsn: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new().max_connections(5).connect(dsn).await?;
        Ok(Self { pool })
    }

    /// Writes the match record. Events are inserted in `seq` order; the
    /// leaderboard upsert adds deltas on conflict by user id.
    pub async fn save_game(
        &self,
        summary: &GameSummary,
        events: &[RecordedEvent],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO games (id, player1_id, player2_id, winner_id, status, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&summary.game_id)
        .bind(&summary.player1_id)
        .bind(&summary.player2_id)
        .bind(&summary.winner_id)
        .bind(&summary.status)
        .bind(summary.started_at)
        .bind(summary.finished_at)
        .execute(&mut *tx)
        .await?;

        for event in events {
            sqlx::query(
                r#"
                INSERT INTO game_events (game_id, seq, event_type, payload, created_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(&summary.game_id)
            .bind(event.seq)
            .bind(&event.kind)
            .bind(sqlx::types::Json(&event.payload))
            .bind(event.created_at)
            .execute(&mut *tx)
            .await?;
        }

        if summary.status == STATUS_FINISHED && !summary.winner_id.is_empty() {
            upsert_leaderboard(&mut tx, &summary.winner_id, 1, 0).await?;
            if !summary.loser_id.is_empty() {
                upsert_leaderboard(&mut tx, &summary.loser_id, 0, 1).await?;
            }
        }

        tx.commit().await
    }

    /// Top of the leaderboard, wins first.
    pub async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, wins, losses, total_games
            FROM leaderboard
            ORDER BY wins DESC, total_games DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(LeaderboardEntry {
                    user_id: row.try_get("user_id")?,
                    wins: row.try_get("wins")?,
                    losses: row.try_get("losses")?,
                    total_games: row.try_get("total_games")?,
                })
            })
            .collect()
    }

    /// The archived event log of one game, in seq order.
    pub async fn game_events(&self, game_id: &str) -> Result<Vec<RecordedEvent>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT seq, event_type, payload, created_at
            FROM game_events
            WHERE game_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(game_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let payload: sqlx::types::Json<serde_json::Value> = row.try_get("payload")?;
                Ok(RecordedEvent {
                    seq: row.try_get("seq")?,
                    kind: row.try_get("event_type")?,
                    payload: payload.0,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

async fn upsert_leaderboard(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: &str,
    wins_delta: i64,
    losses_delta: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO leaderboard (user_id, wins, losses, total_games)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id) DO UPDATE
        SET wins = leaderboard.wins + EXCLUDED.wins,
            losses = leaderboard.losses + EXCLUDED.losses,
            total_games = leaderboard.total_games + EXCLUDED.total_games,
            updated_at = now()
        "#,
    )
    .bind(user_id)
    .bind(wins_delta)
    .bind(losses_delta)
    .bind(wins_delta + losses_delta)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
