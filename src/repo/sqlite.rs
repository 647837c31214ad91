//! SQLite-backed repository.
//!
//! Aggregates are stored as JSON detail columns next to the few fields we
//! filter on (match state, dispute match id); ratings get real columns since
//! they are simple rows. A single connection behind a tokio mutex is plenty
//! for the per-match serialization the engine needs.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::engine::transitions::MatchState;
use crate::error::{EngineError, EngineResult};
use crate::models::{Agent, Dispute, Match, Rating, Ruleset, User};

use super::Repository;

pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

fn db_err(e: impl Into<anyhow::Error>) -> EngineError {
    EngineError::Storage(e.into())
}

impl SqliteRepository {
    /// Open (or create) the database and initialize tables.
    pub fn new(db_path: &str) -> EngineResult<Self> {
        let conn = Connection::open(db_path).map_err(db_err)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS matches (
                id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_matches_state ON matches(state);

            CREATE TABLE IF NOT EXISTS ratings (
                user_id TEXT NOT NULL,
                league_id TEXT NOT NULL,
                elo REAL NOT NULL,
                provisional_matches INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, league_id)
            );

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rulesets (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS disputes (
                id TEXT PRIMARY KEY,
                match_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_disputes_match ON disputes(match_id);

            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );",
        )
        .map_err(db_err)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn find_match(&self, id: Uuid) -> EngineResult<Match> {
        let conn = self.conn.lock().await;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM matches WHERE id = ?",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let data = data.ok_or_else(|| EngineError::not_found("match", id))?;
        serde_json::from_str(&data).map_err(db_err)
    }

    async fn create_match(&self, m: &Match) -> EngineResult<()> {
        let data = serde_json::to_string(m).map_err(db_err)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO matches (id, state, updated_at, data) VALUES (?, ?, ?, ?)",
            params![
                m.id.to_string(),
                m.state.as_str(),
                m.updated_at.to_rfc3339(),
                data
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn save_match(&self, m: &Match) -> EngineResult<()> {
        let data = serde_json::to_string(m).map_err(db_err)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO matches (id, state, updated_at, data) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET state = excluded.state,
                 updated_at = excluded.updated_at, data = excluded.data",
            params![
                m.id.to_string(),
                m.state.as_str(),
                m.updated_at.to_rfc3339(),
                data
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_matches_by_states(&self, states: &[MatchState]) -> EngineResult<Vec<Match>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; states.len()].join(",");
        let sql = format!(
            "SELECT data FROM matches WHERE state IN ({}) ORDER BY updated_at",
            placeholders
        );
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(states.iter().map(|s| s.as_str())),
                |row| row.get::<_, String>(0),
            )
            .map_err(db_err)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(db_err)?;
        rows.iter()
            .map(|data| serde_json::from_str(data).map_err(db_err))
            .collect()
    }

    async fn find_ruleset(&self, id: &str) -> EngineResult<Ruleset> {
        let conn = self.conn.lock().await;
        let data: Option<String> = conn
            .query_row("SELECT data FROM rulesets WHERE id = ?", [id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_err)?;
        let data = data.ok_or_else(|| EngineError::not_found("ruleset", id))?;
        serde_json::from_str(&data).map_err(db_err)
    }

    async fn save_ruleset(&self, ruleset: &Ruleset) -> EngineResult<()> {
        let data = serde_json::to_string(ruleset).map_err(db_err)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO rulesets (id, data) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![ruleset.id, data],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> EngineResult<Option<User>> {
        let conn = self.conn.lock().await;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM users WHERE id = ?",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data).map_err(db_err)?)),
            None => Ok(None),
        }
    }

    async fn save_user(&self, user: &User) -> EngineResult<()> {
        let data = serde_json::to_string(user).map_err(db_err)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO users (id, data) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![user.id.to_string(), data],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_rating(&self, user_id: Uuid, league_id: &str) -> EngineResult<Option<Rating>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT elo, provisional_matches, updated_at FROM ratings
             WHERE user_id = ? AND league_id = ?",
            params![user_id.to_string(), league_id],
            |row| {
                Ok((
                    row.get::<_, f64>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()
        .map_err(db_err)?
        .map(|(elo, provisional_matches, updated_at)| {
            let updated_at = chrono::DateTime::parse_from_rfc3339(&updated_at)
                .map_err(db_err)?
                .with_timezone(&chrono::Utc);
            Ok(Rating {
                user_id,
                league_id: league_id.to_string(),
                elo,
                provisional_matches,
                updated_at,
            })
        })
        .transpose()
    }

    async fn save_rating(&self, rating: &Rating) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO ratings (user_id, league_id, elo, provisional_matches, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id, league_id) DO UPDATE SET
                 elo = excluded.elo,
                 provisional_matches = excluded.provisional_matches,
                 updated_at = excluded.updated_at",
            params![
                rating.user_id.to_string(),
                rating.league_id,
                rating.elo,
                rating.provisional_matches,
                rating.updated_at.to_rfc3339()
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn create_dispute(&self, dispute: &Dispute) -> EngineResult<()> {
        self.save_dispute(dispute).await
    }

    async fn save_dispute(&self, dispute: &Dispute) -> EngineResult<()> {
        let data = serde_json::to_string(dispute).map_err(db_err)?;
        let status = match dispute.status {
            crate::models::DisputeStatus::Open => "OPEN",
            crate::models::DisputeStatus::Resolved => "RESOLVED",
        };
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO disputes (id, match_id, status, created_at, data) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status, data = excluded.data",
            params![
                dispute.id.to_string(),
                dispute.match_id.to_string(),
                status,
                dispute.created_at.to_rfc3339(),
                data
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_disputes_by_match(&self, match_id: Uuid) -> EngineResult<Vec<Dispute>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT data FROM disputes WHERE match_id = ? ORDER BY created_at")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([match_id.to_string()], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(db_err)?;
        rows.iter()
            .map(|data| serde_json::from_str(data).map_err(db_err))
            .collect()
    }

    async fn list_agents(&self) -> EngineResult<Vec<Agent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT data FROM agents ORDER BY id")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(db_err)?;
        rows.iter()
            .map(|data| serde_json::from_str(data).map_err(db_err))
            .collect()
    }

    async fn save_agent(&self, agent: &Agent) -> EngineResult<()> {
        let data = serde_json::to_string(agent).map_err(db_err)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO agents (id, data) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![agent.id, data],
        )
        .map_err(db_err)?;
        Ok(())
    }
}
