//! Persistence boundary.
//!
//! The engine only ever talks to storage through [`Repository`]; every
//! operation is a single read-modify-write against it. Two implementations:
//! an in-memory store for tests and development, and the SQLite store the
//! service runs on.

mod memory;
mod sqlite;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use uuid::Uuid;

use crate::engine::transitions::MatchState;
use crate::error::EngineResult;
use crate::models::{Agent, Dispute, Match, Rating, Ruleset, User};

#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_match(&self, id: Uuid) -> EngineResult<Match>;
    async fn create_match(&self, m: &Match) -> EngineResult<()>;
    async fn save_match(&self, m: &Match) -> EngineResult<()>;
    async fn list_matches_by_states(&self, states: &[MatchState]) -> EngineResult<Vec<Match>>;

    async fn find_ruleset(&self, id: &str) -> EngineResult<Ruleset>;
    async fn save_ruleset(&self, ruleset: &Ruleset) -> EngineResult<()>;

    /// `None` when no progression row exists yet; callers create lazily.
    async fn find_user(&self, id: Uuid) -> EngineResult<Option<User>>;
    async fn save_user(&self, user: &User) -> EngineResult<()>;

    /// `None` until first settlement in that league.
    async fn find_rating(&self, user_id: Uuid, league_id: &str) -> EngineResult<Option<Rating>>;
    async fn save_rating(&self, rating: &Rating) -> EngineResult<()>;

    async fn create_dispute(&self, dispute: &Dispute) -> EngineResult<()>;
    async fn save_dispute(&self, dispute: &Dispute) -> EngineResult<()>;
    async fn list_disputes_by_match(&self, match_id: Uuid) -> EngineResult<Vec<Dispute>>;

    async fn list_agents(&self) -> EngineResult<Vec<Agent>>;
    async fn save_agent(&self, agent: &Agent) -> EngineResult<()>;
}
