//! In-memory repository for tests and development runs.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::engine::transitions::MatchState;
use crate::error::{EngineError, EngineResult};
use crate::models::{Agent, Dispute, Match, Rating, Ruleset, User};

use super::Repository;

#[derive(Default)]
pub struct MemoryRepository {
    matches: RwLock<HashMap<Uuid, Match>>,
    rulesets: RwLock<HashMap<String, Ruleset>>,
    users: RwLock<HashMap<Uuid, User>>,
    ratings: RwLock<HashMap<(Uuid, String), Rating>>,
    disputes: RwLock<HashMap<Uuid, Dispute>>,
    agents: RwLock<HashMap<String, Agent>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn find_match(&self, id: Uuid) -> EngineResult<Match> {
        self.matches
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("match", id))
    }

    async fn create_match(&self, m: &Match) -> EngineResult<()> {
        let mut matches = self.matches.write();
        if matches.contains_key(&m.id) {
            return Err(EngineError::Validation(format!(
                "match {} already exists",
                m.id
            )));
        }
        matches.insert(m.id, m.clone());
        Ok(())
    }

    async fn save_match(&self, m: &Match) -> EngineResult<()> {
        self.matches.write().insert(m.id, m.clone());
        Ok(())
    }

    async fn list_matches_by_states(&self, states: &[MatchState]) -> EngineResult<Vec<Match>> {
        Ok(self
            .matches
            .read()
            .values()
            .filter(|m| states.contains(&m.state))
            .cloned()
            .collect())
    }

    async fn find_ruleset(&self, id: &str) -> EngineResult<Ruleset> {
        self.rulesets
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("ruleset", id))
    }

    async fn save_ruleset(&self, ruleset: &Ruleset) -> EngineResult<()> {
        self.rulesets
            .write()
            .insert(ruleset.id.clone(), ruleset.clone());
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> EngineResult<Option<User>> {
        Ok(self.users.read().get(&id).cloned())
    }

    async fn save_user(&self, user: &User) -> EngineResult<()> {
        self.users.write().insert(user.id, user.clone());
        Ok(())
    }

    async fn find_rating(&self, user_id: Uuid, league_id: &str) -> EngineResult<Option<Rating>> {
        Ok(self
            .ratings
            .read()
            .get(&(user_id, league_id.to_string()))
            .cloned())
    }

    async fn save_rating(&self, rating: &Rating) -> EngineResult<()> {
        self.ratings
            .write()
            .insert((rating.user_id, rating.league_id.clone()), rating.clone());
        Ok(())
    }

    async fn create_dispute(&self, dispute: &Dispute) -> EngineResult<()> {
        self.disputes.write().insert(dispute.id, dispute.clone());
        Ok(())
    }

    async fn save_dispute(&self, dispute: &Dispute) -> EngineResult<()> {
        self.disputes.write().insert(dispute.id, dispute.clone());
        Ok(())
    }

    async fn list_disputes_by_match(&self, match_id: Uuid) -> EngineResult<Vec<Dispute>> {
        let mut disputes: Vec<Dispute> = self
            .disputes
            .read()
            .values()
            .filter(|d| d.match_id == match_id)
            .cloned()
            .collect();
        disputes.sort_by_key(|d| d.created_at);
        Ok(disputes)
    }

    async fn list_agents(&self) -> EngineResult<Vec<Agent>> {
        let mut agents: Vec<Agent> = self.agents.read().values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    async fn save_agent(&self, agent: &Agent) -> EngineResult<()> {
        self.agents.write().insert(agent.id.clone(), agent.clone());
        Ok(())
    }
}
