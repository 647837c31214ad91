//! Shared fixtures for unit and integration tests.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use crate::clock::ManualClock;
use crate::engine::draft::DraftTemplateRegistry;
use crate::engine::ops::MatchEngine;
use crate::engine::transitions::MatchState;
use crate::models::{
    Agent, AgentPolicy, DraftAction, DraftActionType, EvidenceBundle, Match, MatchPlayer,
    MetricValue, Resolution, ResolutionSource, ResultEntry, RetentionPolicy, Ruleset, Side,
};
use crate::repo::{MemoryRepository, Repository};

pub fn fixture_ruleset() -> Ruleset {
    Ruleset {
        id: "ruleset-default".to_string(),
        agent_policy: AgentPolicy::Open,
        require_precheck: true,
        require_inrun_check: false,
        retention: RetentionPolicy::default(),
        draft_template_id: "bo1-standard".to_string(),
    }
}

pub fn fixture_catalog() -> Vec<Agent> {
    ["viper", "ghost", "titan", "nova", "razor", "echo", "warden", "pulse", "drift", "onyx"]
        .iter()
        .map(|id| Agent {
            id: id.to_string(),
            name: id.to_string(),
            enabled: true,
        })
        .collect()
}

pub fn fixture_match() -> Match {
    let registry = DraftTemplateRegistry::with_defaults();
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    Match {
        id: Uuid::new_v4(),
        queue_id: "ranked-1v1".to_string(),
        league_id: "gold".to_string(),
        ruleset_id: "ruleset-default".to_string(),
        challenge_id: "sprint-run".to_string(),
        season_id: "s1".to_string(),
        state: MatchState::Checkin,
        players: vec![
            MatchPlayer {
                user_id: Uuid::new_v4(),
                side: Side::A,
                checked_in: false,
            },
            MatchPlayer {
                user_id: Uuid::new_v4(),
                side: Side::B,
                checked_in: false,
            },
        ],
        draft: registry.instantiate("bo1-standard").unwrap(),
        evidence: EvidenceBundle::default(),
        confirmed_by: Vec::new(),
        resolution: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn result_entry(user_id: Uuid, value: MetricValue) -> ResultEntry {
    ResultEntry {
        user_id,
        value,
        proof_url: format!("https://proofs.example/{}", user_id),
        demo_url: None,
        submitted_at: Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap(),
    }
}

/// A terminal RESOLVED match carrying the given draft history. The third
/// tuple element marks the acting player as the match winner.
pub fn resolved_match_with_draft(actions: &[(&str, DraftActionType, bool)]) -> Match {
    let mut m = fixture_match();
    let mut winner = None;
    for &(agent_id, kind, won) in actions {
        let user_id = m
            .players
            .iter()
            .find(|p| p.side == kind.side())
            .unwrap()
            .user_id;
        if won {
            winner = Some(user_id);
        }
        m.draft.actions.push(DraftAction {
            kind,
            agent_id: agent_id.to_string(),
            user_id,
            at: m.created_at,
        });
    }
    m.state = MatchState::Resolved;
    m.resolution = Some(Resolution {
        finalized_at: m.created_at,
        source: ResolutionSource::Moderation,
        winner_user_id: winner,
        rating_delta: HashMap::new(),
        trust_delta: HashMap::new(),
        proxy_xp_delta: HashMap::new(),
    });
    m
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
    ))
}

/// Engine over a seeded in-memory repository (default ruleset + catalog).
pub async fn engine_with_fixtures() -> (Arc<MemoryRepository>, Arc<ManualClock>, MatchEngine) {
    let repo = Arc::new(MemoryRepository::new());
    let clock = manual_clock();
    repo.save_ruleset(&fixture_ruleset()).await.unwrap();
    for agent in fixture_catalog() {
        repo.save_agent(&agent).await.unwrap();
    }
    let engine = MatchEngine::new(repo.clone(), clock.clone());
    (repo, clock, engine)
}
