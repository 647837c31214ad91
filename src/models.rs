//! Core domain types for the match lifecycle engine.
//!
//! The match is the central aggregate: it is created by matchmaking in
//! `CHECKIN`, mutated exclusively through engine operations, and becomes
//! immutable (other than evidence retention) once a resolution is written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::engine::transitions::MatchState;

/// Placeholder written over proof/demo URLs once the retention window lapses.
pub const REDACTED_URL: &str = "[redacted]";

pub const BASE_ELO: f64 = 1000.0;
pub const MAX_TRUST: i32 = 200;
pub const MAX_LEVEL: u32 = 60;

// ===== Players =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchPlayer {
    pub user_id: Uuid,
    /// Fixed at creation, never reassigned.
    pub side: Side,
    pub checked_in: bool,
}

// ===== Draft =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DraftActionType {
    BanA,
    BanB,
    PickA,
    PickB,
}

impl DraftActionType {
    pub fn side(&self) -> Side {
        match self {
            DraftActionType::BanA | DraftActionType::PickA => Side::A,
            DraftActionType::BanB | DraftActionType::PickB => Side::B,
        }
    }

    pub fn is_pick(&self) -> bool {
        matches!(self, DraftActionType::PickA | DraftActionType::PickB)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UniqueMode {
    /// An agent picked or banned anywhere in the draft cannot appear again.
    Global,
    /// Each side may not reuse its own selections.
    PerSide,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftAction {
    pub kind: DraftActionType,
    pub agent_id: String,
    pub user_id: Uuid,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub template_id: String,
    pub sequence: Vec<DraftActionType>,
    pub actions: Vec<DraftAction>,
    pub unique_mode: UniqueMode,
}

impl Draft {
    pub fn is_complete(&self) -> bool {
        self.actions.len() >= self.sequence.len()
    }

    /// Agent ids already consumed for uniqueness checks against `side`.
    pub fn taken_agent_ids(&self, side: Side) -> Vec<&str> {
        self.actions
            .iter()
            .filter(|a| match self.unique_mode {
                UniqueMode::Global => true,
                UniqueMode::PerSide => a.kind.side() == side,
            })
            .map(|a| a.agent_id.as_str())
            .collect()
    }

    pub fn last_action_at(&self) -> Option<DateTime<Utc>> {
        self.actions.last().map(|a| a.at)
    }
}

// ===== Evidence =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceKind {
    Precheck,
    Inrun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceVerdict {
    Pass,
    Violation,
    LowConf,
}

/// A screen-capture-derived assertion about what is in play.
/// Immutable once appended; retention only removes whole records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub id: Uuid,
    pub kind: EvidenceKind,
    pub at: DateTime<Utc>,
    pub user_id: Option<Uuid>,
    pub detected_agents: Vec<String>,
    pub confidence: HashMap<String, f64>,
    pub verdict: EvidenceVerdict,
    pub frame_hash: Option<String>,
    pub crop_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub precheck: Vec<EvidenceRecord>,
    pub inrun: Vec<EvidenceRecord>,
    pub result: Option<ResultProof>,
}

// ===== Result proof =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricType {
    /// Lower is better.
    TimeMs,
    /// Higher is better.
    Score,
    /// Ordinal tier ladder, higher tier wins.
    RankTier,
}

/// Submitted metric value; rank tiers arrive as text, everything else numeric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEntry {
    pub user_id: Uuid,
    pub value: MetricValue,
    pub proof_url: String,
    pub demo_url: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultProof {
    pub metric_type: MetricType,
    /// Explicit winner (set by moderation); otherwise inferred from entries.
    pub winner_user_id: Option<Uuid>,
    pub entries: Vec<ResultEntry>,
}

impl ResultProof {
    pub fn entry_for(&self, user_id: Uuid) -> Option<&ResultEntry> {
        self.entries.iter().find(|e| e.user_id == user_id)
    }

    /// Insert or replace this player's entry (later submissions win).
    pub fn upsert_entry(&mut self, entry: ResultEntry) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.user_id == entry.user_id) {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    pub fn newest_submission_at(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(|e| e.submitted_at).max()
    }
}

// ===== Resolution =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionSource {
    Confirmation,
    Moderation,
}

/// Written exactly once; its presence is the settlement idempotency guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub finalized_at: DateTime<Utc>,
    pub source: ResolutionSource,
    pub winner_user_id: Option<Uuid>,
    pub rating_delta: HashMap<Uuid, f64>,
    pub trust_delta: HashMap<Uuid, i32>,
    pub proxy_xp_delta: HashMap<Uuid, i64>,
}

// ===== Match aggregate =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: Uuid,
    pub queue_id: String,
    pub league_id: String,
    pub ruleset_id: String,
    pub challenge_id: String,
    pub season_id: String,
    pub state: MatchState,
    pub players: Vec<MatchPlayer>,
    pub draft: Draft,
    pub evidence: EvidenceBundle,
    pub confirmed_by: Vec<Uuid>,
    pub resolution: Option<Resolution>,
    pub created_at: DateTime<Utc>,
    /// Bumped on every mutation; the sweeper measures inactivity against it.
    pub updated_at: DateTime<Utc>,
}

impl Match {
    pub fn player(&self, user_id: Uuid) -> Option<&MatchPlayer> {
        self.players.iter().find(|p| p.user_id == user_id)
    }

    pub fn player_mut(&mut self, user_id: Uuid) -> Option<&mut MatchPlayer> {
        self.players.iter_mut().find(|p| p.user_id == user_id)
    }

    pub fn player_on_side(&self, side: Side) -> Option<&MatchPlayer> {
        self.players.iter().find(|p| p.side == side)
    }

    pub fn opponent_of(&self, user_id: Uuid) -> Option<&MatchPlayer> {
        self.players.iter().find(|p| p.user_id != user_id)
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.player(user_id).is_some()
    }

    pub fn is_finalized(&self) -> bool {
        self.resolution.is_some()
    }
}

// ===== Disputes =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    pub id: Uuid,
    pub match_id: Uuid,
    /// `None` means the system opened it (violation or timeout).
    pub opened_by: Option<Uuid>,
    pub reason: String,
    pub status: DisputeStatus,
    pub decision: Option<String>,
    pub evidence_urls: Vec<String>,
    pub resolved_by: Option<Uuid>,
    pub winner_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

// ===== Ratings =====

/// Per `(user, league)` rating row; lazily created at settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub user_id: Uuid,
    pub league_id: String,
    pub elo: f64,
    pub provisional_matches: u32,
    pub updated_at: DateTime<Utc>,
}

impl Rating {
    pub fn new(user_id: Uuid, league_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            league_id: league_id.to_string(),
            elo: BASE_ELO,
            provisional_matches: 0,
            updated_at: now,
        }
    }
}

// ===== Users (progression fields only) =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyLevel {
    pub level: u32,
    pub xp: i64,
    pub next_xp: i64,
}

impl Default for ProxyLevel {
    fn default() -> Self {
        Self {
            level: 1,
            xp: 0,
            next_xp: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub trust_score: i32,
    pub proxy_level: ProxyLevel,
}

impl User {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            trust_score: 100,
            proxy_level: ProxyLevel::default(),
        }
    }

    /// Apply a trust delta, clamped to 0..=200.
    pub fn apply_trust(&mut self, delta: i32) {
        self.trust_score = (self.trust_score + delta).clamp(0, MAX_TRUST);
    }

    /// Grant XP and run the level-up loop.
    pub fn apply_xp(&mut self, delta: i64) {
        let lvl = &mut self.proxy_level;
        lvl.xp += delta;
        while lvl.xp >= lvl.next_xp && lvl.level < MAX_LEVEL {
            lvl.xp -= lvl.next_xp;
            lvl.level += 1;
            lvl.next_xp = (((lvl.next_xp as f64) * 1.12).floor() as i64).max(100);
        }
    }
}

// ===== Ruleset (external config, consumed read-only) =====

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", content = "agents", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentPolicy {
    Open,
    Whitelist(Vec<String>),
    Blacklist(Vec<String>),
}

impl AgentPolicy {
    pub fn allows(&self, agent_id: &str) -> bool {
        match self {
            AgentPolicy::Open => true,
            AgentPolicy::Whitelist(ids) => ids.iter().any(|id| id == agent_id),
            AgentPolicy::Blacklist(ids) => !ids.iter().any(|id| id == agent_id),
        }
    }
}

/// Evidence retention windows, in days per category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub precheck_days: i64,
    pub inrun_days: i64,
    pub result_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            precheck_days: 14,
            inrun_days: 30,
            result_days: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ruleset {
    pub id: String,
    pub agent_policy: AgentPolicy,
    pub require_precheck: bool,
    pub require_inrun_check: bool,
    pub retention: RetentionPolicy,
    pub draft_template_id: String,
}

// ===== Agent catalog row =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub enabled: bool,
}

// ===== Settlement inputs =====

/// Per-user trust/XP replacement used by sweeper timeout policies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SettlementOverride {
    pub trust: i32,
    pub xp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_is_clamped_to_bounds() {
        let mut user = User::new(Uuid::new_v4());
        user.apply_trust(500);
        assert_eq!(user.trust_score, 200);
        user.apply_trust(-1000);
        assert_eq!(user.trust_score, 0);
    }

    #[test]
    fn xp_levels_up_with_growing_threshold() {
        let mut user = User::new(Uuid::new_v4());
        user.apply_xp(100);
        assert_eq!(user.proxy_level.level, 2);
        assert_eq!(user.proxy_level.xp, 0);
        // 100 * 1.12 = 112
        assert_eq!(user.proxy_level.next_xp, 112);

        user.apply_xp(111);
        assert_eq!(user.proxy_level.level, 2);
        user.apply_xp(1);
        assert_eq!(user.proxy_level.level, 3);
    }

    #[test]
    fn level_caps_at_sixty() {
        let mut user = User::new(Uuid::new_v4());
        user.apply_xp(1_000_000_000);
        assert_eq!(user.proxy_level.level, MAX_LEVEL);
    }

    #[test]
    fn agent_policy_filters() {
        let wl = AgentPolicy::Whitelist(vec!["viper".into()]);
        assert!(wl.allows("viper"));
        assert!(!wl.allows("ghost"));

        let bl = AgentPolicy::Blacklist(vec!["viper".into()]);
        assert!(!bl.allows("viper"));
        assert!(bl.allows("ghost"));
    }

    #[test]
    fn result_proof_upsert_replaces_same_player() {
        let user = Uuid::new_v4();
        let mut proof = ResultProof {
            metric_type: MetricType::Score,
            winner_user_id: None,
            entries: vec![],
        };
        proof.upsert_entry(ResultEntry {
            user_id: user,
            value: MetricValue::Number(10.0),
            proof_url: "a".into(),
            demo_url: None,
            submitted_at: Utc::now(),
        });
        proof.upsert_entry(ResultEntry {
            user_id: user,
            value: MetricValue::Number(20.0),
            proof_url: "b".into(),
            demo_url: None,
            submitted_at: Utc::now(),
        });
        assert_eq!(proof.entries.len(), 1);
        assert_eq!(proof.entries[0].value, MetricValue::Number(20.0));
    }
}
