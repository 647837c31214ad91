//! Match Engine operations.
//!
//! Every operation is one atomic read-modify-write: load the match, validate
//! fully, mutate in memory, persist. Nothing is written on failure. The HTTP
//! layer and the lifecycle sweeper both drive matches exclusively through
//! these operations, so settlement's idempotency guard always holds.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::clock::Clock;
use crate::engine::autodraft;
use crate::engine::draft::{self, DraftTemplateRegistry};
use crate::engine::settlement;
use crate::engine::transitions::{transition, MatchState};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    Dispute, DisputeStatus, DraftAction, DraftActionType, EvidenceBundle, EvidenceKind,
    EvidenceRecord, EvidenceVerdict, Match, MatchPlayer, MetricType, MetricValue, ResolutionSource,
    ResultEntry, ResultProof, Ruleset, SettlementOverride, Side,
};
use crate::repo::Repository;

pub struct MatchEngine {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    registry: DraftTemplateRegistry,
}

/// Parameters handed over by the matchmaking component.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMatch {
    pub queue_id: String,
    pub league_id: String,
    pub ruleset_id: String,
    pub challenge_id: String,
    pub season_id: String,
    pub user_a: Uuid,
    pub user_b: Uuid,
}

/// Evidence submission before the engine stamps id and timestamp.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvidenceInput {
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub detected_agents: Vec<String>,
    #[serde(default)]
    pub confidence: HashMap<String, f64>,
    pub verdict: EvidenceVerdict,
    pub frame_hash: Option<String>,
    pub crop_url: Option<String>,
}

impl EvidenceInput {
    fn into_record(self, kind: EvidenceKind, at: DateTime<Utc>) -> EvidenceRecord {
        EvidenceRecord {
            id: Uuid::new_v4(),
            kind,
            at,
            user_id: self.user_id,
            detected_agents: self.detected_agents,
            confidence: self.confidence,
            verdict: self.verdict,
            frame_hash: self.frame_hash,
            crop_url: self.crop_url,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultEntryInput {
    pub user_id: Uuid,
    pub value: MetricValue,
    pub proof_url: String,
    pub demo_url: Option<String>,
}

/// Incoming result proof. Either structured `entries`, or the legacy
/// single-value shape (`user_id` + `value` + `proof_url`) which folds in as
/// one more entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultSubmission {
    pub metric_type: Option<MetricType>,
    pub winner_user_id: Option<Uuid>,
    #[serde(default)]
    pub entries: Vec<ResultEntryInput>,
    pub user_id: Option<Uuid>,
    pub value: Option<MetricValue>,
    pub proof_url: Option<String>,
    pub demo_url: Option<String>,
}

impl MatchEngine {
    pub fn new(repo: Arc<dyn Repository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            clock,
            registry: DraftTemplateRegistry::with_defaults(),
        }
    }

    pub fn repo(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ===== Creation / reads =====

    pub async fn create_match(&self, req: NewMatch) -> EngineResult<Match> {
        if req.user_a == req.user_b {
            return Err(EngineError::Validation(
                "a match needs two distinct players".into(),
            ));
        }
        let ruleset = self.repo.find_ruleset(&req.ruleset_id).await?;
        let draft = self.registry.instantiate(&ruleset.draft_template_id)?;
        let now = self.clock.now();

        let m = Match {
            id: Uuid::new_v4(),
            queue_id: req.queue_id,
            league_id: req.league_id,
            ruleset_id: req.ruleset_id,
            challenge_id: req.challenge_id,
            season_id: req.season_id,
            state: MatchState::Checkin,
            players: vec![
                MatchPlayer {
                    user_id: req.user_a,
                    side: Side::A,
                    checked_in: false,
                },
                MatchPlayer {
                    user_id: req.user_b,
                    side: Side::B,
                    checked_in: false,
                },
            ],
            draft,
            evidence: EvidenceBundle::default(),
            confirmed_by: Vec::new(),
            resolution: None,
            created_at: now,
            updated_at: now,
        };
        self.repo.create_match(&m).await?;
        info!(match_id = %m.id, league = %m.league_id, "match created");
        Ok(m)
    }

    pub async fn get_match(&self, id: Uuid) -> EngineResult<Match> {
        self.repo.find_match(id).await
    }

    async fn load_active(&self, id: Uuid) -> EngineResult<Match> {
        let m = self.repo.find_match(id).await?;
        if m.is_finalized() || m.state.is_terminal() {
            return Err(EngineError::Validation(format!(
                "match {} is already terminal",
                m.id
            )));
        }
        Ok(m)
    }

    // ===== Check-in =====

    pub async fn check_in(&self, match_id: Uuid, user_id: Uuid) -> EngineResult<Match> {
        let mut m = self.load_active(match_id).await?;
        if m.state != MatchState::Checkin {
            return Err(EngineError::InvalidTransition {
                from: m.state,
                to: MatchState::Drafting,
            });
        }
        let player = m
            .player_mut(user_id)
            .ok_or(EngineError::NotParticipant(user_id))?;
        player.checked_in = true;
        m.updated_at = self.clock.now();

        if m.players.iter().all(|p| p.checked_in) {
            transition(&mut m, MatchState::Drafting, self.clock.as_ref())?;
            info!(match_id = %m.id, "both players checked in, draft started");
        }
        self.repo.save_match(&m).await?;
        Ok(m)
    }

    // ===== Draft =====

    pub async fn apply_draft_action(
        &self,
        match_id: Uuid,
        user_id: Uuid,
        agent_id: &str,
    ) -> EngineResult<Match> {
        let mut m = self.load_active(match_id).await?;
        if m.state != MatchState::Drafting {
            return Err(EngineError::InvalidTransition {
                from: m.state,
                to: MatchState::Drafting,
            });
        }
        let ruleset = self.repo.find_ruleset(&m.ruleset_id).await?;
        let catalog = self.repo.list_agents().await?;
        let kind = draft::validate_action(&m, &ruleset, &catalog, user_id, agent_id)?;

        self.append_draft_action(&mut m, &ruleset, kind, agent_id, user_id)?;
        self.repo.save_match(&m).await?;
        Ok(m)
    }

    /// Append a validated action and advance out of DRAFTING when complete.
    fn append_draft_action(
        &self,
        m: &mut Match,
        ruleset: &Ruleset,
        kind: DraftActionType,
        agent_id: &str,
        user_id: Uuid,
    ) -> EngineResult<()> {
        let now = self.clock.now();
        m.draft.actions.push(DraftAction {
            kind,
            agent_id: agent_id.to_string(),
            user_id,
            at: now,
        });
        m.updated_at = now;

        if m.draft.is_complete() {
            let to = if ruleset.require_precheck {
                MatchState::AwaitingPrecheck
            } else {
                MatchState::ReadyToStart
            };
            transition(m, to, self.clock.as_ref())?;
            info!(match_id = %m.id, state = ?m.state, "draft complete");
        }
        Ok(())
    }

    /// Timed-out draft turn: pick for the absent player, or dispute the match
    /// when no eligible agent remains. Invoked by the lifecycle sweeper.
    pub async fn auto_draft_pick(&self, match_id: Uuid) -> EngineResult<Match> {
        let mut m = self.load_active(match_id).await?;
        if m.state != MatchState::Drafting {
            return Err(EngineError::InvalidTransition {
                from: m.state,
                to: MatchState::Drafting,
            });
        }
        let Some(expected) = draft::next_action(&m.draft) else {
            return Ok(m);
        };
        let ruleset = self.repo.find_ruleset(&m.ruleset_id).await?;
        let catalog = self.repo.list_agents().await?;
        let history = self
            .repo
            .list_matches_by_states(&[MatchState::Resolved])
            .await?;

        let acting = m
            .player_on_side(expected.side())
            .ok_or_else(|| EngineError::Validation("match is missing a side".into()))?
            .user_id;

        match autodraft::select_auto_pick(&m, &ruleset, &catalog, &history) {
            Some(agent_id) => {
                self.append_draft_action(&mut m, &ruleset, expected, &agent_id, acting)?;
                self.repo.save_match(&m).await?;

                // Missing a pick costs more than missing a ban.
                let penalty = if expected.is_pick() { -2 } else { -1 };
                let mut user = settlement::load_user_or_default(self.repo.as_ref(), acting).await?;
                user.apply_trust(penalty);
                self.repo.save_user(&user).await?;
                info!(match_id = %m.id, agent = %agent_id, user = %acting, "auto-draft pick applied");
                Ok(m)
            }
            None => {
                self.flag_disputed(&mut m, "auto-assignment failed: no eligible agent")
                    .await?;
                self.repo.save_match(&m).await?;
                Ok(m)
            }
        }
    }

    // ===== Evidence =====

    pub async fn record_precheck(
        &self,
        match_id: Uuid,
        input: EvidenceInput,
    ) -> EngineResult<Match> {
        let mut m = self.load_active(match_id).await?;
        let now = self.clock.now();
        let record = input.into_record(EvidenceKind::Precheck, now);
        let verdict = record.verdict;
        m.evidence.precheck.push(record);
        m.updated_at = now;

        if verdict == EvidenceVerdict::Violation {
            self.flag_disputed(&mut m, "pre-check violation detected")
                .await?;
        } else if m.state == MatchState::AwaitingPrecheck && all_players_passed_precheck(&m) {
            transition(&mut m, MatchState::ReadyToStart, self.clock.as_ref())?;
        }
        self.repo.save_match(&m).await?;
        Ok(m)
    }

    pub async fn record_inrun(&self, match_id: Uuid, input: EvidenceInput) -> EngineResult<Match> {
        let mut m = self.load_active(match_id).await?;
        let ruleset = self.repo.find_ruleset(&m.ruleset_id).await?;
        let now = self.clock.now();
        let record = input.into_record(EvidenceKind::Inrun, now);
        let verdict = record.verdict;
        m.evidence.inrun.push(record);
        m.updated_at = now;

        if verdict == EvidenceVerdict::Violation && ruleset.require_inrun_check {
            self.flag_disputed(&mut m, "in-run violation detected")
                .await?;
        } else if m.state == MatchState::ReadyToStart {
            transition(&mut m, MatchState::InProgress, self.clock.as_ref())?;
        }
        self.repo.save_match(&m).await?;
        Ok(m)
    }

    // ===== Results & confirmation =====

    pub async fn record_result(
        &self,
        match_id: Uuid,
        submission: ResultSubmission,
    ) -> EngineResult<Match> {
        let mut m = self.load_active(match_id).await?;
        const UPLOAD_STATES: &[MatchState] = &[
            MatchState::ReadyToStart,
            MatchState::InProgress,
            MatchState::AwaitingResultUpload,
            MatchState::AwaitingConfirmation,
        ];
        if !UPLOAD_STATES.contains(&m.state) {
            return Err(EngineError::InvalidTransition {
                from: m.state,
                to: MatchState::AwaitingConfirmation,
            });
        }

        let now = self.clock.now();
        let mut entries: Vec<ResultEntryInput> = submission.entries;
        // Legacy single-value shape folds in as one more entry.
        if let (Some(user_id), Some(value)) = (submission.user_id, submission.value) {
            entries.push(ResultEntryInput {
                user_id,
                value,
                proof_url: submission.proof_url.unwrap_or_default(),
                demo_url: submission.demo_url,
            });
        }

        let mut proof = match m.evidence.result.take() {
            Some(existing) => {
                if let Some(mt) = submission.metric_type {
                    if mt != existing.metric_type {
                        return Err(EngineError::Validation(format!(
                            "metric type mismatch: proof already uses {:?}",
                            existing.metric_type
                        )));
                    }
                }
                existing
            }
            None => ResultProof {
                metric_type: submission.metric_type.ok_or_else(|| {
                    EngineError::Validation("metric_type required on first submission".into())
                })?,
                winner_user_id: None,
                entries: Vec::new(),
            },
        };

        if let Some(winner) = submission.winner_user_id {
            if !m.is_participant(winner) {
                return Err(EngineError::NotParticipant(winner));
            }
            proof.winner_user_id = Some(winner);
        }
        for entry in entries {
            if !m.is_participant(entry.user_id) {
                return Err(EngineError::NotParticipant(entry.user_id));
            }
            proof.upsert_entry(ResultEntry {
                user_id: entry.user_id,
                value: entry.value,
                proof_url: entry.proof_url,
                demo_url: entry.demo_url,
                submitted_at: now,
            });
        }
        let has_entries = !proof.entries.is_empty();
        m.evidence.result = Some(proof);
        m.updated_at = now;

        // Drive READY_TO_START -> IN_PROGRESS -> AWAITING_RESULT_UPLOAD, then
        // on to AWAITING_CONFIRMATION once any entry exists.
        if m.state == MatchState::ReadyToStart {
            transition(&mut m, MatchState::InProgress, self.clock.as_ref())?;
        }
        if m.state == MatchState::InProgress {
            transition(&mut m, MatchState::AwaitingResultUpload, self.clock.as_ref())?;
        }
        if m.state == MatchState::AwaitingResultUpload && has_entries {
            transition(&mut m, MatchState::AwaitingConfirmation, self.clock.as_ref())?;
        }
        self.repo.save_match(&m).await?;
        Ok(m)
    }

    pub async fn confirm(&self, match_id: Uuid, user_id: Uuid) -> EngineResult<Match> {
        let mut m = self.load_active(match_id).await?;
        if !m.is_participant(user_id) {
            return Err(EngineError::NotParticipant(user_id));
        }
        if m.state != MatchState::AwaitingConfirmation {
            return Err(EngineError::InvalidTransition {
                from: m.state,
                to: MatchState::Resolved,
            });
        }
        if !m.confirmed_by.contains(&user_id) {
            m.confirmed_by.push(user_id);
        }
        m.updated_at = self.clock.now();

        if m.confirmed_by.len() >= m.players.len() {
            transition(&mut m, MatchState::Resolved, self.clock.as_ref())?;
            settlement::settle(
                self.repo.as_ref(),
                self.clock.as_ref(),
                &mut m,
                ResolutionSource::Confirmation,
                None,
                &HashMap::new(),
            )
            .await?;
        }
        self.repo.save_match(&m).await?;
        Ok(m)
    }

    // ===== Disputes =====

    /// Create a dispute (human or system) and force the match to DISPUTED.
    pub async fn open_dispute(
        &self,
        match_id: Uuid,
        opened_by: Option<Uuid>,
        reason: &str,
        evidence_urls: Vec<String>,
    ) -> EngineResult<(Match, Dispute)> {
        let mut m = self.load_active(match_id).await?;
        let open = self
            .repo
            .list_disputes_by_match(match_id)
            .await?
            .into_iter()
            .any(|d| d.status == DisputeStatus::Open);
        if open {
            return Err(EngineError::Validation(
                "a dispute is already open for this match".into(),
            ));
        }
        let dispute = self
            .create_dispute_record(&mut m, opened_by, reason, evidence_urls)
            .await?;
        self.repo.save_match(&m).await?;
        Ok((m, dispute))
    }

    pub async fn resolve_dispute(
        &self,
        match_id: Uuid,
        dispute_id: Uuid,
        resolved_by: Uuid,
        decision: &str,
        winner_user_id: Option<Uuid>,
    ) -> EngineResult<Match> {
        let mut m = self.load_active(match_id).await?;
        if m.state != MatchState::Disputed {
            return Err(EngineError::InvalidTransition {
                from: m.state,
                to: MatchState::Resolved,
            });
        }
        if m.is_participant(resolved_by) {
            return Err(EngineError::Forbidden(
                "participants cannot resolve their own dispute".into(),
            ));
        }
        if let Some(winner) = winner_user_id {
            if !m.is_participant(winner) {
                return Err(EngineError::NotParticipant(winner));
            }
        }
        let mut dispute = self
            .repo
            .list_disputes_by_match(match_id)
            .await?
            .into_iter()
            .find(|d| d.id == dispute_id)
            .ok_or_else(|| EngineError::not_found("dispute", dispute_id))?;
        if dispute.status != DisputeStatus::Open {
            return Err(EngineError::Validation(
                "dispute is already resolved".into(),
            ));
        }

        let now = self.clock.now();
        dispute.status = DisputeStatus::Resolved;
        dispute.decision = Some(decision.to_string());
        dispute.resolved_by = Some(resolved_by);
        dispute.winner_user_id = winner_user_id;
        dispute.resolved_at = Some(now);
        self.repo.save_dispute(&dispute).await?;

        transition(&mut m, MatchState::Resolved, self.clock.as_ref())?;
        settlement::settle(
            self.repo.as_ref(),
            self.clock.as_ref(),
            &mut m,
            ResolutionSource::Moderation,
            winner_user_id,
            &HashMap::new(),
        )
        .await?;
        self.repo.save_match(&m).await?;
        info!(match_id = %m.id, dispute_id = %dispute_id, "dispute resolved");
        Ok(m)
    }

    /// Open a system dispute (unless one is open) and force DISPUTED.
    async fn flag_disputed(&self, m: &mut Match, reason: &str) -> EngineResult<()> {
        let open = self
            .repo
            .list_disputes_by_match(m.id)
            .await?
            .into_iter()
            .any(|d| d.status == DisputeStatus::Open);
        if !open {
            self.create_dispute_record(m, None, reason, Vec::new())
                .await?;
        } else if m.state != MatchState::Disputed {
            transition(m, MatchState::Disputed, self.clock.as_ref())?;
        }
        Ok(())
    }

    async fn create_dispute_record(
        &self,
        m: &mut Match,
        opened_by: Option<Uuid>,
        reason: &str,
        evidence_urls: Vec<String>,
    ) -> EngineResult<Dispute> {
        let now = self.clock.now();
        let dispute = Dispute {
            id: Uuid::new_v4(),
            match_id: m.id,
            opened_by,
            reason: reason.to_string(),
            status: DisputeStatus::Open,
            decision: None,
            evidence_urls,
            resolved_by: None,
            winner_user_id: None,
            created_at: now,
            resolved_at: None,
        };
        self.repo.create_dispute(&dispute).await?;
        if m.state != MatchState::Disputed {
            transition(m, MatchState::Disputed, self.clock.as_ref())?;
        }
        info!(match_id = %m.id, reason = %dispute.reason, "dispute opened");
        Ok(dispute)
    }

    // ===== Terminal operations =====

    /// Moderation/sweeper path straight to RESOLVED with an explicit winner.
    pub async fn force_resolve(
        &self,
        match_id: Uuid,
        winner_user_id: Option<Uuid>,
        overrides: HashMap<Uuid, SettlementOverride>,
    ) -> EngineResult<Match> {
        let mut m = self.load_active(match_id).await?;
        if let Some(winner) = winner_user_id {
            if !m.is_participant(winner) {
                return Err(EngineError::NotParticipant(winner));
            }
        }
        transition(&mut m, MatchState::Resolved, self.clock.as_ref())?;
        settlement::settle(
            self.repo.as_ref(),
            self.clock.as_ref(),
            &mut m,
            ResolutionSource::Moderation,
            winner_user_id,
            &overrides,
        )
        .await?;
        self.repo.save_match(&m).await?;
        info!(match_id = %m.id, winner = ?winner_user_id, "match force-resolved");
        Ok(m)
    }

    /// Timeout expiry: terminal EXPIRED plus a flat trust penalty for both.
    pub async fn expire(&self, match_id: Uuid, trust_penalty: i32) -> EngineResult<Match> {
        let mut m = self.load_active(match_id).await?;
        transition(&mut m, MatchState::Expired, self.clock.as_ref())?;
        for player in m.players.clone() {
            let mut user =
                settlement::load_user_or_default(self.repo.as_ref(), player.user_id).await?;
            user.apply_trust(trust_penalty);
            self.repo.save_user(&user).await?;
        }
        self.repo.save_match(&m).await?;
        info!(match_id = %m.id, penalty = trust_penalty, "match expired");
        Ok(m)
    }

    pub async fn cancel(&self, match_id: Uuid) -> EngineResult<Match> {
        let mut m = self.load_active(match_id).await?;
        transition(&mut m, MatchState::Canceled, self.clock.as_ref())?;
        self.repo.save_match(&m).await?;
        info!(match_id = %m.id, "match canceled");
        Ok(m)
    }
}

/// Every participant has at least one passing pre-check record.
pub fn all_players_passed_precheck(m: &Match) -> bool {
    m.players.iter().all(|p| {
        m.evidence.precheck.iter().any(|r| {
            r.user_id == Some(p.user_id) && r.verdict == EvidenceVerdict::Pass
        })
    })
}

/// Pre-check records attributed to nobody count for nobody.
pub fn players_with_passing_precheck(m: &Match) -> Vec<Uuid> {
    m.players
        .iter()
        .filter(|p| {
            m.evidence.precheck.iter().any(|r| {
                r.user_id == Some(p.user_id) && r.verdict == EvidenceVerdict::Pass
            })
        })
        .map(|p| p.user_id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::engine_with_fixtures;
    use crate::models::{BASE_ELO, User};

    fn new_match_request() -> NewMatch {
        NewMatch {
            queue_id: "ranked-1v1".into(),
            league_id: "gold".into(),
            ruleset_id: "ruleset-default".into(),
            challenge_id: "sprint-run".into(),
            season_id: "s1".into(),
            user_a: Uuid::new_v4(),
            user_b: Uuid::new_v4(),
        }
    }

    fn pass_evidence(user: Uuid) -> EvidenceInput {
        EvidenceInput {
            user_id: Some(user),
            detected_agents: vec![],
            confidence: HashMap::new(),
            verdict: EvidenceVerdict::Pass,
            frame_hash: None,
            crop_url: None,
        }
    }

    fn violation_evidence(user: Uuid) -> EvidenceInput {
        EvidenceInput {
            verdict: EvidenceVerdict::Violation,
            ..pass_evidence(user)
        }
    }

    fn score_submission(user: Uuid, value: f64) -> ResultSubmission {
        ResultSubmission {
            metric_type: Some(MetricType::Score),
            winner_user_id: None,
            entries: vec![ResultEntryInput {
                user_id: user,
                value: MetricValue::Number(value),
                proof_url: format!("https://proofs.example/{user}"),
                demo_url: None,
            }],
            user_id: None,
            value: None,
            proof_url: None,
            demo_url: None,
        }
    }

    /// Drive a fresh match through draft completion. The draft template
    /// alternates sides, starting with side A's ban.
    async fn draft_out(engine: &MatchEngine, m: &Match) -> Match {
        let agents = [
            "viper", "ghost", "titan", "nova", "razor", "echo", "warden", "pulse",
        ];
        let mut current = engine.get_match(m.id).await.unwrap();
        for agent in agents {
            let expected = draft::next_action(&current.draft).unwrap();
            let user = current.player_on_side(expected.side()).unwrap().user_id;
            current = engine.apply_draft_action(m.id, user, agent).await.unwrap();
        }
        current
    }

    #[tokio::test]
    async fn create_match_rejects_identical_players() {
        let (_repo, _clock, engine) = engine_with_fixtures().await;
        let mut req = new_match_request();
        req.user_b = req.user_a;
        assert!(matches!(
            engine.create_match(req).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn create_match_requires_known_ruleset() {
        let (_repo, _clock, engine) = engine_with_fixtures().await;
        let mut req = new_match_request();
        req.ruleset_id = "no-such-ruleset".into();
        assert!(matches!(
            engine.create_match(req).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn check_in_advances_only_after_both_players() {
        let (_repo, _clock, engine) = engine_with_fixtures().await;
        let m = engine.create_match(new_match_request()).await.unwrap();
        let (a, b) = (m.players[0].user_id, m.players[1].user_id);

        let m = engine.check_in(m.id, a).await.unwrap();
        assert_eq!(m.state, MatchState::Checkin);
        // Repeating a check-in is harmless.
        let m = engine.check_in(m.id, a).await.unwrap();
        assert_eq!(m.state, MatchState::Checkin);

        let m = engine.check_in(m.id, b).await.unwrap();
        assert_eq!(m.state, MatchState::Drafting);
    }

    #[tokio::test]
    async fn check_in_rejects_outsiders() {
        let (_repo, _clock, engine) = engine_with_fixtures().await;
        let m = engine.create_match(new_match_request()).await.unwrap();
        assert!(matches!(
            engine.check_in(m.id, Uuid::new_v4()).await,
            Err(EngineError::NotParticipant(_))
        ));
    }

    #[tokio::test]
    async fn full_lifecycle_happy_path() {
        let (repo, _clock, engine) = engine_with_fixtures().await;
        let m = engine.create_match(new_match_request()).await.unwrap();
        let (a, b) = (m.players[0].user_id, m.players[1].user_id);

        engine.check_in(m.id, a).await.unwrap();
        engine.check_in(m.id, b).await.unwrap();
        let drafted = draft_out(&engine, &m).await;
        assert_eq!(drafted.state, MatchState::AwaitingPrecheck);
        assert!(drafted.draft.is_complete());

        engine.record_precheck(m.id, pass_evidence(a)).await.unwrap();
        let m2 = engine.record_precheck(m.id, pass_evidence(b)).await.unwrap();
        assert_eq!(m2.state, MatchState::ReadyToStart);

        engine.record_result(m.id, score_submission(a, 80.0)).await.unwrap();
        let m2 = engine.record_result(m.id, score_submission(b, 50.0)).await.unwrap();
        assert_eq!(m2.state, MatchState::AwaitingConfirmation);

        engine.confirm(m.id, a).await.unwrap();
        // Confirming twice is a no-op, not a second vote.
        let m2 = engine.confirm(m.id, a).await.unwrap();
        assert_eq!(m2.state, MatchState::AwaitingConfirmation);
        assert_eq!(m2.confirmed_by.len(), 1);

        let m2 = engine.confirm(m.id, b).await.unwrap();
        assert_eq!(m2.state, MatchState::Resolved);

        let resolution = m2.resolution.unwrap();
        assert_eq!(resolution.winner_user_id, Some(a));
        assert_eq!(resolution.source, ResolutionSource::Confirmation);
        // Mutual confirmation rewards both sides.
        assert_eq!(resolution.trust_delta[&a], 2);
        assert_eq!(resolution.trust_delta[&b], 2);
        assert!(resolution.rating_delta[&a] > 0.0);
        assert!(resolution.rating_delta[&b] < 0.0);

        let winner_rating = repo.find_rating(a, "gold").await.unwrap().unwrap();
        assert!(winner_rating.elo > BASE_ELO);
        assert_eq!(winner_rating.provisional_matches, 1);
    }

    #[tokio::test]
    async fn settlement_is_idempotent_across_repeated_confirms() {
        let (repo, _clock, engine) = engine_with_fixtures().await;
        let m = engine.create_match(new_match_request()).await.unwrap();
        let (a, b) = (m.players[0].user_id, m.players[1].user_id);
        engine.check_in(m.id, a).await.unwrap();
        engine.check_in(m.id, b).await.unwrap();
        draft_out(&engine, &m).await;
        engine.record_precheck(m.id, pass_evidence(a)).await.unwrap();
        engine.record_precheck(m.id, pass_evidence(b)).await.unwrap();
        engine.record_result(m.id, score_submission(a, 80.0)).await.unwrap();
        engine.record_result(m.id, score_submission(b, 50.0)).await.unwrap();
        engine.confirm(m.id, a).await.unwrap();
        engine.confirm(m.id, b).await.unwrap();

        let elo_after = repo.find_rating(a, "gold").await.unwrap().unwrap().elo;

        // A terminal match refuses further operations outright.
        assert!(engine.confirm(m.id, a).await.is_err());
        assert!(engine.force_resolve(m.id, Some(b), HashMap::new()).await.is_err());

        let rating = repo.find_rating(a, "gold").await.unwrap().unwrap();
        assert_eq!(rating.elo, elo_after);
        assert_eq!(rating.provisional_matches, 1);
    }

    #[tokio::test]
    async fn precheck_violation_forces_dispute() {
        let (repo, _clock, engine) = engine_with_fixtures().await;
        let m = engine.create_match(new_match_request()).await.unwrap();
        let (a, b) = (m.players[0].user_id, m.players[1].user_id);
        engine.check_in(m.id, a).await.unwrap();
        engine.check_in(m.id, b).await.unwrap();
        draft_out(&engine, &m).await;

        let m2 = engine
            .record_precheck(m.id, violation_evidence(a))
            .await
            .unwrap();
        assert_eq!(m2.state, MatchState::Disputed);

        let disputes = repo.list_disputes_by_match(m.id).await.unwrap();
        assert_eq!(disputes.len(), 1);
        assert_eq!(disputes[0].status, DisputeStatus::Open);
        assert!(disputes[0].opened_by.is_none());
    }

    #[tokio::test]
    async fn inrun_violation_ignored_when_ruleset_does_not_require_it() {
        let (_repo, _clock, engine) = engine_with_fixtures().await;
        let m = engine.create_match(new_match_request()).await.unwrap();
        let (a, b) = (m.players[0].user_id, m.players[1].user_id);
        engine.check_in(m.id, a).await.unwrap();
        engine.check_in(m.id, b).await.unwrap();
        draft_out(&engine, &m).await;
        engine.record_precheck(m.id, pass_evidence(a)).await.unwrap();
        engine.record_precheck(m.id, pass_evidence(b)).await.unwrap();

        // Default ruleset has require_inrun_check = false; the record is kept
        // for moderators but the match moves on.
        let m2 = engine
            .record_inrun(m.id, violation_evidence(a))
            .await
            .unwrap();
        assert_eq!(m2.state, MatchState::InProgress);
        assert_eq!(m2.evidence.inrun.len(), 1);
    }

    #[tokio::test]
    async fn dispute_resolution_settles_with_moderation_deltas() {
        let (repo, _clock, engine) = engine_with_fixtures().await;
        let m = engine.create_match(new_match_request()).await.unwrap();
        let (a, b) = (m.players[0].user_id, m.players[1].user_id);
        engine.check_in(m.id, a).await.unwrap();
        engine.check_in(m.id, b).await.unwrap();
        draft_out(&engine, &m).await;
        engine.record_precheck(m.id, pass_evidence(a)).await.unwrap();
        engine.record_precheck(m.id, pass_evidence(b)).await.unwrap();
        engine.record_result(m.id, score_submission(a, 80.0)).await.unwrap();

        let (m2, dispute) = engine
            .open_dispute(m.id, Some(b), "score looks wrong", vec![])
            .await
            .unwrap();
        assert_eq!(m2.state, MatchState::Disputed);

        // Only one open dispute per match.
        assert!(matches!(
            engine.open_dispute(m.id, Some(a), "me too", vec![]).await,
            Err(EngineError::Validation(_))
        ));

        // A participant cannot moderate their own match.
        assert!(matches!(
            engine
                .resolve_dispute(m.id, dispute.id, a, "I win", Some(a))
                .await,
            Err(EngineError::Forbidden(_))
        ));

        let moderator = Uuid::new_v4();
        let m3 = engine
            .resolve_dispute(m.id, dispute.id, moderator, "proof checks out", Some(a))
            .await
            .unwrap();
        assert_eq!(m3.state, MatchState::Resolved);

        let resolution = m3.resolution.unwrap();
        assert_eq!(resolution.source, ResolutionSource::Moderation);
        assert_eq!(resolution.winner_user_id, Some(a));
        assert_eq!(resolution.trust_delta[&a], 1);
        assert_eq!(resolution.trust_delta[&b], -1);

        let stored = repo.list_disputes_by_match(m.id).await.unwrap();
        assert_eq!(stored[0].status, DisputeStatus::Resolved);
        assert_eq!(stored[0].resolved_by, Some(moderator));
    }

    #[tokio::test]
    async fn result_metric_type_is_pinned_by_first_submission() {
        let (_repo, _clock, engine) = engine_with_fixtures().await;
        let m = engine.create_match(new_match_request()).await.unwrap();
        let (a, b) = (m.players[0].user_id, m.players[1].user_id);
        engine.check_in(m.id, a).await.unwrap();
        engine.check_in(m.id, b).await.unwrap();
        draft_out(&engine, &m).await;
        engine.record_precheck(m.id, pass_evidence(a)).await.unwrap();
        engine.record_precheck(m.id, pass_evidence(b)).await.unwrap();
        engine.record_result(m.id, score_submission(a, 80.0)).await.unwrap();

        let mut mismatched = score_submission(b, 50.0);
        mismatched.metric_type = Some(MetricType::TimeMs);
        assert!(matches!(
            engine.record_result(m.id, mismatched).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn resubmission_replaces_a_players_entry() {
        let (_repo, _clock, engine) = engine_with_fixtures().await;
        let m = engine.create_match(new_match_request()).await.unwrap();
        let (a, b) = (m.players[0].user_id, m.players[1].user_id);
        engine.check_in(m.id, a).await.unwrap();
        engine.check_in(m.id, b).await.unwrap();
        draft_out(&engine, &m).await;
        engine.record_precheck(m.id, pass_evidence(a)).await.unwrap();
        engine.record_precheck(m.id, pass_evidence(b)).await.unwrap();

        engine.record_result(m.id, score_submission(a, 80.0)).await.unwrap();
        let m2 = engine.record_result(m.id, score_submission(a, 95.0)).await.unwrap();

        let proof = m2.evidence.result.unwrap();
        assert_eq!(proof.entries.len(), 1);
        assert_eq!(
            proof.entries[0].value,
            MetricValue::Number(95.0)
        );
    }

    #[tokio::test]
    async fn force_resolve_applies_overrides() {
        let (repo, _clock, engine) = engine_with_fixtures().await;
        let m = engine.create_match(new_match_request()).await.unwrap();
        let (a, b) = (m.players[0].user_id, m.players[1].user_id);

        let overrides = HashMap::from([
            (a, SettlementOverride { trust: 1, xp: 15 }),
            (b, SettlementOverride { trust: -6, xp: 0 }),
        ]);
        let m2 = engine.force_resolve(m.id, Some(a), overrides).await.unwrap();
        assert_eq!(m2.state, MatchState::Resolved);

        let winner = repo.find_user(a).await.unwrap().unwrap();
        let loser = repo.find_user(b).await.unwrap().unwrap();
        assert_eq!(winner.trust_score, 101);
        assert_eq!(loser.trust_score, 94);
        assert_eq!(winner.proxy_level.xp, 15);
        assert_eq!(loser.proxy_level.xp, 0);
    }

    #[tokio::test]
    async fn expire_penalizes_both_players() {
        let (repo, _clock, engine) = engine_with_fixtures().await;
        let m = engine.create_match(new_match_request()).await.unwrap();
        let (a, b) = (m.players[0].user_id, m.players[1].user_id);

        let m2 = engine.expire(m.id, -3).await.unwrap();
        assert_eq!(m2.state, MatchState::Expired);
        assert!(m2.resolution.is_none());
        for id in [a, b] {
            let user = repo.find_user(id).await.unwrap().unwrap();
            assert_eq!(user.trust_score, 97);
        }
    }

    #[tokio::test]
    async fn cancel_is_terminal() {
        let (_repo, _clock, engine) = engine_with_fixtures().await;
        let m = engine.create_match(new_match_request()).await.unwrap();
        let a = m.players[0].user_id;

        let m2 = engine.cancel(m.id).await.unwrap();
        assert_eq!(m2.state, MatchState::Canceled);
        assert!(engine.check_in(m.id, a).await.is_err());
    }

    #[tokio::test]
    async fn trust_never_leaves_its_bounds_through_settlement() {
        let (repo, _clock, engine) = engine_with_fixtures().await;
        let m = engine.create_match(new_match_request()).await.unwrap();
        let (a, b) = (m.players[0].user_id, m.players[1].user_id);

        let mut floored = User::new(b);
        floored.trust_score = 2;
        repo.save_user(&floored).await.unwrap();

        let overrides = HashMap::from([(b, SettlementOverride { trust: -6, xp: 0 })]);
        engine.force_resolve(m.id, Some(a), overrides).await.unwrap();

        let user = repo.find_user(b).await.unwrap().unwrap();
        assert_eq!(user.trust_score, 0);
    }
}
