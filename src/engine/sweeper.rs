//! Lifecycle sweeper.
//!
//! A single periodic scan keeps every match moving without per-match timers:
//! each tick loads the active states, measures inactivity against the
//! injected clock and applies the per-state timeout policy — always through
//! engine operations, never by poking fields, so settlement's idempotency
//! guard holds even when a sweep races a late human action. A failure on one
//! match is logged and skipped; the rest of the sweep continues.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::LifecycleConfig;
use crate::engine::ops::{players_with_passing_precheck, MatchEngine};
use crate::engine::settlement::{infer_winner, XP_LOSS, XP_WIN};
use crate::engine::transitions::MatchState;
use crate::error::{EngineError, EngineResult};
use crate::models::{Match, SettlementOverride, REDACTED_URL};
use crate::repo::Repository;

pub struct LifecycleSweeper {
    engine: Arc<MatchEngine>,
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
}

fn chrono_dur(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

fn overrides(
    winner: Uuid,
    winner_over: SettlementOverride,
    loser: Uuid,
    loser_over: SettlementOverride,
) -> HashMap<Uuid, SettlementOverride> {
    HashMap::from([(winner, winner_over), (loser, loser_over)])
}

impl LifecycleSweeper {
    pub fn new(
        engine: Arc<MatchEngine>,
        repo: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            engine,
            repo,
            clock,
            config,
        }
    }

    /// Periodic loop. The tick body runs to completion before the next tick
    /// starts, so sweeps never overlap.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_retention: Option<Instant> = None;

        info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            "lifecycle sweeper started"
        );
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                warn!(error = %e, "lifecycle sweep tick failed");
            }
            let retention_due = last_retention
                .map(|t| t.elapsed() >= self.config.retention_interval)
                .unwrap_or(true);
            if retention_due {
                last_retention = Some(Instant::now());
                if let Err(e) = self.retention_sweep().await {
                    warn!(error = %e, "evidence retention sweep failed");
                }
            }
        }
    }

    /// One pass over the active states.
    pub async fn tick(&self) -> EngineResult<()> {
        let active = self
            .repo
            .list_matches_by_states(&[
                MatchState::Checkin,
                MatchState::Drafting,
                MatchState::AwaitingPrecheck,
                MatchState::AwaitingConfirmation,
            ])
            .await?;

        for m in active {
            if let Err(e) = self.sweep_match(&m).await {
                warn!(match_id = %m.id, state = ?m.state, error = %e, "timeout handling failed; skipping match");
            }
        }
        Ok(())
    }

    async fn sweep_match(&self, m: &Match) -> EngineResult<()> {
        let now = self.clock.now();
        let (basis, timeout) = match m.state {
            MatchState::Checkin => (m.created_at, self.config.checkin_timeout),
            MatchState::Drafting => (
                m.draft.last_action_at().unwrap_or(m.updated_at),
                self.config.draft_action_timeout,
            ),
            MatchState::AwaitingPrecheck => (m.updated_at, self.config.precheck_timeout),
            MatchState::AwaitingConfirmation => (m.updated_at, self.config.confirmation_timeout),
            _ => return Ok(()),
        };
        if now - basis < chrono_dur(timeout) {
            return Ok(());
        }
        debug!(match_id = %m.id, state = ?m.state, "timeout elapsed");

        match m.state {
            MatchState::Checkin => self.handle_checkin_timeout(m).await,
            MatchState::Drafting => {
                self.engine.auto_draft_pick(m.id).await?;
                Ok(())
            }
            MatchState::AwaitingPrecheck => self.handle_precheck_timeout(m).await,
            MatchState::AwaitingConfirmation => self.handle_confirmation_timeout(m).await,
            _ => Ok(()),
        }
    }

    /// One no-show loses by default; nobody showing expires the match.
    async fn handle_checkin_timeout(&self, m: &Match) -> EngineResult<()> {
        let checked: Vec<Uuid> = m
            .players
            .iter()
            .filter(|p| p.checked_in)
            .map(|p| p.user_id)
            .collect();

        if checked.len() == 1 {
            let winner = checked[0];
            let loser = m
                .opponent_of(winner)
                .map(|p| p.user_id)
                .ok_or_else(|| EngineError::Validation("match is missing the loser".into()))?;
            self.engine
                .force_resolve(
                    m.id,
                    Some(winner),
                    overrides(
                        winner,
                        SettlementOverride { trust: 1, xp: 15 },
                        loser,
                        SettlementOverride { trust: -6, xp: 0 },
                    ),
                )
                .await?;
        } else {
            self.engine.expire(m.id, -3).await?;
        }
        Ok(())
    }

    async fn handle_precheck_timeout(&self, m: &Match) -> EngineResult<()> {
        let passed = players_with_passing_precheck(m);
        if passed.len() == 1 {
            let winner = passed[0];
            let loser = m
                .opponent_of(winner)
                .map(|p| p.user_id)
                .ok_or_else(|| EngineError::Validation("match is missing the loser".into()))?;
            self.engine
                .force_resolve(
                    m.id,
                    Some(winner),
                    overrides(
                        winner,
                        SettlementOverride { trust: 1, xp: 20 },
                        loser,
                        SettlementOverride { trust: -5, xp: 0 },
                    ),
                )
                .await?;
        } else {
            self.engine.expire(m.id, -2).await?;
        }
        Ok(())
    }

    /// Unconfirmed results settle on the inferred winner, or go to moderation
    /// when the submitted values cannot decide one.
    async fn handle_confirmation_timeout(&self, m: &Match) -> EngineResult<()> {
        match infer_winner(m) {
            Some(winner) => {
                let loser = m
                    .opponent_of(winner)
                    .map(|p| p.user_id)
                    .ok_or_else(|| EngineError::Validation("match is missing the loser".into()))?;
                self.engine
                    .force_resolve(
                        m.id,
                        Some(winner),
                        overrides(
                            winner,
                            SettlementOverride { trust: 1, xp: XP_WIN },
                            loser,
                            SettlementOverride { trust: -2, xp: XP_LOSS },
                        ),
                    )
                    .await?;
            }
            None => {
                self.engine
                    .open_dispute(
                        m.id,
                        None,
                        "confirmation window elapsed without agreement",
                        Vec::new(),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Drop expired pre-check/in-run records and redact stale proof URLs on
    /// terminal matches. Driven by each record's own timestamp.
    pub async fn retention_sweep(&self) -> EngineResult<()> {
        let terminal = self
            .repo
            .list_matches_by_states(&[
                MatchState::Resolved,
                MatchState::Canceled,
                MatchState::Expired,
            ])
            .await?;

        for m in terminal {
            if let Err(e) = self.retain_match(&m).await {
                warn!(match_id = %m.id, error = %e, "retention failed; skipping match");
            }
        }
        Ok(())
    }

    async fn retain_match(&self, m: &Match) -> EngineResult<()> {
        let ruleset = self.repo.find_ruleset(&m.ruleset_id).await?;
        let now = self.clock.now();
        let mut m = m.clone();
        let mut changed = false;

        let precheck_window = chrono::Duration::days(ruleset.retention.precheck_days);
        let before = m.evidence.precheck.len();
        m.evidence.precheck.retain(|r| now - r.at < precheck_window);
        changed |= m.evidence.precheck.len() != before;

        let inrun_window = chrono::Duration::days(ruleset.retention.inrun_days);
        let before = m.evidence.inrun.len();
        m.evidence.inrun.retain(|r| now - r.at < inrun_window);
        changed |= m.evidence.inrun.len() != before;

        if let Some(proof) = m.evidence.result.as_mut() {
            let result_window = chrono::Duration::days(ruleset.retention.result_days);
            let stale = proof
                .newest_submission_at()
                .map(|newest| now - newest >= result_window)
                .unwrap_or(false);
            if stale {
                for entry in &mut proof.entries {
                    if entry.proof_url != REDACTED_URL {
                        entry.proof_url = REDACTED_URL.to_string();
                        changed = true;
                    }
                    if matches!(&entry.demo_url, Some(url) if url != REDACTED_URL) {
                        entry.demo_url = Some(REDACTED_URL.to_string());
                        changed = true;
                    }
                }
            }
        }

        if changed {
            self.repo.save_match(&m).await?;
            debug!(match_id = %m.id, "evidence retention applied");
        }
        Ok(())
    }
}
